//! Object-store backend: a thin [`BlobStore`] wrapper over an injected,
//! already-authenticated client. The actual object-store client and its
//! credential loading are external collaborators (spec §1) — this type only
//! adapts whatever capability the host application provides into our
//! uniform trait.

use anyhow::Error;
use async_trait::async_trait;

use super::{BlobStore, BlobStoreKind, ListEntry, MultipartUpload, PartInfo};

/// The capability an injected object-store client must provide. Kept
/// intentionally identical in shape to [`BlobStore`] minus the `kind()`
/// marker, so adapting a real S3/GCS/Azure client is a one-line `impl`.
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        meta: &[(String, String)],
    ) -> Result<(), Error>;
    async fn get(&self, key: &str) -> Result<Vec<u8>, Error>;
    async fn head(&self, key: &str) -> Result<bool, Error>;
    async fn list(&self, prefix: &str) -> Result<Vec<ListEntry>, Error>;
    async fn delete(&self, key: &str) -> Result<(), Error>;
    async fn multipart_create(&self, key: &str) -> Result<MultipartUpload, Error>;
    async fn multipart_part(
        &self,
        upload: &MultipartUpload,
        part_number: u32,
        bytes: Vec<u8>,
    ) -> Result<PartInfo, Error>;
    async fn multipart_complete(
        &self,
        upload: &MultipartUpload,
        parts: &[PartInfo],
    ) -> Result<(), Error>;
    async fn multipart_abort(&self, upload: &MultipartUpload) -> Result<(), Error>;
    async fn multipart_list(&self, prefix: &str) -> Result<Vec<MultipartUpload>, Error>;
    async fn multipart_cleanup_older_than(&self, older_than_epoch: i64) -> Result<usize, Error>;
}

pub struct ObjectStoreBackend<C: ObjectStoreClient> {
    client: C,
}

impl<C: ObjectStoreClient> ObjectStoreBackend<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C: ObjectStoreClient> BlobStore for ObjectStoreBackend<C> {
    fn kind(&self) -> BlobStoreKind {
        BlobStoreKind::ObjectStore
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        meta: &[(String, String)],
    ) -> Result<(), Error> {
        self.client.put(key, bytes, content_type, meta).await
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, Error> {
        self.client.get(key).await
    }

    async fn head(&self, key: &str) -> Result<bool, Error> {
        self.client.head(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ListEntry>, Error> {
        self.client.list(prefix).await
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        self.client.delete(key).await
    }

    async fn multipart_create(&self, key: &str) -> Result<MultipartUpload, Error> {
        self.client.multipart_create(key).await
    }

    async fn multipart_part(
        &self,
        upload: &MultipartUpload,
        part_number: u32,
        bytes: Vec<u8>,
    ) -> Result<PartInfo, Error> {
        self.client.multipart_part(upload, part_number, bytes).await
    }

    async fn multipart_complete(
        &self,
        upload: &MultipartUpload,
        parts: &[PartInfo],
    ) -> Result<(), Error> {
        self.client.multipart_complete(upload, parts).await
    }

    async fn multipart_abort(&self, upload: &MultipartUpload) -> Result<(), Error> {
        self.client.multipart_abort(upload).await
    }

    async fn multipart_list(&self, prefix: &str) -> Result<Vec<MultipartUpload>, Error> {
        self.client.multipart_list(prefix).await
    }

    async fn multipart_cleanup_older_than(&self, older_than_epoch: i64) -> Result<usize, Error> {
        self.client.multipart_cleanup_older_than(older_than_epoch).await
    }
}
