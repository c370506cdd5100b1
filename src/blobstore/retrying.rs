//! Wraps any [`BlobStore`] with the exponential-backoff retry policy from
//! spec §4.1. Every operation is classified via
//! [`crate::error::classify_opaque_error`] (the inner store only speaks
//! `anyhow::Error`) and retried only when transient.

use anyhow::Error;
use async_trait::async_trait;

use crate::error::{classify_opaque_error, ErrorClass, VaultError};
use crate::retry::with_retry_async;

use super::{BlobStore, BlobStoreKind, ListEntry, MultipartUpload, PartInfo};

pub struct RetryingBlobStore<B: BlobStore> {
    inner: B,
}

impl<B: BlobStore> RetryingBlobStore<B> {
    pub fn new(inner: B) -> Self {
        Self { inner }
    }
}

fn to_vault_error(err: Error) -> VaultError {
    match classify_opaque_error(&err) {
        ErrorClass::Transient => VaultError::Transient(err.to_string()),
        ErrorClass::Data => VaultError::Data {
            message: err.to_string(),
            chunk_id: None,
        },
        ErrorClass::Resource => VaultError::Resource(err.to_string()),
        ErrorClass::Fatal | ErrorClass::Logic => VaultError::Fatal(err.to_string()),
    }
}

fn from_vault_error(err: VaultError) -> Error {
    Error::msg(err.to_string())
}

#[async_trait]
impl<B: BlobStore> BlobStore for RetryingBlobStore<B> {
    fn kind(&self) -> BlobStoreKind {
        self.inner.kind()
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        meta: &[(String, String)],
    ) -> Result<(), Error> {
        with_retry_async(|_| async {
            self.inner
                .put(key, bytes.clone(), content_type, meta)
                .await
                .map_err(to_vault_error)
        })
        .await
        .map_err(from_vault_error)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, Error> {
        with_retry_async(|_| async { self.inner.get(key).await.map_err(to_vault_error) })
            .await
            .map_err(from_vault_error)
    }

    async fn head(&self, key: &str) -> Result<bool, Error> {
        with_retry_async(|_| async { self.inner.head(key).await.map_err(to_vault_error) })
            .await
            .map_err(from_vault_error)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ListEntry>, Error> {
        with_retry_async(|_| async { self.inner.list(prefix).await.map_err(to_vault_error) })
            .await
            .map_err(from_vault_error)
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        with_retry_async(|_| async { self.inner.delete(key).await.map_err(to_vault_error) })
            .await
            .map_err(from_vault_error)
    }

    async fn multipart_create(&self, key: &str) -> Result<MultipartUpload, Error> {
        with_retry_async(|_| async {
            self.inner.multipart_create(key).await.map_err(to_vault_error)
        })
        .await
        .map_err(from_vault_error)
    }

    async fn multipart_part(
        &self,
        upload: &MultipartUpload,
        part_number: u32,
        bytes: Vec<u8>,
    ) -> Result<PartInfo, Error> {
        with_retry_async(|_| async {
            self.inner
                .multipart_part(upload, part_number, bytes.clone())
                .await
                .map_err(to_vault_error)
        })
        .await
        .map_err(from_vault_error)
    }

    async fn multipart_complete(
        &self,
        upload: &MultipartUpload,
        parts: &[PartInfo],
    ) -> Result<(), Error> {
        with_retry_async(|_| async {
            self.inner
                .multipart_complete(upload, parts)
                .await
                .map_err(to_vault_error)
        })
        .await
        .map_err(from_vault_error)
    }

    async fn multipart_abort(&self, upload: &MultipartUpload) -> Result<(), Error> {
        with_retry_async(|_| async {
            self.inner.multipart_abort(upload).await.map_err(to_vault_error)
        })
        .await
        .map_err(from_vault_error)
    }

    async fn multipart_list(&self, prefix: &str) -> Result<Vec<MultipartUpload>, Error> {
        with_retry_async(|_| async {
            self.inner.multipart_list(prefix).await.map_err(to_vault_error)
        })
        .await
        .map_err(from_vault_error)
    }

    async fn multipart_cleanup_older_than(&self, older_than_epoch: i64) -> Result<usize, Error> {
        with_retry_async(|_| async {
            self.inner
                .multipart_cleanup_older_than(older_than_epoch)
                .await
                .map_err(to_vault_error)
        })
        .await
        .map_err(from_vault_error)
    }
}
