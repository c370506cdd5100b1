//! Uniform blob store capability (spec §4.1): `put/get/head/list/delete` plus
//! multipart upload, over object store or local filesystem. The key layout
//! is identical across both; only the transport differs.
//!
//! The object-store transport itself is an external collaborator (spec §1);
//! this module provides the trait, a fully real [`DirectoryBlobStore`], and
//! a thin [`ObjectStoreBackend`] wrapper over an injected client.

mod directory;
mod object_store;
mod retrying;

pub use directory::DirectoryBlobStore;
pub use object_store::{ObjectStoreBackend, ObjectStoreClient};
pub use retrying::RetryingBlobStore;

use anyhow::Error;
use async_trait::async_trait;

/// One entry returned by [`BlobStore::list`].
#[derive(Debug, Clone)]
pub struct ListEntry {
    pub key: String,
    pub size: u64,
    pub mtime: i64,
    pub etag: Option<String>,
}

/// A handle identifying an in-progress multipart upload.
#[derive(Debug, Clone)]
pub struct MultipartUpload {
    pub key: String,
    pub upload_id: String,
}

/// One completed part of a multipart upload.
#[derive(Debug, Clone)]
pub struct PartInfo {
    pub part_number: u32,
    pub etag: String,
}

/// Backend kind, used to pick GC's batch-size/parallelism defaults
/// (spec §4.5) via a small enum lookup rather than dynamic dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobStoreKind {
    ObjectStore,
    LocalDirectory,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    fn kind(&self) -> BlobStoreKind;

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

    /// Clean up multipart uploads abandoned before `older_than_epoch`.
    async fn multipart_cleanup_older_than(&self, older_than_epoch: i64) -> Result<usize, Error>;
}

/// Key layout helpers (spec §6): `<prefix>/<database-id>/<backup-id>/...`.
pub mod keys {
    pub fn manifest_key(prefix: &str, database_id: &str, backup_id: &str) -> String {
        format!("{prefix}/{database_id}/{backup_id}/manifest.json")
    }

    pub fn checkpoint_key(prefix: &str, database_id: &str, backup_id: &str) -> String {
        format!("{prefix}/{database_id}/{backup_id}/checkpoint.json")
    }

    pub fn complete_marker_key(prefix: &str, database_id: &str, backup_id: &str) -> String {
        format!("{prefix}/{database_id}/{backup_id}/complete.marker")
    }

    pub fn chunk_key(
        prefix: &str,
        database_id: &str,
        backup_id: &str,
        chunk_id: u64,
        ext: &str,
    ) -> String {
        format!("{prefix}/{database_id}/{backup_id}/chunks/datoms-{chunk_id}.{ext}")
    }

    pub fn backup_prefix(prefix: &str, database_id: &str, backup_id: &str) -> String {
        format!("{prefix}/{database_id}/{backup_id}/")
    }

    pub fn database_prefix(prefix: &str, database_id: &str) -> String {
        format!("{prefix}/{database_id}/")
    }

    pub fn migration_manifest_key(backup_dir: &str, database_id: &str, migration_id: &str) -> String {
        format!("{backup_dir}/{database_id}/migrations/{migration_id}/migration-manifest.json")
    }

    pub fn migration_log_key(backup_dir: &str, database_id: &str, migration_id: &str) -> String {
        format!("{backup_dir}/{database_id}/migrations/{migration_id}/transactions.jsonl")
    }

    pub fn migration_prefix(backup_dir: &str, database_id: &str) -> String {
        format!("{backup_dir}/{database_id}/migrations/")
    }
}
