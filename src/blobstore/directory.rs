//! Local-directory blob store. Grounded on
//! `pbs_datastore::chunk_store::ChunkStore`: plain files under a base
//! directory, directory creation on demand, mtime read from the filesystem
//! metadata. Multipart is emulated as a staged temp file plus an atomic
//! rename on `complete`, since a directory has no native multipart concept
//! (spec §4.1).

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{format_err, Context, Error};
use async_trait::async_trait;

use super::{BlobStore, BlobStoreKind, ListEntry, MultipartUpload, PartInfo};

pub struct DirectoryBlobStore {
    base: PathBuf,
    // staged multipart parts, keyed by upload_id; directories have no
    // native multipart support so parts accumulate here until `complete`.
    staging: Mutex<std::collections::HashMap<String, (String, Vec<(u32, Vec<u8>)>)>>,
}

impl DirectoryBlobStore {
    pub fn new(base: impl Into<PathBuf>) -> Result<Self, Error> {
        let base = base.into();
        std::fs::create_dir_all(&base)
            .with_context(|| format!("creating blob store base dir {:?}", base))?;
        Ok(Self {
            base,
            staging: Mutex::new(std::collections::HashMap::new()),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base.join(key)
    }
}

fn ensure_parent_dir(path: &Path) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {:?}", parent))?;
    }
    Ok(())
}

#[async_trait]
impl BlobStore for DirectoryBlobStore {
    fn kind(&self) -> BlobStoreKind {
        BlobStoreKind::LocalDirectory
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        _content_type: &str,
        _meta: &[(String, String)],
    ) -> Result<(), Error> {
        let path = self.path_for(key);
        ensure_parent_dir(&path)?;
        // write to a temp file then rename, so a reader never observes a
        // partially written object.
        let tmp_path = path.with_extension("tmp-upload");
        std::fs::write(&tmp_path, &bytes)
            .with_context(|| format!("writing {:?}", tmp_path))?;
        std::fs::rename(&tmp_path, &path)
            .with_context(|| format!("renaming into place {:?}", path))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, Error> {
        let path = self.path_for(key);
        std::fs::read(&path).with_context(|| format!("reading {:?}", path))
    }

    async fn head(&self, key: &str) -> Result<bool, Error> {
        Ok(self.path_for(key).is_file())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ListEntry>, Error> {
        let root = self.path_for(prefix);
        if !root.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in walkdir::WalkDir::new(&root).into_iter() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let meta = entry.metadata()?;
            let rel = entry
                .path()
                .strip_prefix(&self.base)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            out.push(ListEntry {
                key: rel,
                size: meta.len(),
                mtime,
                etag: None,
            });
        }
        Ok(out)
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(format_err!("deleting {:?}: {}", path, err)),
        }
    }

    async fn multipart_create(&self, key: &str) -> Result<MultipartUpload, Error> {
        let upload_id = proxmox_uuid::Uuid::generate().to_string();
        self.staging
            .lock()
            .unwrap()
            .insert(upload_id.clone(), (key.to_string(), Vec::new()));
        Ok(MultipartUpload {
            key: key.to_string(),
            upload_id,
        })
    }

    async fn multipart_part(
        &self,
        upload: &MultipartUpload,
        part_number: u32,
        bytes: Vec<u8>,
    ) -> Result<PartInfo, Error> {
        let mut staging = self.staging.lock().unwrap();
        let entry = staging
            .get_mut(&upload.upload_id)
            .ok_or_else(|| format_err!("unknown multipart upload {}", upload.upload_id))?;
        let etag = hex::encode(openssl::sha::sha256(&bytes));
        entry.1.push((part_number, bytes));
        Ok(PartInfo { part_number, etag })
    }

    async fn multipart_complete(
        &self,
        upload: &MultipartUpload,
        parts: &[PartInfo],
    ) -> Result<(), Error> {
        let staged = self
            .staging
            .lock()
            .unwrap()
            .remove(&upload.upload_id)
            .ok_or_else(|| format_err!("unknown multipart upload {}", upload.upload_id))?;
        let mut by_number: std::collections::HashMap<u32, Vec<u8>> = staged.1.into_iter().collect();
        let mut assembled = Vec::new();
        for part in parts {
            let bytes = by_number
                .remove(&part.part_number)
                .ok_or_else(|| format_err!("missing part {} for completion", part.part_number))?;
            assembled.extend(bytes);
        }
        self.put(&upload.key, assembled, "application/octet-stream", &[])
            .await
    }

    async fn multipart_abort(&self, upload: &MultipartUpload) -> Result<(), Error> {
        self.staging.lock().unwrap().remove(&upload.upload_id);
        Ok(())
    }

    async fn multipart_list(&self, prefix: &str) -> Result<Vec<MultipartUpload>, Error> {
        Ok(self
            .staging
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, (key, _))| key.starts_with(prefix))
            .map(|(upload_id, (key, _))| MultipartUpload {
                key: key.clone(),
                upload_id: upload_id.clone(),
            })
            .collect())
    }

    async fn multipart_cleanup_older_than(&self, _older_than_epoch: i64) -> Result<usize, Error> {
        // directories emulate multipart entirely in memory; nothing
        // survives a process restart to clean up.
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_head_delete_round_trip() {
        let dir = tempdir();
        let store = DirectoryBlobStore::new(dir.path()).unwrap();
        assert!(!store.head("a/b").await.unwrap());
        store
            .put("a/b", b"hello".to_vec(), "application/octet-stream", &[])
            .await
            .unwrap();
        assert!(store.head("a/b").await.unwrap());
        assert_eq!(store.get("a/b").await.unwrap(), b"hello");
        store.delete("a/b").await.unwrap();
        assert!(!store.head("a/b").await.unwrap());
    }

    #[tokio::test]
    async fn list_respects_prefix() {
        let dir = tempdir();
        let store = DirectoryBlobStore::new(dir.path()).unwrap();
        store.put("db1/b1/manifest.json", b"{}".to_vec(), "", &[]).await.unwrap();
        store.put("db1/b1/chunks/datoms-0.gz", b"x".to_vec(), "", &[]).await.unwrap();
        store.put("db2/b1/manifest.json", b"{}".to_vec(), "", &[]).await.unwrap();

        let entries = store.list("db1/").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.key.starts_with("db1/")));
    }

    #[tokio::test]
    async fn multipart_assembles_parts_in_given_order() {
        let dir = tempdir();
        let store = DirectoryBlobStore::new(dir.path()).unwrap();
        let upload = store.multipart_create("big/object").await.unwrap();
        let p2 = store.multipart_part(&upload, 2, b"world".to_vec()).await.unwrap();
        let p1 = store.multipart_part(&upload, 1, b"hello ".to_vec()).await.unwrap();
        store.multipart_complete(&upload, &[p1, p2]).await.unwrap();
        assert_eq!(store.get("big/object").await.unwrap(), b"hello world");
    }

    fn tempdir() -> TempDir {
        TempDir::new()
    }

    struct TempDir(PathBuf);
    impl TempDir {
        fn new() -> Self {
            let mut path = std::env::temp_dir();
            path.push(format!("datom-vault-test-{}", proxmox_uuid::Uuid::generate()));
            std::fs::create_dir_all(&path).unwrap();
            TempDir(path)
        }
        fn path(&self) -> &Path {
            &self.0
        }
    }
    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }
}
