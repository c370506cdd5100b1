//! In-memory `BlobStore` used by the integration tests, standing in for
//! `DirectoryBlobStore`/`ObjectStoreBackend` so tests don't touch a
//! filesystem or network.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{bail, Error};
use async_trait::async_trait;

use datom_vault::blobstore::{BlobStore, BlobStoreKind, ListEntry, MultipartUpload, PartInfo};

struct Object {
    bytes: Vec<u8>,
    mtime: i64,
}

#[derive(Default)]
pub struct MemBlobStore {
    objects: Mutex<HashMap<String, Object>>,
    uploads: Mutex<HashMap<String, (String, Vec<(u32, Vec<u8>)>)>>,
    next_mtime: Mutex<i64>,
}

impl MemBlobStore {
    pub fn new() -> Self {
        MemBlobStore::default()
    }

    /// Back-dates an existing key's mtime, used by the cleanup-incomplete
    /// test to simulate a backup prefix written 25 hours ago.
    pub fn set_mtime(&self, key: &str, mtime: i64) {
        if let Some(obj) = self.objects.lock().unwrap().get_mut(key) {
            obj.mtime = mtime;
        }
    }

    fn tick(&self) -> i64 {
        let mut guard = self.next_mtime.lock().unwrap();
        *guard += 1;
        *guard
    }
}

#[async_trait]
impl BlobStore for MemBlobStore {
    fn kind(&self) -> BlobStoreKind {
        BlobStoreKind::LocalDirectory
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: &str, _meta: &[(String, String)]) -> Result<(), Error> {
        let mtime = self.tick();
        self.objects.lock().unwrap().insert(key.to_string(), Object { bytes, mtime });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, Error> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|obj| obj.bytes.clone())
            .ok_or_else(|| anyhow::anyhow!("no such key: {key}"))
    }

    async fn head(&self, key: &str) -> Result<bool, Error> {
        Ok(self.objects.lock().unwrap().contains_key(key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ListEntry>, Error> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, obj)| ListEntry {
                key: key.clone(),
                size: obj.bytes.len() as u64,
                mtime: obj.mtime,
                etag: None,
            })
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn multipart_create(&self, key: &str) -> Result<MultipartUpload, Error> {
        let upload_id = format!("upload-{}", self.tick());
        self.uploads.lock().unwrap().insert(upload_id.clone(), (key.to_string(), Vec::new()));
        Ok(MultipartUpload {
            key: key.to_string(),
            upload_id,
        })
    }

    async fn multipart_part(&self, upload: &MultipartUpload, part_number: u32, bytes: Vec<u8>) -> Result<PartInfo, Error> {
        let mut guard = self.uploads.lock().unwrap();
        let (_, parts) = guard.get_mut(&upload.upload_id).ok_or_else(|| anyhow::anyhow!("unknown upload"))?;
        let etag = format!("etag-{part_number}");
        parts.push((part_number, bytes));
        Ok(PartInfo { part_number, etag })
    }

    async fn multipart_complete(&self, upload: &MultipartUpload, parts: &[PartInfo]) -> Result<(), Error> {
        let (key, mut staged) = self
            .uploads
            .lock()
            .unwrap()
            .remove(&upload.upload_id)
            .ok_or_else(|| anyhow::anyhow!("unknown upload"))?;
        staged.sort_by_key(|(n, _)| *n);
        if staged.len() != parts.len() {
            bail!("part count mismatch on complete");
        }
        let mut bytes = Vec::new();
        for (_, chunk) in staged {
            bytes.extend(chunk);
        }
        let mtime = self.tick();
        self.objects.lock().unwrap().insert(key, Object { bytes, mtime });
        Ok(())
    }

    async fn multipart_abort(&self, upload: &MultipartUpload) -> Result<(), Error> {
        self.uploads.lock().unwrap().remove(&upload.upload_id);
        Ok(())
    }

    async fn multipart_list(&self, prefix: &str) -> Result<Vec<MultipartUpload>, Error> {
        Ok(self
            .uploads
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
        Ok(0)
    }
}
