//! Top-level façade (spec §6): thin handlers over the four engines, matching
//! `src/api2/admin/datastore.rs`'s style of a few lines of glue calling into
//! `pbs_datastore`/`DataStore` methods rather than re-implementing anything.

use std::sync::Arc;

use anyhow::{Context, Error};

use crate::backup::{run_backup, BackupOptions, BackupResult};
use crate::blobstore::{keys, BlobStore};
use crate::codec::decode_chunk;
use crate::gc::{run_gc, GcOptions, GcResult};
use crate::metadata::{from_text, manifest::Manifest};
use crate::migration::{live_migrate, recover as migration_recover, BackupFn, LiveMigrateOptions, MigrationResult, RestoreFn};
use crate::restore::{run_restore, RestoreOptions, RestoreProgress, RestoreResult};
use crate::source::{ContentAddressedStore, DatalogSource};
use crate::task::TaskContext;
use crate::task_info;

/// One backup summary as returned by [`Vault::list_backups`].
#[derive(Debug, Clone)]
pub struct BackupSummary {
    pub backup_id: String,
    pub completed: bool,
    pub datom_count: u64,
    pub chunk_count: u64,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct VerifyResult {
    pub success: bool,
    pub backup_id: String,
    pub all_chunks_present: bool,
    pub missing_chunks: Vec<u64>,
    pub checksum_mismatches: Vec<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CleanupResult {
    pub success: bool,
    pub cleaned_count: u64,
    pub backup_ids: Vec<String>,
    pub error: Option<String>,
}

/// Entry point gluing the backup/restore/gc/migration engines to an
/// injected [`DatalogSource`], [`BlobStore`], and (for GC) a
/// [`ContentAddressedStore`].
pub struct Vault {
    blobstore: Arc<dyn BlobStore>,
    prefix: String,
}

impl Vault {
    pub fn new(blobstore: Arc<dyn BlobStore>, prefix: impl Into<String>) -> Self {
        Vault {
            blobstore,
            prefix: prefix.into(),
        }
    }

    pub async fn backup(&self, source: &dyn DatalogSource, options: &BackupOptions, ctx: &dyn TaskContext) -> BackupResult {
        run_backup(source, self.blobstore.as_ref(), options, ctx).await
    }

    pub async fn restore(
        &self,
        target: &dyn DatalogSource,
        backup_id: &str,
        options: &RestoreOptions,
        ctx: &dyn TaskContext,
        progress_fn: Option<&(dyn Fn(RestoreProgress) + Sync)>,
    ) -> RestoreResult {
        run_restore(target, self.blobstore.as_ref(), backup_id, options, ctx, progress_fn).await
    }

    pub fn gc(&self, store: &dyn ContentAddressedStore, options: &GcOptions, ctx: &dyn TaskContext) -> GcResult {
        run_gc(store, options, ctx)
    }

    /// Lists every completed backup under `database_id` (spec §6): a backup
    /// prefix whose `manifest.json` parses and whose `complete.marker`
    /// exists. Incomplete prefixes are silently skipped, matching spec §8
    /// scenario 3's "a subsequent list-backups does not include it".
    pub async fn list_backups(&self, database_id: &str) -> Result<Vec<BackupSummary>, Error> {
        let prefix = keys::database_prefix(&self.prefix, database_id);
        let entries = self.blobstore.list(&prefix).await.context("listing backup prefixes")?;

        let mut backup_ids: Vec<String> = entries
            .iter()
            .filter_map(|entry| entry.key.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('/').next())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();
        backup_ids.sort();
        backup_ids.dedup();

        let mut summaries = Vec::new();
        for backup_id in backup_ids {
            let marker_key = keys::complete_marker_key(&self.prefix, database_id, &backup_id);
            if !self.blobstore.head(&marker_key).await? {
                continue;
            }
            let manifest_key = keys::manifest_key(&self.prefix, database_id, &backup_id);
            let Ok(bytes) = self.blobstore.get(&manifest_key).await else {
                continue;
            };
            let Ok(text) = String::from_utf8(bytes) else {
                continue;
            };
            let Ok(manifest) = from_text::<Manifest>(&text) else {
                continue;
            };
            summaries.push(BackupSummary {
                backup_id,
                completed: manifest.completed,
                datom_count: manifest.stats.datom_count,
                chunk_count: manifest.stats.chunk_count,
                created_at: manifest.created_at,
            });
        }
        Ok(summaries)
    }

    /// Existence-only verification (spec §8 scenario 2): checks that every
    /// chunk key the manifest names is present via `head`, without
    /// downloading or checksum-verifying contents. Set `deep` to also
    /// download each chunk and compare its checksum against the manifest;
    /// only `deep` verification can catch corruption `restore` would later
    /// reject with `success=false`.
    pub async fn verify_backup(&self, database_id: &str, backup_id: &str, deep: bool) -> VerifyResult {
        match self.verify_backup_inner(database_id, backup_id, deep).await {
            Ok(result) => result,
            Err(err) => VerifyResult {
                success: false,
                backup_id: backup_id.to_string(),
                all_chunks_present: false,
                missing_chunks: Vec::new(),
                checksum_mismatches: Vec::new(),
                error: Some(err.to_string()),
            },
        }
    }

    async fn verify_backup_inner(&self, database_id: &str, backup_id: &str, deep: bool) -> Result<VerifyResult, Error> {
        let manifest_key = keys::manifest_key(&self.prefix, database_id, backup_id);
        let bytes = self.blobstore.get(&manifest_key).await.context("fetching manifest for verify")?;
        let text = String::from_utf8(bytes).context("manifest is not valid utf-8")?;
        let manifest: Manifest = from_text(&text)?;

        let mut missing_chunks = Vec::new();
        let mut checksum_mismatches = Vec::new();

        for chunk in &manifest.chunks {
            let present = self.blobstore.head(&chunk.storage_key).await.context("checking chunk existence")?;
            if !present {
                missing_chunks.push(chunk.id);
                continue;
            }
            if deep {
                let compressed = self.blobstore.get(&chunk.storage_key).await.context("downloading chunk for deep verify")?;
                let actual = crate::codec::checksum(&compressed);
                if actual != chunk.checksum {
                    checksum_mismatches.push(chunk.id);
                    continue;
                }
                let decompressed = crate::codec::decompress(&compressed, manifest.compression).context("decompressing chunk for deep verify")?;
                if decode_chunk(&decompressed).is_err() {
                    checksum_mismatches.push(chunk.id);
                }
            }
        }

        let all_chunks_present = missing_chunks.is_empty();
        let success = all_chunks_present && checksum_mismatches.is_empty();

        Ok(VerifyResult {
            success,
            backup_id: backup_id.to_string(),
            all_chunks_present,
            missing_chunks,
            checksum_mismatches,
            error: None,
        })
    }

    /// Deletes backup prefixes older than `older_than_hours` (by
    /// `backup/created-at`) that never got a `complete.marker` (spec §8
    /// scenario 3). A prefix with no manifest at all (upload failed before
    /// the manifest was even written) is also eligible, falling back to the
    /// oldest key mtime under the prefix as a stand-in for `created-at`.
    pub async fn cleanup_incomplete(&self, database_id: &str, older_than_hours: i64, ctx: &dyn TaskContext) -> CleanupResult {
        match self.cleanup_incomplete_inner(database_id, older_than_hours, ctx).await {
            Ok(result) => result,
            Err(err) => CleanupResult {
                success: false,
                cleaned_count: 0,
                backup_ids: Vec::new(),
                error: Some(err.to_string()),
            },
        }
    }

    async fn cleanup_incomplete_inner(&self, database_id: &str, older_than_hours: i64, ctx: &dyn TaskContext) -> Result<CleanupResult, Error> {
        let prefix = keys::database_prefix(&self.prefix, database_id);
        let entries = self.blobstore.list(&prefix).await.context("listing backup prefixes for cleanup")?;

        let mut backup_ids: Vec<String> = entries
            .iter()
            .filter_map(|entry| entry.key.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('/').next())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();
        backup_ids.sort();
        backup_ids.dedup();

        let now = proxmox_time::epoch_i64();
        let cutoff = now - older_than_hours * 3600;
        let mut cleaned = Vec::new();

        for backup_id in backup_ids {
            ctx.check_abort()?;
            let marker_key = keys::complete_marker_key(&self.prefix, database_id, &backup_id);
            if self.blobstore.head(&marker_key).await? {
                continue;
            }

            let manifest_key = keys::manifest_key(&self.prefix, database_id, &backup_id);
            let created_at_epoch = match self.blobstore.get(&manifest_key).await {
                Ok(bytes) => {
                    let text = String::from_utf8(bytes).context("manifest is not valid utf-8")?;
                    match from_text::<Manifest>(&text) {
                        Ok(manifest) => proxmox_time::parse_rfc3339(&manifest.created_at).unwrap_or(now),
                        Err(_) => now,
                    }
                }
                // No manifest at all: fall back to the prefix's own listing
                // mtimes, the oldest of which stands in for "created-at".
                Err(_) => {
                    let backup_prefix = keys::backup_prefix(&self.prefix, database_id, &backup_id);
                    let own_entries = self.blobstore.list(&backup_prefix).await.unwrap_or_default();
                    own_entries.iter().map(|e| e.mtime).min().unwrap_or(now)
                }
            };

            if created_at_epoch > cutoff {
                continue;
            }

            let backup_prefix = keys::backup_prefix(&self.prefix, database_id, &backup_id);
            let own_entries = self.blobstore.list(&backup_prefix).await.context("listing incomplete backup's own keys")?;
            for entry in own_entries {
                self.blobstore.delete(&entry.key).await.context("deleting incomplete backup key")?;
            }
            task_info!(ctx, "cleanup-incomplete: removed {} ({})", backup_id, database_id);
            cleaned.push(backup_id);
        }

        Ok(CleanupResult {
            success: true,
            cleaned_count: cleaned.len() as u64,
            backup_ids: cleaned,
            error: None,
        })
    }

    /// Drives a live migration to `ready-to-finalize` and returns the
    /// router (spec §4.6); callers route ongoing writes through it and call
    /// `finalize` once ready to cut over.
    pub async fn live_migrate(
        &self,
        source: Arc<dyn DatalogSource>,
        target: Arc<dyn DatalogSource>,
        options: &LiveMigrateOptions,
        ctx: Arc<dyn TaskContext>,
    ) -> Result<crate::migration::MigrationRouter, Error> {
        let backup_fn: BackupFn = Box::new(|source, blobstore, options, ctx| {
            Box::pin(async move { run_backup(source.as_ref(), blobstore.as_ref(), &options, ctx.as_ref()).await })
        });
        let restore_fn: RestoreFn = Box::new(|target, blobstore, backup_id, options, ctx| {
            Box::pin(async move { run_restore(target.as_ref(), blobstore.as_ref(), &backup_id, &options, ctx.as_ref(), None).await })
        });
        live_migrate(source, target, Arc::clone(&self.blobstore), options, &backup_fn, &restore_fn, ctx).await
    }

    /// Recovery (spec §4.6 Recovery): resumes whichever migration is active
    /// for `database_id`, regardless of which state it was in when the
    /// process last exited.
    pub async fn recover_migration(
        &self,
        source: Arc<dyn DatalogSource>,
        target: Arc<dyn DatalogSource>,
        database_id: &str,
        backup_dir: &str,
        ctx: Arc<dyn TaskContext>,
    ) -> Result<crate::migration::MigrationRouter, Error> {
        let backup_fn: BackupFn = Box::new(|source, blobstore, options, ctx| {
            Box::pin(async move { run_backup(source.as_ref(), blobstore.as_ref(), &options, ctx.as_ref()).await })
        });
        let restore_fn: RestoreFn = Box::new(|target, blobstore, backup_id, options, ctx| {
            Box::pin(async move { run_restore(target.as_ref(), blobstore.as_ref(), &backup_id, &options, ctx.as_ref(), None).await })
        });
        migration_recover(source, target, Arc::clone(&self.blobstore), database_id, backup_dir, &backup_fn, &restore_fn, ctx).await
    }
}

/// Finishes a migration router into a [`MigrationResult`] (spec §4.6 step
/// 9): stops capture, drains the log, persists `completed`.
pub async fn finalize_migration(router: &crate::migration::MigrationRouter, ctx: &dyn TaskContext) -> Result<MigrationResult, Error> {
    router.finalize(ctx).await
}
