//! The write router (spec §4.6 steps 7-9): routes transactions to the
//! source pre-cutover and to the target post-cutover, and finalizes the
//! migration by draining any un-applied log entries into the target.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Error};

use crate::blobstore::BlobStore;
use crate::datom::{DatomTuple, TxId};
use crate::metadata::migration_manifest::MigrationState;
use crate::metadata::to_pretty_text;
use crate::source::DatalogSource;
use crate::task::TaskContext;
use crate::task_info;

use super::log::{CaptureListener, TransactionLog, WriterHandle};
use super::MigrationResult;

/// A callable with two modes, matching spec §4.6: `route(tx)` applies a
/// transaction according to current phase, `finalize()` stops capture,
/// drains the log, and completes the migration.
pub struct MigrationRouter {
    pub(super) source: Arc<dyn DatalogSource>,
    pub(super) target: Arc<dyn DatalogSource>,
    pub(super) blobstore: Arc<dyn BlobStore>,
    pub(super) log: Arc<TransactionLog>,
    pub(super) listener: Mutex<Option<Arc<CaptureListener>>>,
    pub(super) writer: Mutex<Option<WriterHandle>>,
    pub(super) manifest_key: String,
    pub(super) migration_id: String,
    pub(super) finalized: AtomicBool,
    pub(super) transactions_applied: AtomicU64,
    /// `tx-id`s already applied to the target by a prior catch-up replay
    /// (spec §4.6 step 6), so `finalize` only drains the log's suffix past
    /// this set instead of re-replaying entries already applied.
    pub(super) applied_ids: Mutex<HashSet<TxId>>,
    pub(super) complete_callback: Mutex<Option<Box<dyn FnOnce(&MigrationResult) + Send>>>,
}

impl MigrationRouter {
    pub fn migration_id(&self) -> &str {
        &self.migration_id
    }

    /// Registers a callback invoked once `finalize` completes (spec §4.6
    /// step 9's `complete-callback`).
    pub fn on_complete(&self, callback: impl FnOnce(&MigrationResult) + Send + 'static) {
        *self.complete_callback.lock().unwrap() = Some(Box::new(callback));
    }

    /// Pre-cutover: apply to the source (capture also happens via the
    /// installed listener, so this duplicates into the log on purpose -
    /// defends against a listener gap per spec step 8); post-cutover: apply
    /// directly to the target.
    pub fn route(&self, tx_data: &[DatomTuple]) -> Result<TxId, Error> {
        if self.finalized.load(Ordering::SeqCst) {
            return self.target.transact(tx_data).context("routing post-cutover transaction to target");
        }
        let tx_id = self.source.transact(tx_data).context("routing transaction to source")?;
        self.log.append(super::log::LogEntry {
            tx_id,
            tx_data: tx_data.to_vec(),
            timestamp_ms: proxmox_time::epoch_i64() * 1000,
        });
        Ok(tx_id)
    }

    /// Stops capture and drains the log's **suffix** past whatever was
    /// already applied by an earlier catch-up replay (`drive_to_ready`) into
    /// the target, deduplicating by `tx-id` against that same
    /// already-applied set (since `route` can double-log a transaction
    /// already seen by the listener) - spec §4.6 steps 6 and 9. Persists
    /// `completed` and invokes the completion callback.
    pub async fn finalize(&self, ctx: &dyn TaskContext) -> Result<MigrationResult, Error> {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return Ok(MigrationResult {
                success: true,
                migration_id: self.migration_id.clone(),
                state: MigrationState::Completed,
                transactions_applied: self.transactions_applied(),
                error: None,
            });
        }

        if let Some(listener) = self.listener.lock().unwrap().take() {
            if let Some(writer) = self.writer.lock().unwrap().take() {
                writer.stop(listener);
            }
        }

        let mut applied_ids = self.applied_ids.lock().unwrap().clone();
        let mut applied = applied_ids.len() as u64;
        for entry in self.log.snapshot() {
            ctx.check_abort()?;
            if !applied_ids.insert(entry.tx_id) {
                continue;
            }
            self.target.transact(&entry.tx_data).context("draining migration log into target")?;
            applied += 1;
        }
        *self.applied_ids.lock().unwrap() = applied_ids;
        self.transactions_applied.store(applied, Ordering::SeqCst);

        if !self.manifest_key.is_empty() {
            let text = self.blobstore.get(&self.manifest_key).await.context("re-reading migration manifest before finalize")?;
            let mut manifest: crate::metadata::migration_manifest::MigrationManifest =
                crate::metadata::from_text(&String::from_utf8(text).context("migration manifest is not valid utf-8")?)?;
            manifest.state = MigrationState::Completed;
            manifest.stats.applied = applied;
            manifest.completed_at = Some(proxmox_time::epoch_to_rfc3339_utc(proxmox_time::epoch_i64()).unwrap_or_default());
            let rendered = to_pretty_text(&manifest)?;
            self.blobstore
                .put(&self.manifest_key, rendered.into_bytes(), "application/json", &[])
                .await
                .context("persisting completed migration manifest")?;
        }

        task_info!(ctx, "migration {}: finalized, {} transactions applied", self.migration_id, applied);

        let result = MigrationResult {
            success: true,
            migration_id: self.migration_id.clone(),
            state: MigrationState::Completed,
            transactions_applied: applied,
            error: None,
        };

        if let Some(callback) = self.complete_callback.lock().unwrap().take() {
            callback(&result);
        }

        Ok(result)
    }

    pub fn transactions_applied(&self) -> u64 {
        self.transactions_applied.load(Ordering::SeqCst)
    }
}
