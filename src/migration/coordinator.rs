//! Migration algorithm (spec §4.6): identity resolution, backup, restore,
//! replay, and recovery. Takes the backup/restore engines as function-typed
//! dependencies (DESIGN NOTES: "cyclic conceptual dependency between
//! backup/restore and migration -> break with dependency inversion") so this
//! module never imports `crate::backup`/`crate::restore` directly.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Error};

use crate::backup::{BackupOptions, BackupResult};
use crate::blobstore::{keys, BlobStore};
use crate::error::VaultError;
use crate::metadata::migration_manifest::{MigrationManifest, MigrationState};
use crate::metadata::{from_text, to_pretty_text};
use crate::restore::{RestoreOptions, RestoreResult};
use crate::source::{DatalogSource, TransactionListener};
use crate::task::TaskContext;
use crate::task_info;

use super::log::{entries_from_text, CaptureListener, TransactionLog};
use super::router::MigrationRouter;
use super::LiveMigrateOptions;

pub type BackupFn = Box<
    dyn Fn(
            Arc<dyn DatalogSource>,
            Arc<dyn BlobStore>,
            BackupOptions,
            Arc<dyn TaskContext>,
        ) -> Pin<Box<dyn Future<Output = BackupResult> + Send>>
        + Send
        + Sync,
>;

pub type RestoreFn = Box<
    dyn Fn(
            Arc<dyn DatalogSource>,
            Arc<dyn BlobStore>,
            String,
            RestoreOptions,
            Arc<dyn TaskContext>,
        ) -> Pin<Box<dyn Future<Output = RestoreResult> + Send>>
        + Send
        + Sync,
>;

fn now_rfc3339() -> String {
    proxmox_time::epoch_to_rfc3339_utc(proxmox_time::epoch_i64()).unwrap_or_default()
}

async fn load_manifest(blobstore: &dyn BlobStore, key: &str) -> Result<MigrationManifest, Error> {
    let bytes = blobstore.get(key).await.context("fetching migration manifest")?;
    let text = String::from_utf8(bytes).context("migration manifest is not valid utf-8")?;
    from_text(&text).context("parsing migration manifest")
}

async fn persist_manifest(blobstore: &dyn BlobStore, key: &str, manifest: &MigrationManifest) -> Result<(), Error> {
    let text = to_pretty_text(manifest)?;
    blobstore.put(key, text.into_bytes(), "application/json", &[]).await.context("writing migration manifest")
}

async fn persist_log(blobstore: &dyn BlobStore, key: &str, log: &TransactionLog) -> Result<(), Error> {
    let text = log.to_text()?;
    blobstore.put(key, text.into_bytes(), "text/plain", &[]).await.context("writing migration log")
}

async fn find_active_migration(
    blobstore: &dyn BlobStore,
    backup_dir: &str,
    database_id: &str,
) -> Result<Option<MigrationManifest>, Error> {
    let prefix = keys::migration_prefix(backup_dir, database_id);
    let entries = blobstore.list(&prefix).await.context("listing migrations")?;
    for entry in entries {
        if !entry.key.ends_with("migration-manifest.json") {
            continue;
        }
        let manifest = load_manifest(blobstore, &entry.key).await?;
        if !manifest.state.is_terminal() {
            return Ok(Some(manifest));
        }
    }
    Ok(None)
}

fn pass_through_router(target: Arc<dyn DatalogSource>, blobstore: Arc<dyn BlobStore>, migration_id: String) -> MigrationRouter {
    MigrationRouter {
        source: Arc::clone(&target),
        target,
        blobstore,
        log: TransactionLog::new(),
        listener: Mutex::new(None),
        writer: Mutex::new(None),
        manifest_key: String::new(),
        migration_id,
        finalized: AtomicBool::new(true),
        transactions_applied: AtomicU64::new(0),
        applied_ids: Mutex::new(std::collections::HashSet::new()),
        complete_callback: Mutex::new(None),
    }
}

struct Env<'a> {
    source: Arc<dyn DatalogSource>,
    target: Arc<dyn DatalogSource>,
    blobstore: Arc<dyn BlobStore>,
    options: &'a LiveMigrateOptions,
    backup_fn: &'a BackupFn,
    restore_fn: &'a RestoreFn,
    ctx: Arc<dyn TaskContext>,
}

/// Runs (or resumes) the migration from whatever state `manifest` is
/// currently in, and returns the router once `ready-to-finalize` is reached.
async fn drive_to_ready(
    env: Env<'_>,
    mut manifest: MigrationManifest,
    log: Arc<TransactionLog>,
    listener: Option<Arc<CaptureListener>>,
    writer: Option<super::log::WriterHandle>,
) -> Result<MigrationRouter, Error> {
    let manifest_key = keys::migration_manifest_key(&env.options.backup_dir, &env.options.database_id, &manifest.migration_id);
    let log_key = manifest.transaction_log_path.clone();

    let backup_prefix = format!("{}/migrations/{}/backup", env.options.backup_dir, manifest.migration_id);

    if matches!(manifest.state, MigrationState::Initializing | MigrationState::Backup) {
        manifest.state = MigrationState::Backup;
        persist_manifest(env.blobstore.as_ref(), &manifest_key, &manifest).await?;
        let backup_options = BackupOptions::new(env.options.database_id.clone(), backup_prefix.clone());
        let result = (env.backup_fn)(
            Arc::clone(&env.source),
            Arc::clone(&env.blobstore),
            backup_options,
            Arc::clone(&env.ctx),
        )
        .await;
        if !result.success {
            manifest.state = MigrationState::Failed;
            manifest.error = result.error.clone();
            persist_manifest(env.blobstore.as_ref(), &manifest_key, &manifest).await?;
            return Err(VaultError::Logic(format!("migration backup phase failed: {}", result.error.unwrap_or_default())).into());
        }
        manifest.initial_backup_id = Some(result.backup_id);
    }

    let backup_id = manifest
        .initial_backup_id
        .clone()
        .ok_or_else(|| Error::from(VaultError::Logic("migration manifest missing initial-backup-id".to_string())))?;

    if matches!(manifest.state, MigrationState::Backup | MigrationState::Restore) {
        manifest.state = MigrationState::Restore;
        persist_manifest(env.blobstore.as_ref(), &manifest_key, &manifest).await?;

        if !env.target.exists(&env.options.database_id)? {
            env.target.create(&env.options.database_id)?;
        }

        let restore_options = RestoreOptions::new(env.options.database_id.clone(), backup_prefix.clone());
        let result = (env.restore_fn)(
            Arc::clone(&env.target),
            Arc::clone(&env.blobstore),
            backup_id,
            restore_options,
            Arc::clone(&env.ctx),
        )
        .await;
        if !result.success {
            manifest.state = MigrationState::Failed;
            manifest.error = result.error.clone();
            persist_manifest(env.blobstore.as_ref(), &manifest_key, &manifest).await?;
            return Err(VaultError::Logic(format!("migration restore phase failed: {}", result.error.unwrap_or_default())).into());
        }
    }

    manifest.state = MigrationState::CatchingUp;
    persist_manifest(env.blobstore.as_ref(), &manifest_key, &manifest).await?;

    // Replay captured entries, deduplicating by tx-id: the router also
    // appends to the log from inside `route()`, so a transaction captured
    // by the listener and then explicitly routed can appear twice (spec
    // Open Questions: "the replay path must therefore deduplicate").
    let mut applied_ids: std::collections::HashSet<i64> = std::collections::HashSet::new();
    let mut applied = 0u64;
    for entry in log.snapshot() {
        env.ctx.check_abort()?;
        if !applied_ids.insert(entry.tx_id) {
            continue;
        }
        env.target.transact(&entry.tx_data).context("replaying captured transaction into target")?;
        applied += 1;
    }
    manifest.stats.captured = log.len() as u64;
    manifest.stats.applied = applied;
    persist_log(env.blobstore.as_ref(), &log_key, &log).await?;

    manifest.state = MigrationState::ReadyToFinalize;
    persist_manifest(env.blobstore.as_ref(), &manifest_key, &manifest).await?;
    task_info!(env.ctx, "migration {} ready to finalize ({} transactions applied)", manifest.migration_id, applied);

    Ok(MigrationRouter {
        source: env.source,
        target: env.target,
        blobstore: env.blobstore,
        log,
        listener: Mutex::new(listener),
        writer: Mutex::new(writer),
        manifest_key,
        migration_id: manifest.migration_id,
        finalized: AtomicBool::new(false),
        transactions_applied: AtomicU64::new(applied),
        applied_ids: Mutex::new(applied_ids),
        complete_callback: Mutex::new(None),
    })
}

pub async fn live_migrate(
    source: Arc<dyn DatalogSource>,
    target: Arc<dyn DatalogSource>,
    blobstore: Arc<dyn BlobStore>,
    options: &LiveMigrateOptions,
    backup_fn: &BackupFn,
    restore_fn: &RestoreFn,
    ctx: Arc<dyn TaskContext>,
) -> Result<MigrationRouter, Error> {
    if let Some(id) = &options.migration_id {
        let manifest_key = keys::migration_manifest_key(&options.backup_dir, &options.database_id, id);
        if blobstore.head(&manifest_key).await? {
            let manifest = load_manifest(blobstore.as_ref(), &manifest_key).await?;
            match manifest.state {
                MigrationState::Completed | MigrationState::Archived => {
                    return Ok(pass_through_router(target, blobstore, manifest.migration_id));
                }
                MigrationState::Failed => {
                    return Err(VaultError::Logic(format!(
                        "migration {} previously failed: {}",
                        manifest.migration_id,
                        manifest.error.unwrap_or_default()
                    ))
                    .into());
                }
                _ => return resume_manifest(source, target, blobstore, options, manifest, backup_fn, restore_fn, ctx).await,
            }
        }
    }

    if find_active_migration(blobstore.as_ref(), &options.backup_dir, &options.database_id)
        .await?
        .is_some()
    {
        return Err(VaultError::Logic("another active migration is already in progress for this database".to_string()).into());
    }

    let migration_id = proxmox_uuid::Uuid::generate().to_string();
    let log_key = keys::migration_log_key(&options.backup_dir, &options.database_id, &migration_id);
    let manifest = MigrationManifest::new(
        migration_id.clone(),
        "source".to_string(),
        "target".to_string(),
        options.database_id.clone(),
        now_rfc3339(),
        log_key,
    );
    let manifest_key = keys::migration_manifest_key(&options.backup_dir, &options.database_id, &migration_id);
    persist_manifest(blobstore.as_ref(), &manifest_key, &manifest).await?;

    let log = TransactionLog::new();
    let (listener, writer) = CaptureListener::spawn(Arc::clone(&log));
    source
        .listen(Arc::clone(&listener) as Arc<dyn TransactionListener>)
        .context("installing migration capture listener")?;

    let env = Env {
        source,
        target,
        blobstore,
        options,
        backup_fn,
        restore_fn,
        ctx,
    };

    drive_to_ready(env, manifest, log, Some(listener), Some(writer)).await
}

async fn resume_manifest(
    source: Arc<dyn DatalogSource>,
    target: Arc<dyn DatalogSource>,
    blobstore: Arc<dyn BlobStore>,
    options: &LiveMigrateOptions,
    manifest: MigrationManifest,
    backup_fn: &BackupFn,
    restore_fn: &RestoreFn,
    ctx: Arc<dyn TaskContext>,
) -> Result<MigrationRouter, Error> {
    let log_key = manifest.transaction_log_path.clone();
    let existing_entries = match blobstore.get(&log_key).await {
        Ok(bytes) => {
            let text = String::from_utf8(bytes).context("migration log is not valid utf-8")?;
            entries_from_text(&text)?
        }
        Err(_) => Vec::new(),
    };
    let log = TransactionLog::from_entries(existing_entries);

    let (listener, writer) = CaptureListener::spawn(Arc::clone(&log));
    source
        .listen(Arc::clone(&listener) as Arc<dyn TransactionListener>)
        .context("reinstalling migration capture listener on resume")?;

    task_info!(ctx, "migration {}: resuming from state {:?}", manifest.migration_id, manifest.state);

    let env = Env {
        source,
        target,
        blobstore,
        options,
        backup_fn,
        restore_fn,
        ctx,
    };

    drive_to_ready(env, manifest, log, Some(listener), Some(writer)).await
}

/// `recover` (spec §4.6 Recovery): locates the active migration manifest and
/// resumes from whichever state it's in.
pub async fn recover(
    source: Arc<dyn DatalogSource>,
    target: Arc<dyn DatalogSource>,
    blobstore: Arc<dyn BlobStore>,
    database_id: &str,
    backup_dir: &str,
    backup_fn: &BackupFn,
    restore_fn: &RestoreFn,
    ctx: Arc<dyn TaskContext>,
) -> Result<MigrationRouter, Error> {
    let manifest = find_active_migration(blobstore.as_ref(), backup_dir, database_id)
        .await?
        .ok_or_else(|| Error::from(VaultError::Logic(format!("no active migration for database {database_id}"))))?;

    match manifest.state {
        MigrationState::Completed | MigrationState::Archived => Ok(pass_through_router(target, blobstore, manifest.migration_id)),
        MigrationState::Failed => Err(VaultError::Logic(format!(
            "migration {} previously failed: {}",
            manifest.migration_id,
            manifest.error.unwrap_or_default()
        ))
        .into()),
        _ => {
            let options = LiveMigrateOptions {
                migration_id: Some(manifest.migration_id.clone()),
                database_id: database_id.to_string(),
                backup_dir: backup_dir.to_string(),
                verify_transactions: false,
            };
            resume_manifest(source, target, blobstore, &options, manifest, backup_fn, restore_fn, ctx).await
        }
    }
}
