//! Streaming backup algorithm (spec §4.3). Grounded on
//! `pbs_client::backup_writer::BackupWriter`'s upload pipeline (`futures`
//! join-point batching over `tokio::spawn`'d uploads) and
//! `src/tools/parallel_handler.rs`'s "any worker exception cancels peers"
//! structured-concurrency shape (DESIGN NOTES: "Future + @deref batch
//! coordination").

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Error};

use crate::blobstore::{keys, BlobStore};
use crate::codec::{checksum, compress, encode_chunk, ChunkRecord};
use crate::datom::Datom;
use crate::metadata::checkpoint::Checkpoint;
use crate::metadata::manifest::{ChunkDescriptor, Manifest};
use crate::metadata::to_pretty_text;
use crate::source::DatalogSource;
use crate::task::TaskContext;
use crate::task_info;
use crate::util::{generate_backup_id, HumanByte};

use super::chunker::{datoms_per_chunk, take_chunk};
use super::stats::AggregateStats;
use super::{BackupOptions, BackupResult};

struct ChunkOutcome {
    descriptor: ChunkDescriptor,
    min_tx: i64,
    max_tx: i64,
    max_eid: i64,
    datom_count: u64,
}

async fn process_chunk(
    blobstore: &dyn BlobStore,
    options: &BackupOptions,
    backup_id: &str,
    id: u64,
    datoms: Vec<Datom>,
) -> Result<ChunkOutcome, Error> {
    let datom_count = datoms.len() as u64;
    let min_tx = datoms.iter().map(|d| d.tx).min().unwrap_or(0);
    let max_tx = datoms.iter().map(|d| d.tx).max().unwrap_or(0);
    let max_eid = datoms.iter().map(|d| d.e).max().unwrap_or(0);

    let record = ChunkRecord::new(id, datoms);
    let encoded = encode_chunk(&record)?;
    let compressed = compress(&encoded, options.compression)?;
    let sum = checksum(&compressed);
    let size_bytes = compressed.len() as u64;

    let key = keys::chunk_key(
        &options.prefix,
        &options.database_id,
        backup_id,
        id,
        options.compression.extension(),
    );
    blobstore
        .put(&key, compressed, "application/octet-stream", &[])
        .await
        .with_context(|| format!("uploading chunk {}", id))?;

    Ok(ChunkOutcome {
        descriptor: ChunkDescriptor {
            id,
            tx_range: Some((min_tx, max_tx)),
            max_eid,
            datom_count,
            size_bytes,
            checksum: sum,
            storage_key: key,
            etag: None,
        },
        min_tx,
        max_tx,
        max_eid,
        datom_count,
    })
}

async fn persist_checkpoint(
    blobstore: &dyn BlobStore,
    options: &BackupOptions,
    backup_id: &str,
    checkpoint: &Checkpoint,
) -> Result<(), Error> {
    let key = keys::checkpoint_key(&options.prefix, &options.database_id, backup_id);
    let text = to_pretty_text(checkpoint)?;
    blobstore
        .put(&key, text.into_bytes(), "application/json", &[])
        .await
}

/// Runs a full backup (spec §4.3). `source` supplies the lazy, once-traversable
/// snapshot; `blobstore` is the destination.
pub async fn run_backup(
    source: &dyn DatalogSource,
    blobstore: &dyn BlobStore,
    options: &BackupOptions,
    ctx: &dyn TaskContext,
) -> BackupResult {
    let start = Instant::now();
    match run_backup_inner(source, blobstore, options, ctx).await {
        Ok(mut result) => {
            result.duration_ms = start.elapsed().as_millis() as u64;
            result
        }
        Err(err) => BackupResult {
            success: false,
            backup_id: String::new(),
            datom_count: 0,
            chunk_count: 0,
            max_eid: 0,
            max_tx: 0,
            total_size_bytes: 0,
            duration_ms: start.elapsed().as_millis() as u64,
            path: String::new(),
            error: Some(err.to_string()),
        },
    }
}

async fn run_backup_inner(
    source: &dyn DatalogSource,
    blobstore: &dyn BlobStore,
    options: &BackupOptions,
    ctx: &dyn TaskContext,
) -> Result<BackupResult, Error> {
    let backup_id = generate_backup_id()?;
    let started_at = proxmox_time::epoch_to_rfc3339_utc(proxmox_time::epoch_i64())
        .unwrap_or_else(|_| backup_id.clone());
    task_info!(ctx, "starting backup {} for database {}", backup_id, options.database_id);

    let mut snapshot = source.snapshot()?;
    let per_chunk = datoms_per_chunk(options.chunk_size_bytes, options.bytes_per_datom_estimate);

    let stats = Arc::new(AggregateStats::new());

    let mut checkpoint = Checkpoint::new("backup", &backup_id, &started_at);
    persist_checkpoint(blobstore, options, &backup_id, &checkpoint).await?;

    let mut descriptors: Vec<ChunkDescriptor> = Vec::new();
    let mut next_id: u64 = 0;
    let mut exhausted = false;

    while !exhausted {
        ctx.check_abort()?;
        let mut batch_ids = Vec::new();
        for _ in 0..options.parallel {
            let chunk_datoms = take_chunk(snapshot.as_mut(), per_chunk)?;
            if chunk_datoms.is_empty() {
                exhausted = true;
                break;
            }
            let is_short = chunk_datoms.len() < per_chunk;
            batch_ids.push((next_id, chunk_datoms));
            next_id += 1;
            if is_short {
                exhausted = true;
                break;
            }
        }
        if batch_ids.is_empty() {
            break;
        }

        // Structured concurrency join point: any worker error aborts the
        // whole batch rather than silently continuing with partial results.
        let futures_iter = batch_ids
            .into_iter()
            .map(|(id, datoms)| process_chunk(blobstore, options, &backup_id, id, datoms));
        let results = futures::future::join_all(futures_iter).await;

        for result in results {
            let outcome = result?;
            stats.record_chunk(
                outcome.descriptor.id,
                outcome.datom_count,
                outcome.descriptor.size_bytes,
                outcome.min_tx,
                outcome.max_tx,
                outcome.max_eid,
            );
            descriptors.push(outcome.descriptor);
        }

        let (_, chunk_count, _, _, _, _) = stats.snapshot();
        checkpoint.completed_chunks = stats.completed_chunks();
        checkpoint.current_chunk = Some(chunk_count.saturating_sub(1));
        checkpoint.updated_at = started_at.clone();
        persist_checkpoint(blobstore, options, &backup_id, &checkpoint).await?;
        task_info!(ctx, "backup {}: {} chunks written", backup_id, chunk_count);
    }

    let (datom_count, chunk_count, size_bytes, min_tx, max_tx, max_eid) = stats.snapshot();

    let mut manifest = Manifest::new(
        backup_id.clone(),
        options.database_id.clone(),
        options.compression,
        started_at.clone(),
    );
    manifest.chunks = descriptors;
    manifest.finalize_chunk_order();
    manifest.stats.datom_count = datom_count;
    manifest.stats.chunk_count = chunk_count;
    manifest.stats.size_bytes = size_bytes;
    manifest.stats.max_eid = Some(max_eid);
    manifest.stats.max_tx = Some(max_tx);
    manifest.stats.tx_range = if chunk_count > 0 { Some((min_tx, max_tx)) } else { None };
    manifest.completed = true;
    manifest.timing.backup_completed = proxmox_time::epoch_to_rfc3339_utc(proxmox_time::epoch_i64()).ok();

    manifest.validate_chunk_ordering().context("validating manifest before persisting")?;

    let manifest_key = keys::manifest_key(&options.prefix, &options.database_id, &backup_id);
    let manifest_text = to_pretty_text(&manifest)?;
    blobstore
        .put(&manifest_key, manifest_text.into_bytes(), "application/json", &[])
        .await
        .context("writing manifest")?;

    // The completion marker is the commit point (spec §4.3 step 6 / §8
    // invariant 10): a backup without it is incomplete.
    let marker_key = keys::complete_marker_key(&options.prefix, &options.database_id, &backup_id);
    blobstore
        .put(&marker_key, crate::metadata::manifest::COMPLETE_MARKER_BYTES.to_vec(), "application/octet-stream", &[])
        .await
        .context("writing completion marker")?;

    task_info!(
        ctx,
        "backup {} complete: {} datoms in {} chunks, {}",
        backup_id,
        datom_count,
        chunk_count,
        HumanByte::from(size_bytes)
    );

    Ok(BackupResult {
        success: true,
        backup_id: backup_id.clone(),
        datom_count,
        chunk_count,
        max_eid,
        max_tx,
        total_size_bytes: size_bytes,
        duration_ms: 0,
        path: keys::backup_prefix(&options.prefix, &options.database_id, &backup_id),
        error: None,
    })
}
