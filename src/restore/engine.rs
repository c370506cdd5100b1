//! Restore algorithm (spec §4.4): bounded-memory k-way merge over lazy
//! per-chunk streams. Grounded on `pbs_datastore`'s lazy `IndexFile` readers
//! ("pull on demand, don't materialize the whole index") and
//! `src/server/pull.rs`'s `.peekable()` iterator-merge idiom, generalized
//! from a 2-way pull/local diff into an explicit k-way priority queue.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use std::time::Instant;

use anyhow::{Context, Error};

use crate::blobstore::BlobStore;
use crate::codec::{checksum, decode_chunk, decompress};
use crate::datom::{Datom, DatomTuple, BUILTIN_TX_ID};
use crate::error::VaultError;
use crate::metadata::from_text;
use crate::metadata::manifest::{ChunkDescriptor, Manifest};
use crate::source::DatalogSource;
use crate::task::TaskContext;
use crate::task_info;

use super::merge::compare_datoms;
use super::{RestoreOptions, RestoreProgress, RestoreResult, RestoreStage, LOAD_BATCH_SIZE};

struct ChunkStream {
    descriptor: ChunkDescriptor,
    buffer: VecDeque<Datom>,
    loaded: bool,
}

impl ChunkStream {
    fn new(descriptor: ChunkDescriptor) -> Self {
        ChunkStream {
            descriptor,
            buffer: VecDeque::new(),
            loaded: false,
        }
    }

    async fn ensure_loaded(
        &mut self,
        blobstore: &dyn BlobStore,
        compression: crate::codec::Compression,
        verify_checksums: bool,
    ) -> Result<(), Error> {
        if self.loaded {
            return Ok(());
        }
        let bytes = blobstore
            .get(&self.descriptor.storage_key)
            .await
            .with_context(|| format!("fetching chunk {}", self.descriptor.id))?;

        if verify_checksums {
            let actual = checksum(&bytes);
            if actual != self.descriptor.checksum {
                return Err(VaultError::ChecksumMismatch {
                    chunk_id: self.descriptor.id,
                    expected: self.descriptor.checksum.clone(),
                    actual,
                }
                .into());
            }
        }

        let decompressed = decompress(&bytes, compression)?;
        let record = decode_chunk(&decompressed)?;
        self.buffer = record
            .datoms
            .into_iter()
            .filter(|d| d.tx != BUILTIN_TX_ID)
            .collect();
        self.loaded = true;
        Ok(())
    }
}

/// Heap entry: either the next (already-decoded) datom of one chunk stream,
/// or a not-yet-loaded stream represented by a conservative lower-bound
/// sentinel derived from its chunk's `tx-range` alone. Since the merge
/// comparator orders primarily by `tx`, a sentinel with `tx = tx_range.0`
/// and the smallest possible tie-break fields never sorts after that
/// chunk's true first datom, so chunks can sit in the heap undecoded until
/// they actually reach the front of the merge (spec §4.4: "pull on demand,
/// don't materialize the whole chunk list").
struct HeapEntry {
    key: Datom,
    stream_index: usize,
    resolved: bool,
}

impl HeapEntry {
    fn sentinel(stream_index: usize, min_tx: i64) -> Self {
        HeapEntry {
            key: Datom::new(i64::MIN, crate::datom::TX_INSTANT_ATTR, crate::datom::Value::Bool(false), min_tx, false),
            stream_index,
            resolved: false,
        }
    }

    fn resolved(datom: Datom, stream_index: usize) -> Self {
        HeapEntry {
            key: datom,
            stream_index,
            resolved: true,
        }
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        compare_datoms(&self.key, &other.key) == Ordering::Equal
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_datoms(&self.key, &other.key)
    }
}

fn fold_aggregate_ids(descriptors: &[ChunkDescriptor]) -> (i64, i64) {
    let max_eid = descriptors.iter().map(|c| c.max_eid).max().unwrap_or(0);
    let max_tx = descriptors
        .iter()
        .filter_map(|c| c.tx_range.map(|(_, max)| max))
        .max()
        .unwrap_or(0);
    (max_eid, max_tx)
}

pub async fn run_restore(
    target: &dyn DatalogSource,
    blobstore: &dyn BlobStore,
    backup_id: &str,
    options: &RestoreOptions,
    ctx: &dyn TaskContext,
    progress_fn: Option<&(dyn Fn(RestoreProgress) + Sync)>,
) -> RestoreResult {
    let start = Instant::now();
    match run_restore_inner(target, blobstore, backup_id, options, ctx, progress_fn).await {
        Ok(mut result) => {
            result.duration_ms = start.elapsed().as_millis() as u64;
            result
        }
        Err(err) => {
            if let Some(f) = progress_fn {
                f(RestoreProgress {
                    stage: RestoreStage::Failed,
                    datoms_restored: 0,
                    chunks_processed: 0,
                });
            }
            RestoreResult {
                success: false,
                backup_id: backup_id.to_string(),
                datoms_restored: 0,
                chunks_processed: 0,
                duration_ms: start.elapsed().as_millis() as u64,
                error: Some(err.to_string()),
            }
        }
    }
}

async fn run_restore_inner(
    target: &dyn DatalogSource,
    blobstore: &dyn BlobStore,
    backup_id: &str,
    options: &RestoreOptions,
    ctx: &dyn TaskContext,
    progress_fn: Option<&(dyn Fn(RestoreProgress) + Sync)>,
) -> Result<RestoreResult, Error> {
    let report = |stage: RestoreStage, datoms: u64, chunks: u64| {
        if let Some(f) = progress_fn {
            f(RestoreProgress {
                stage,
                datoms_restored: datoms,
                chunks_processed: chunks,
            });
        }
    };
    report(RestoreStage::Started, 0, 0);

    let manifest_key = crate::blobstore::keys::manifest_key(&options.prefix, &options.database_id, backup_id);
    let manifest_bytes = blobstore.get(&manifest_key).await.context("fetching manifest")?;
    let manifest_text = String::from_utf8(manifest_bytes).context("manifest is not valid utf-8")?;
    let manifest: Manifest = from_text(&manifest_text).context("parsing manifest")?;

    task_info!(ctx, "restoring backup {} ({} chunks)", backup_id, manifest.chunks.len());

    let mut streams: Vec<ChunkStream> = manifest.chunks.iter().cloned().map(ChunkStream::new).collect();
    let mut heap: BinaryHeap<Reverse<HeapEntry>> = BinaryHeap::new();

    report(RestoreStage::Downloading, 0, 0);
    // Seed the heap without decoding any chunk whose tx-range is already
    // known: a sentinel lower-bound is enough to place it correctly until
    // it's actually the merge's current minimum. Only chunks without a
    // known tx-range (spec's own Open Question fallback) must be decoded
    // up front to discover their range.
    for (i, stream) in streams.iter_mut().enumerate() {
        ctx.check_abort()?;
        match stream.descriptor.tx_range {
            Some((min_tx, _)) => heap.push(Reverse(HeapEntry::sentinel(i, min_tx))),
            None => {
                stream
                    .ensure_loaded(blobstore, manifest.compression, options.verify_checksums)
                    .await?;
                if let Some(front) = stream.buffer.front() {
                    heap.push(Reverse(HeapEntry::resolved(front.clone(), i)));
                }
            }
        }
    }
    report(RestoreStage::Processed, 0, streams.len() as u64);

    let mut batch: Vec<DatomTuple> = Vec::with_capacity(LOAD_BATCH_SIZE);
    let mut total_restored: u64 = 0;

    while let Some(Reverse(entry)) = heap.pop() {
        ctx.check_abort()?;

        if !entry.resolved {
            let stream = &mut streams[entry.stream_index];
            stream
                .ensure_loaded(blobstore, manifest.compression, options.verify_checksums)
                .await?;
            if let Some(front) = stream.buffer.front() {
                heap.push(Reverse(HeapEntry::resolved(front.clone(), entry.stream_index)));
            }
            continue;
        }

        let stream = &mut streams[entry.stream_index];
        let datom = stream.buffer.pop_front().expect("heap entry implies a buffered datom");
        batch.push((&datom).into());
        total_restored += 1;

        if let Some(next) = stream.buffer.front() {
            heap.push(Reverse(HeapEntry::resolved(next.clone(), entry.stream_index)));
        }

        if batch.len() >= LOAD_BATCH_SIZE {
            report(RestoreStage::Transacting, total_restored, streams.len() as u64);
            target.load_entities(&batch).context("bulk-loading batch")?;
            report(RestoreStage::LoadingEntities, total_restored, streams.len() as u64);
            batch.clear();
        }
    }

    if !batch.is_empty() {
        report(RestoreStage::Transacting, total_restored, streams.len() as u64);
        target.load_entities(&batch).context("bulk-loading final batch")?;
        report(RestoreStage::LoadingEntities, total_restored, streams.len() as u64);
    }

    let (fallback_max_eid, fallback_max_tx) = fold_aggregate_ids(&manifest.chunks);
    let max_eid = manifest.stats.max_eid.unwrap_or(fallback_max_eid);
    let max_tx = manifest.stats.max_tx.unwrap_or(fallback_max_tx);
    target.set_max_ids(max_eid, max_tx).context("setting target max-eid/max-tx")?;

    report(RestoreStage::Completed, total_restored, streams.len() as u64);
    task_info!(ctx, "restore {} complete: {} datoms", backup_id, total_restored);

    Ok(RestoreResult {
        success: true,
        backup_id: backup_id.to_string(),
        datoms_restored: total_restored,
        chunks_processed: streams.len() as u64,
        duration_ms: 0,
        error: None,
    })
}
