//! Mark and sweep phases (spec §4.5). Grounded on
//! `pbs_datastore::datastore::{mark_used_chunks, garbage_collection}` for the
//! two-phase shape and `chunk_store.rs::sweep_unused_chunks`'s atime-cutoff
//! computation, generalized from "oldest chunk-store writer" to a retention
//! window over commit timestamps. The batched parallel delete reuses
//! `src/tools/parallel_handler.rs::ParallelHandler`'s bounded worker-pool idiom
//! via scoped threads, since the store reference isn't `'static`.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Error};
use crossbeam_channel::bounded;

use crate::metadata::gc_checkpoint::GcCheckpoint;
use crate::metadata::{from_text, to_pretty_text};
use crate::source::{Commit, ContentAddressedStore, MarkResult};
use crate::task::TaskContext;
use crate::task_info;

use super::{GcOptions, GcResult};

const CHECKPOINT_PERIOD: Duration = Duration::from_secs(30);

fn in_retention_range(commit: &Commit, now_ms: i64, retention_days: i64) -> bool {
    let cutoff = now_ms - retention_days * 24 * 3600 * 1000;
    commit.timestamp_ms > cutoff
}

struct MarkState {
    checkpoint: GcCheckpoint,
    since_persist: u64,
    last_persist: Instant,
}

impl MarkState {
    fn maybe_persist(
        &mut self,
        store: &dyn ContentAddressedStore,
        checkpoint_interval: u64,
        force: bool,
    ) -> Result<(), Error> {
        if !force
            && self.since_persist < checkpoint_interval
            && self.last_persist.elapsed() < CHECKPOINT_PERIOD
        {
            return Ok(());
        }
        self.checkpoint.last_checkpoint = proxmox_time::epoch_to_rfc3339_utc(proxmox_time::epoch_i64())
            .unwrap_or_default();
        let text = to_pretty_text(&self.checkpoint)?;
        store.write_gc_checkpoint(text.as_bytes())?;
        self.since_persist = 0;
        self.last_persist = Instant::now();
        Ok(())
    }
}

fn walk_branch(
    store: &dyn ContentAddressedStore,
    head: &str,
    now_ms: i64,
    options: &GcOptions,
    state: &mut MarkState,
    ctx: &dyn TaskContext,
) -> Result<(), Error> {
    let mut stack: VecDeque<String> = VecDeque::new();
    stack.push_back(head.to_string());

    while let Some(key) = stack.pop_back() {
        ctx.check_abort()?;
        if state.checkpoint.visited.contains(&key) {
            continue;
        }
        state.checkpoint.visited.insert(key.clone());
        state.checkpoint.stats.visited_count += 1;

        let commit = store.commit(&key).with_context(|| format!("reading commit {key}"))?;

        if in_retention_range(&commit, now_ms, options.retention_days) {
            if state.checkpoint.reachable.insert(key.clone()) {
                state.checkpoint.stats.reachable_count += 1;
            }
            for root in &commit.index_roots {
                match store.mark(root).with_context(|| format!("marking index root {root}"))? {
                    MarkResult::Reachable(keys) => {
                        for k in keys {
                            if state.checkpoint.reachable.insert(k) {
                                state.checkpoint.stats.reachable_count += 1;
                            }
                        }
                    }
                    MarkResult::NotReady => {}
                }
            }
            for parent in &commit.parents {
                if !state.checkpoint.visited.contains(parent) {
                    stack.push_back(parent.clone());
                }
            }
        }

        state.since_persist += 1;
        state.checkpoint.current_branch = Some(head.to_string());
        state.maybe_persist(store, options.checkpoint_interval, false)?;
    }

    Ok(())
}

fn run_mark(
    store: &dyn ContentAddressedStore,
    options: &GcOptions,
    ctx: &dyn TaskContext,
) -> Result<(BTreeSet<String>, bool), Error> {
    if options.force_new {
        store.delete_gc_checkpoint()?;
    }

    let now_ms = proxmox_time::epoch_i64() * 1000;
    let branches = store.branches()?;

    let (checkpoint, resumed) = match store.read_gc_checkpoint()? {
        Some(bytes) => {
            let text = String::from_utf8(bytes).context("gc checkpoint is not valid utf-8")?;
            let checkpoint: GcCheckpoint = from_text(&text).context("parsing gc checkpoint")?;
            task_info!(ctx, "gc {}: resuming existing checkpoint", checkpoint.gc_id);
            (checkpoint, true)
        }
        None => {
            let gc_id = proxmox_uuid::Uuid::generate().to_string();
            let started_at = proxmox_time::epoch_to_rfc3339_utc(proxmox_time::epoch_i64()).unwrap_or_default();
            let branch_names: Vec<String> = branches.iter().map(|(name, _)| name.clone()).collect();
            task_info!(ctx, "gc {}: starting new mark phase over {} branches", gc_id, branch_names.len());
            (GcCheckpoint::new(gc_id, started_at, branch_names), false)
        }
    };

    let mut state = MarkState {
        checkpoint,
        since_persist: 0,
        last_persist: Instant::now(),
    };

    let heads: std::collections::HashMap<String, String> = branches.into_iter().collect();

    while !state.checkpoint.all_branches_completed() {
        ctx.check_abort()?;
        let branch = state
            .checkpoint
            .pending_branches
            .iter()
            .next()
            .cloned()
            .expect("pending_branches non-empty by loop condition");

        if let Some(head) = heads.get(&branch) {
            if state.checkpoint.reachable.insert(head.clone()) {
                state.checkpoint.stats.reachable_count += 1;
            }
            walk_branch(store, head, now_ms, options, &mut state, ctx)?;
        }

        state.checkpoint.pending_branches.remove(&branch);
        state.checkpoint.completed_branches.insert(branch.clone());
        state.checkpoint.current_branch = None;
        state.maybe_persist(store, options.checkpoint_interval, true)?;
        task_info!(ctx, "gc {}: branch {} complete", state.checkpoint.gc_id, branch);
    }

    Ok((state.checkpoint.reachable, resumed))
}

fn delete_batches_parallel(
    store: &dyn ContentAddressedStore,
    batches: Vec<Vec<String>>,
    parallel_batches: usize,
) -> Result<u64, Error> {
    let deleted = std::sync::atomic::AtomicU64::new(0);
    let first_error: std::sync::Mutex<Option<Error>> = std::sync::Mutex::new(None);

    std::thread::scope(|scope| {
        let (tx, rx) = bounded::<Vec<String>>(parallel_batches);
        let rx = &rx;
        let deleted = &deleted;
        let first_error = &first_error;

        let mut workers = Vec::new();
        for _ in 0..parallel_batches.max(1) {
            workers.push(scope.spawn(move || {
                while let Ok(batch) = rx.recv() {
                    let count = batch.len() as u64;
                    if let Err(err) = store.delete_keys(&batch) {
                        let mut guard = first_error.lock().unwrap();
                        if guard.is_none() {
                            *guard = Some(err);
                        }
                        continue;
                    }
                    deleted.fetch_add(count, std::sync::atomic::Ordering::Relaxed);
                }
            }));
        }

        for batch in batches {
            if tx.send(batch).is_err() {
                break;
            }
        }
        drop(tx);

        for worker in workers {
            let _ = worker.join();
        }
    });

    if let Some(err) = first_error.into_inner().unwrap() {
        return Err(err);
    }
    Ok(deleted.load(std::sync::atomic::Ordering::Relaxed))
}

fn run_sweep(
    store: &dyn ContentAddressedStore,
    reachable: &BTreeSet<String>,
    options: &GcOptions,
    ctx: &dyn TaskContext,
) -> Result<(Option<u64>, Option<u64>), Error> {
    let ts = proxmox_time::epoch_i64();
    let checkpoint_key = store.gc_checkpoint_key();
    let reachable_set: HashSet<&str> = reachable.iter().map(|s| s.as_str()).collect();

    let all_keys = store.list_keys()?;
    let candidates: Vec<String> = all_keys
        .into_iter()
        .filter(|(key, last_write)| {
            key != &checkpoint_key && !reachable_set.contains(key.as_str()) && *last_write < ts
        })
        .map(|(key, _)| key)
        .collect();

    let (batch_size, parallel_batches) = options.batch_tuning();
    task_info!(
        ctx,
        "gc sweep: {} candidates, batch size {}, {} parallel batches",
        candidates.len(),
        batch_size,
        parallel_batches
    );

    if options.dry_run {
        return Ok((None, Some(candidates.len() as u64)));
    }

    let batches: Vec<Vec<String>> = candidates.chunks(batch_size.max(1)).map(|c| c.to_vec()).collect();
    let total_batches = batches.len();
    let mut done_batches = 0usize;
    let mut last_reported_decile = 0;
    let mut deleted_total = 0u64;

    for window in batches.chunks(parallel_batches.max(1)) {
        ctx.check_abort()?;
        deleted_total += delete_batches_parallel(store, window.to_vec(), parallel_batches)?;
        done_batches += window.len();
        let decile = (done_batches * 10 / total_batches.max(1)).min(10);
        if decile != last_reported_decile {
            last_reported_decile = decile;
            task_info!(ctx, "gc sweep: {}% complete ({} batches)", decile * 10, done_batches);
        }
    }

    Ok((Some(deleted_total), None))
}

pub fn run_gc(store: &dyn ContentAddressedStore, options: &GcOptions, ctx: &dyn TaskContext) -> GcResult {
    let start = Instant::now();
    match run_gc_inner(store, options, ctx, None) {
        Ok(mut result) => {
            result.duration_ms = start.elapsed().as_millis() as u64;
            result
        }
        Err(err) => GcResult {
            success: false,
            error: Some(err.to_string()),
            duration_ms: start.elapsed().as_millis() as u64,
            ..GcResult::default()
        },
    }
}

/// `status`, when given, is updated as each phase completes so a concurrent
/// `GcEngine::status()` call observes `resumed?` as soon as the mark phase
/// (which decides it) finishes, rather than only once the whole run is done.
fn run_gc_inner(
    store: &dyn ContentAddressedStore,
    options: &GcOptions,
    ctx: &dyn TaskContext,
    status: Option<&Mutex<GcStatus>>,
) -> Result<GcResult, Error> {
    let (reachable, resumed) = run_mark(store, options, ctx)?;
    if let Some(status) = status {
        let mut guard = status.lock().unwrap();
        guard.phase = GcPhase::Sweeping;
        guard.resumed = resumed;
        guard.reachable_so_far = reachable.len() as u64;
    }

    let (deleted_count, would_delete_count) = run_sweep(store, &reachable, options, ctx)?;

    if !options.dry_run {
        store.delete_gc_checkpoint().context("deleting gc checkpoint after successful sweep")?;
    }

    task_info!(ctx, "gc complete: {} reachable keys", reachable.len());

    Ok(GcResult {
        success: true,
        reachable_count: reachable.len() as u64,
        deleted_count,
        would_delete_count,
        duration_ms: 0,
        resumed,
        error: None,
    })
}

/// Which phase a `GcEngine` run is currently in, as observed through
/// `status()` without blocking on the run itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GcPhase {
    #[default]
    Idle,
    Marking,
    Sweeping,
    Done,
}

/// A point-in-time snapshot of a `GcEngine` run, grounded on
/// `pbs_datastore::datastore::DataStore`'s `last_gc_status`/
/// `garbage_collection_running` fields (spec §10.5).
#[derive(Debug, Clone, Default)]
pub struct GcStatus {
    pub running: bool,
    pub resumed: bool,
    pub phase: GcPhase,
    pub reachable_so_far: u64,
    pub result: Option<GcResult>,
}

/// Runs a GC pass on a dedicated thread and exposes its progress via
/// `status()`, which never blocks on the run (spec §8 scenario 5: a caller
/// needs to check whether a previously interrupted run resumed, and how far
/// it's gotten, without waiting for it to finish).
#[derive(Default)]
pub struct GcEngine {
    status: Arc<Mutex<GcStatus>>,
}

impl GcEngine {
    pub fn new() -> Self {
        GcEngine::default()
    }

    /// Non-blocking snapshot of the current (or most recently completed) run.
    pub fn status(&self) -> GcStatus {
        self.status.lock().unwrap().clone()
    }

    /// Spawns the mark/sweep run in the background; returns immediately.
    pub fn spawn(&self, store: Arc<dyn ContentAddressedStore>, options: GcOptions, ctx: Arc<dyn TaskContext>) {
        {
            let mut status = self.status.lock().unwrap();
            *status = GcStatus {
                running: true,
                phase: GcPhase::Marking,
                ..GcStatus::default()
            };
        }

        let status = Arc::clone(&self.status);
        std::thread::spawn(move || {
            let start = Instant::now();
            let result = match run_gc_inner(store.as_ref(), &options, ctx.as_ref(), Some(&status)) {
                Ok(mut result) => {
                    result.duration_ms = start.elapsed().as_millis() as u64;
                    result
                }
                Err(err) => GcResult {
                    success: false,
                    error: Some(err.to_string()),
                    duration_ms: start.elapsed().as_millis() as u64,
                    ..GcResult::default()
                },
            };

            let mut guard = status.lock().unwrap();
            guard.running = false;
            guard.phase = GcPhase::Done;
            guard.resumed = result.resumed;
            guard.reachable_so_far = result.reachable_count;
            guard.result = Some(result);
        });
    }
}
