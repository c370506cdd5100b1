//! Atomic aggregate stats record, updated safely by parallel chunk workers
//! (spec §4.3 step 5e / §5). Grounded on `pbs_client::backup_writer`'s use
//! of `AtomicU64`/`AtomicUsize` for concurrent upload counters.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;

use std::collections::BTreeSet;

#[derive(Default)]
pub struct AggregateStats {
    pub datom_count: AtomicU64,
    pub chunk_count: AtomicU64,
    pub size_bytes: AtomicU64,
    pub max_eid: AtomicI64,
    pub max_tx: AtomicI64,
    pub min_tx: AtomicI64,
    completed_chunks: Mutex<BTreeSet<u64>>,
}

impl AggregateStats {
    pub fn new() -> Self {
        let stats = Self::default();
        stats.min_tx.store(i64::MAX, Ordering::Relaxed);
        stats
    }

    /// Applied once per completed chunk; safe under concurrent callers.
    pub fn record_chunk(&self, id: u64, datom_count: u64, size_bytes: u64, min_tx: i64, max_tx: i64, max_eid: i64) {
        self.datom_count.fetch_add(datom_count, Ordering::SeqCst);
        self.chunk_count.fetch_add(1, Ordering::SeqCst);
        self.size_bytes.fetch_add(size_bytes, Ordering::SeqCst);
        fetch_max(&self.max_eid, max_eid);
        fetch_max(&self.max_tx, max_tx);
        fetch_min(&self.min_tx, min_tx);
        self.completed_chunks.lock().unwrap().insert(id);
    }

    pub fn completed_chunks(&self) -> BTreeSet<u64> {
        self.completed_chunks.lock().unwrap().clone()
    }

    pub fn snapshot(&self) -> (u64, u64, u64, i64, i64, i64) {
        (
            self.datom_count.load(Ordering::SeqCst),
            self.chunk_count.load(Ordering::SeqCst),
            self.size_bytes.load(Ordering::SeqCst),
            self.min_tx.load(Ordering::SeqCst),
            self.max_tx.load(Ordering::SeqCst),
            self.max_eid.load(Ordering::SeqCst),
        )
    }
}

fn fetch_max(cell: &AtomicI64, value: i64) {
    let mut current = cell.load(Ordering::SeqCst);
    while value > current {
        match cell.compare_exchange_weak(current, value, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => break,
            Err(actual) => current = actual,
        }
    }
}

fn fetch_min(cell: &AtomicI64, value: i64) {
    let mut current = cell.load(Ordering::SeqCst);
    while value < current {
        match cell.compare_exchange_weak(current, value, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => break,
            Err(actual) => current = actual,
        }
    }
}
