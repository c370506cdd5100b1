//! Resumable mark-and-sweep GC (spec §4.5) over a content-addressed store.

mod engine;

pub use engine::{run_gc, GcEngine, GcPhase, GcStatus};

/// Which storage backend the content-addressed store sits on, used only to
/// pick default batch tuning (spec §4.5 "backend-tuned defaults").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    ObjectStore,
    Sql,
    LocalDirectory,
    Default,
}

impl StoreBackend {
    fn defaults(self) -> (usize, usize) {
        match self {
            StoreBackend::ObjectStore => (1000, 3),
            StoreBackend::Sql => (5000, 1),
            StoreBackend::LocalDirectory => (100, 10),
            StoreBackend::Default => (1000, 1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GcOptions {
    pub dry_run: bool,
    pub retention_days: i64,
    pub batch_size: Option<usize>,
    pub parallel_batches: Option<usize>,
    pub checkpoint_interval: u64,
    pub force_new: bool,
    pub backend: StoreBackend,
}

impl Default for GcOptions {
    fn default() -> Self {
        GcOptions {
            dry_run: true,
            retention_days: 7,
            batch_size: None,
            parallel_batches: None,
            checkpoint_interval: 1000,
            force_new: false,
            backend: StoreBackend::Default,
        }
    }
}

impl GcOptions {
    pub fn batch_tuning(&self) -> (usize, usize) {
        let (default_batch, default_parallel) = self.backend.defaults();
        (
            self.batch_size.unwrap_or(default_batch),
            self.parallel_batches.unwrap_or(default_parallel),
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct GcResult {
    pub success: bool,
    pub reachable_count: u64,
    pub deleted_count: Option<u64>,
    pub would_delete_count: Option<u64>,
    pub duration_ms: u64,
    pub resumed: bool,
    pub error: Option<String>,
}
