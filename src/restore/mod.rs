//! K-way merge restore engine (spec §4.4).

mod engine;
mod merge;

pub use engine::run_restore;
pub use merge::compare_datoms;

pub const LOAD_BATCH_SIZE: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStage {
    Started,
    Downloading,
    Processed,
    Transacting,
    LoadingEntities,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct RestoreProgress {
    pub stage: RestoreStage,
    pub datoms_restored: u64,
    pub chunks_processed: u64,
}

#[derive(Debug, Clone)]
pub struct RestoreOptions {
    pub database_id: String,
    pub prefix: String,
    pub verify_checksums: bool,
}

impl RestoreOptions {
    pub fn new(database_id: impl Into<String>, prefix: impl Into<String>) -> Self {
        RestoreOptions {
            database_id: database_id.into(),
            prefix: prefix.into(),
            verify_checksums: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RestoreResult {
    pub success: bool,
    pub backup_id: String,
    pub datoms_restored: u64,
    pub chunks_processed: u64,
    pub duration_ms: u64,
    pub error: Option<String>,
}
