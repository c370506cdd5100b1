//! Streaming chunked backup engine (spec §4.3).

mod chunker;
mod engine;
mod stats;

pub use chunker::DEFAULT_BYTES_PER_DATOM_ESTIMATE;
pub use engine::run_backup;

use crate::codec::Compression;

#[derive(Debug, Clone)]
pub struct BackupOptions {
    pub chunk_size_bytes: u64,
    pub bytes_per_datom_estimate: u64,
    pub compression: Compression,
    /// Number of chunks processed concurrently per batch (spec §4.3 step 5).
    pub parallel: usize,
    pub database_id: String,
    /// Key prefix under which this database's backups live (spec §6).
    pub prefix: String,
}

impl BackupOptions {
    pub fn new(database_id: impl Into<String>, prefix: impl Into<String>) -> Self {
        BackupOptions {
            chunk_size_bytes: 4 * 1024 * 1024,
            bytes_per_datom_estimate: DEFAULT_BYTES_PER_DATOM_ESTIMATE,
            compression: Compression::Gzip,
            parallel: 4,
            database_id: database_id.into(),
            prefix: prefix.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackupResult {
    pub success: bool,
    pub backup_id: String,
    pub datom_count: u64,
    pub chunk_count: u64,
    pub max_eid: i64,
    pub max_tx: i64,
    pub total_size_bytes: u64,
    pub duration_ms: u64,
    pub path: String,
    pub error: Option<String>,
}
