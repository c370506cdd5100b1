//! Live migration coordinator (spec §4.6): backup, restore, replay, and a
//! write router that hands off from source to target at cutover.

mod coordinator;
mod log;
mod router;

pub use coordinator::{live_migrate, recover, BackupFn, RestoreFn};
pub use log::LogEntry;
pub use router::MigrationRouter;

use crate::metadata::migration_manifest::MigrationState;

#[derive(Debug, Clone)]
pub struct LiveMigrateOptions {
    pub migration_id: Option<String>,
    pub database_id: String,
    pub backup_dir: String,
    pub verify_transactions: bool,
}

impl LiveMigrateOptions {
    pub fn new(database_id: impl Into<String>, backup_dir: impl Into<String>) -> Self {
        LiveMigrateOptions {
            migration_id: None,
            database_id: database_id.into(),
            backup_dir: backup_dir.into(),
            verify_transactions: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MigrationResult {
    pub success: bool,
    pub migration_id: String,
    pub state: MigrationState,
    pub transactions_applied: u64,
    pub error: Option<String>,
}
