//! Migration manifest record (spec §3/§4.6).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MigrationState {
    Initializing,
    Backup,
    Restore,
    CatchingUp,
    ReadyToFinalize,
    Completed,
    Failed,
    Archived,
}

impl MigrationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MigrationState::Completed | MigrationState::Failed | MigrationState::Archived
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MigrationStats {
    pub captured: u64,
    pub applied: u64,
    pub pending: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationManifest {
    #[serde(rename = "migration-id")]
    pub migration_id: String,
    pub state: MigrationState,
    #[serde(rename = "source-config")]
    pub source_config: String,
    #[serde(rename = "target-config")]
    pub target_config: String,
    #[serde(rename = "database-id")]
    pub database_id: String,
    #[serde(rename = "started-at")]
    pub started_at: String,
    #[serde(rename = "completed-at", skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(rename = "archived-at", skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<String>,
    #[serde(rename = "initial-backup-id", skip_serializing_if = "Option::is_none")]
    pub initial_backup_id: Option<String>,
    #[serde(rename = "transaction-log-path")]
    pub transaction_log_path: String,
    #[serde(rename = "last-applied-tx", skip_serializing_if = "Option::is_none")]
    pub last_applied_tx: Option<i64>,
    pub stats: MigrationStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MigrationManifest {
    pub fn new(
        migration_id: String,
        source_config: String,
        target_config: String,
        database_id: String,
        started_at: String,
        transaction_log_path: String,
    ) -> Self {
        MigrationManifest {
            migration_id,
            state: MigrationState::Initializing,
            source_config,
            target_config,
            database_id,
            started_at,
            completed_at: None,
            archived_at: None,
            initial_backup_id: None,
            transaction_log_path,
            last_applied_tx: None,
            stats: MigrationStats::default(),
            error: None,
            extra: Map::new(),
        }
    }
}
