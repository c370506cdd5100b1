//! Backup/restore checkpoint record (spec §3/§6): mutable progress record,
//! overwritten in place during a run, deleted (or superseded) on success.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(rename = "checkpoint/version")]
    pub version: String,
    #[serde(rename = "checkpoint/operation")]
    pub operation: String,
    #[serde(rename = "checkpoint/backup-id")]
    pub backup_id: String,
    #[serde(rename = "checkpoint/started-at")]
    pub started_at: String,
    #[serde(rename = "checkpoint/updated-at")]
    pub updated_at: String,
    #[serde(rename = "progress/total-chunks", skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u64>,
    #[serde(rename = "progress/completed")]
    pub completed: bool,
    #[serde(rename = "progress/current-chunk", skip_serializing_if = "Option::is_none")]
    pub current_chunk: Option<u64>,
    #[serde(rename = "state/completed-chunks")]
    pub completed_chunks: BTreeSet<u64>,
    #[serde(rename = "state/failed-chunks", default)]
    pub failed_chunks: BTreeMap<u64, String>,
    #[serde(rename = "resume/retry-count")]
    pub retry_count: u32,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub const CHECKPOINT_FORMAT_VERSION: &str = "1.0.0";

impl Checkpoint {
    pub fn new(operation: &str, backup_id: &str, started_at: &str) -> Self {
        Checkpoint {
            version: CHECKPOINT_FORMAT_VERSION.to_string(),
            operation: operation.to_string(),
            backup_id: backup_id.to_string(),
            started_at: started_at.to_string(),
            updated_at: started_at.to_string(),
            total_chunks: None,
            completed: false,
            current_chunk: None,
            completed_chunks: BTreeSet::new(),
            failed_chunks: BTreeMap::new(),
            retry_count: 0,
            extra: Map::new(),
        }
    }
}
