//! GC checkpoint record (spec §3/§4.5): persisted under a reserved key
//! inside the source store; at most one per store.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GcStats {
    pub reachable_count: u64,
    pub visited_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcCheckpoint {
    #[serde(rename = "gc-id")]
    pub gc_id: String,
    #[serde(rename = "started-at")]
    pub started_at: String,
    #[serde(rename = "last-checkpoint")]
    pub last_checkpoint: String,
    pub visited: BTreeSet<String>,
    pub reachable: BTreeSet<String>,
    #[serde(rename = "pending-branches")]
    pub pending_branches: BTreeSet<String>,
    #[serde(rename = "completed-branches")]
    pub completed_branches: BTreeSet<String>,
    #[serde(rename = "current-branch")]
    pub current_branch: Option<String>,
    pub stats: GcStats,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GcCheckpoint {
    pub fn new(gc_id: String, started_at: String, branches: Vec<String>) -> Self {
        GcCheckpoint {
            gc_id,
            started_at: started_at.clone(),
            last_checkpoint: started_at,
            visited: BTreeSet::new(),
            reachable: BTreeSet::new(),
            pending_branches: branches.into_iter().collect(),
            completed_branches: BTreeSet::new(),
            current_branch: None,
            stats: GcStats::default(),
            extra: Map::new(),
        }
    }

    pub fn all_branches_completed(&self) -> bool {
        self.pending_branches.is_empty()
    }
}
