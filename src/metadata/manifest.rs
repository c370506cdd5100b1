//! Backup manifest and chunk descriptor records (spec §3/§6).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::codec::Compression;

/// One chunk's metadata within a manifest (spec §3/§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    #[serde(rename = "chunk/id")]
    pub id: u64,
    /// `[min-tx, max-tx]`, or absent — one teacher code path writes `[nil,
    /// nil]`; restore treats the per-chunk range as authoritative when
    /// present and otherwise folds over the chunk's own datoms (Open
    /// Question decision, see DESIGN.md).
    #[serde(rename = "chunk/tx-range", skip_serializing_if = "Option::is_none")]
    pub tx_range: Option<(i64, i64)>,
    #[serde(rename = "chunk/max-eid")]
    pub max_eid: i64,
    #[serde(rename = "chunk/datom-count")]
    pub datom_count: u64,
    #[serde(rename = "chunk/size-bytes")]
    pub size_bytes: u64,
    #[serde(rename = "chunk/checksum")]
    pub checksum: String,
    #[serde(rename = "chunk/storage-key")]
    pub storage_key: String,
    #[serde(rename = "chunk/etag", skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// Aggregate manifest stats (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ManifestStats {
    #[serde(rename = "stats/datom-count")]
    pub datom_count: u64,
    #[serde(rename = "stats/chunk-count")]
    pub chunk_count: u64,
    #[serde(rename = "stats/size-bytes")]
    pub size_bytes: u64,
    #[serde(rename = "stats/tx-range", skip_serializing_if = "Option::is_none")]
    pub tx_range: Option<(i64, i64)>,
    /// Absent (rather than 0) means "fold over chunk descriptors instead"
    /// (spec Open Questions / DESIGN.md).
    #[serde(rename = "stats/max-eid", skip_serializing_if = "Option::is_none")]
    pub max_eid: Option<i64>,
    #[serde(rename = "stats/max-tx", skip_serializing_if = "Option::is_none")]
    pub max_tx: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timing {
    #[serde(rename = "backup-started")]
    pub backup_started: String,
    #[serde(rename = "backup-completed", skip_serializing_if = "Option::is_none")]
    pub backup_completed: Option<String>,
    #[serde(rename = "duration-seconds", skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
}

/// One manifest per backup (spec §3/§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "backup/id")]
    pub backup_id: String,
    #[serde(rename = "backup/type")]
    pub backup_type: String,
    #[serde(rename = "backup/created-at")]
    pub created_at: String,
    #[serde(rename = "backup/completed")]
    pub completed: bool,
    #[serde(rename = "backup/version")]
    pub backup_version: String,
    #[serde(rename = "database/id")]
    pub database_id: String,
    #[serde(rename = "format/version")]
    pub format_version: String,
    #[serde(rename = "format/compression")]
    pub compression: Compression,
    pub stats: ManifestStats,
    pub chunks: Vec<ChunkDescriptor>,
    pub timing: Timing,

    /// Forward-compatibility: any keys this version of the crate doesn't
    /// recognize are preserved verbatim across a read-modify-write cycle.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub const MANIFEST_FORMAT_VERSION: &str = "1.0.0";
pub const COMPLETE_MARKER_BYTES: &[u8] = b"complete";

impl Manifest {
    pub fn new(backup_id: String, database_id: String, compression: Compression, started_at: String) -> Self {
        Manifest {
            backup_id,
            backup_type: ":full".to_string(),
            created_at: started_at.clone(),
            completed: false,
            backup_version: MANIFEST_FORMAT_VERSION.to_string(),
            database_id,
            format_version: MANIFEST_FORMAT_VERSION.to_string(),
            compression,
            stats: ManifestStats::default(),
            chunks: Vec::new(),
            timing: Timing {
                backup_started: started_at,
                backup_completed: None,
                duration_seconds: None,
            },
            extra: Map::new(),
        }
    }

    /// Invariant: chunk descriptors are order-preserving by `id` (spec §4.3).
    pub fn finalize_chunk_order(&mut self) {
        self.chunks.sort_by_key(|c| c.id);
    }

    /// Only checks for duplicate ids; chunks with straddling tx ranges
    /// across a boundary are permitted by spec §8 invariant 4 and the
    /// restore merge handles any chunk arrival order regardless.
    pub fn validate_chunk_ordering(&self) -> Result<(), anyhow::Error> {
        let mut seen = BTreeSet::new();
        for chunk in &self.chunks {
            if !seen.insert(chunk.id) {
                anyhow::bail!("duplicate chunk id {} in manifest", chunk.id);
            }
        }
        Ok(())
    }
}
