//! Chunk record encoding (spec §4.2): a self-describing, format-tagged
//! binary record, GZIP compression applied to the encoded bytes, and a
//! SHA-256 checksum computed over the *compressed* bytes.
//!
//! Grounded on `pbs_datastore::file_formats`'s magic-tagged binary header
//! idiom (`{type, version}` carried alongside the payload) — the inner
//! per-datom encoding itself is `serde_json`, the simplest self-describing
//! form available without introducing a binary-codec crate the teacher
//! doesn't use; the spec explicitly allows any self-describing binary or
//! CBOR-like codec (spec §4.2) as long as it round-trips and tags its
//! format/version.

mod compress;

pub use compress::{compress, decompress, Compression};

use anyhow::{bail, Context, Error};
use serde::{Deserialize, Serialize};

use crate::datom::Datom;

pub const CHUNK_FORMAT_TYPE: &str = "datom-chunk";
pub const CHUNK_FORMAT_VERSION: &str = "1.0.0";

/// The encoded chunk record (spec §3/§6): format tag + version + id + datoms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    #[serde(rename = "format/type")]
    pub format_type: String,
    #[serde(rename = "format/version")]
    pub format_version: String,
    #[serde(rename = "chunk/id")]
    pub chunk_id: u64,
    pub datoms: Vec<Datom>,
}

impl ChunkRecord {
    pub fn new(chunk_id: u64, datoms: Vec<Datom>) -> Self {
        ChunkRecord {
            format_type: CHUNK_FORMAT_TYPE.to_string(),
            format_version: CHUNK_FORMAT_VERSION.to_string(),
            chunk_id,
            datoms,
        }
    }
}

/// Encode a chunk record to its self-describing binary form (pre-compression).
pub fn encode_chunk(record: &ChunkRecord) -> Result<Vec<u8>, Error> {
    serde_json::to_vec(record).context("encoding chunk record")
}

/// Decode a chunk record, validating its format tag (spec §4.2 invariant c).
pub fn decode_chunk(bytes: &[u8]) -> Result<ChunkRecord, Error> {
    let record: ChunkRecord =
        serde_json::from_slice(bytes).context("decoding chunk record")?;
    if record.format_type != CHUNK_FORMAT_TYPE {
        bail!(
            "invalid chunk type: expected {}, got {}",
            CHUNK_FORMAT_TYPE,
            record.format_type
        );
    }
    Ok(record)
}

/// SHA-256 over the on-wire (compressed) bytes, hex-encoded (spec §4.2/§6).
pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(openssl::sha::sha256(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datom::Value;

    #[test]
    fn round_trips_all_value_types() {
        let datoms = vec![
            Datom::new(1, "name", Value::Str("alice".into()), 100, true),
            Datom::new(1, "age", Value::Int(30), 100, true),
            Datom::new(1, "score", Value::Double(3.14159265358979), 100, true),
            Datom::new(1, "active", Value::Bool(true), 100, true),
            Datom::new(1, "createdAt", Value::Timestamp(1_700_000_000_000), 100, true),
            Datom::new(1, "uuid", Value::Uuid("f47ac10b-58cc-4372-a567-0e02b2c3d479".into()), 100, true),
            Datom::new(1, "status", Value::Keyword(":active".into()), 100, true),
            Datom::new(1, "friend", Value::Ref(2), 100, true),
        ];
        let record = ChunkRecord::new(0, datoms.clone());
        let encoded = encode_chunk(&record).unwrap();
        let decoded = decode_chunk(&encoded).unwrap();
        assert_eq!(decoded.datoms, datoms);
    }

    #[test]
    fn preserves_double_precision() {
        let value = 0.1_f64 + 0.2_f64; // classic lossy-narrowing trap
        let datom = Datom::new(1, "x", Value::Double(value), 1, true);
        let record = ChunkRecord::new(0, vec![datom]);
        let encoded = encode_chunk(&record).unwrap();
        let decoded = decode_chunk(&encoded).unwrap();
        match &decoded.datoms[0].v {
            Value::Double(d) => assert_eq!(*d, value),
            other => panic!("expected Double, got {:?}", other),
        }
    }

    #[test]
    fn rejects_wrong_format_type() {
        let mut record = ChunkRecord::new(0, vec![]);
        record.format_type = "something-else".into();
        let encoded = encode_chunk(&record).unwrap();
        assert!(decode_chunk(&encoded).is_err());
    }

    #[test]
    fn checksum_is_over_compressed_bytes() {
        let record = ChunkRecord::new(0, vec![Datom::new(1, "a", Value::Int(1), 1, true)]);
        let encoded = encode_chunk(&record).unwrap();
        let compressed = compress(&encoded, Compression::Gzip).unwrap();
        let sum1 = checksum(&compressed);
        let sum2 = checksum(&encoded);
        assert_ne!(sum1, sum2, "checksum must be computed over compressed bytes");

        let decompressed = decompress(&compressed, Compression::Gzip).unwrap();
        assert_eq!(decompressed, encoded);
    }
}
