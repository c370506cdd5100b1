//! Partitions the snapshot iterator into chunks of approximately
//! `chunk_size_bytes / bytes_per_datom_estimate` datoms (spec §4.3 step 3).
//! The estimate is a tunable, not a promise about final compressed size
//! (spec Open Questions) — kept as a field of [`crate::backup::BackupOptions`]
//! rather than a hardcoded constant.

use anyhow::Error;

use crate::datom::Datom;

/// Default per-datom byte estimate used to size chunks (spec §4.3 step 3).
pub const DEFAULT_BYTES_PER_DATOM_ESTIMATE: u64 = 100;

pub fn datoms_per_chunk(chunk_size_bytes: u64, bytes_per_datom_estimate: u64) -> usize {
    let estimate = bytes_per_datom_estimate.max(1);
    ((chunk_size_bytes / estimate).max(1)) as usize
}

/// Pulls up to `n` datoms from `iter`, consuming it left-to-right. Returns
/// fewer than `n` only when the iterator is exhausted.
pub fn take_chunk(
    iter: &mut dyn Iterator<Item = Result<Datom, Error>>,
    n: usize,
) -> Result<Vec<Datom>, Error> {
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        match iter.next() {
            Some(Ok(datom)) => out.push(datom),
            Some(Err(err)) => return Err(err),
            None => break,
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datom::Value;

    #[test]
    fn datoms_per_chunk_uses_estimate() {
        assert_eq!(datoms_per_chunk(10_000, 100), 100);
        assert_eq!(datoms_per_chunk(500, 100), 5);
        // never zero, even for a tiny chunk-size
        assert_eq!(datoms_per_chunk(1, 100), 1);
    }

    #[test]
    fn take_chunk_stops_at_exhaustion() {
        let mut iter = (0..3).map(|i| Ok(Datom::new(i, "a", Value::Int(i), 1, true)));
        let chunk = take_chunk(&mut iter, 10).unwrap();
        assert_eq!(chunk.len(), 3);
        let chunk2 = take_chunk(&mut iter, 10).unwrap();
        assert!(chunk2.is_empty());
    }
}
