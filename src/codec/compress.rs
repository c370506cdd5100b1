//! GZIP compression at level 6 by default; `none` permitted (spec §4.2).

use std::io::{Read, Write};

use anyhow::{Context, Error};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression as GzLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Compression {
    Gzip,
    None,
}

impl Compression {
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::Gzip => "gz",
            Compression::None => "bin",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::Gzip => "gzip",
            Compression::None => "none",
        }
    }
}

impl std::str::FromStr for Compression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "gzip" => Ok(Compression::Gzip),
            "none" => Ok(Compression::None),
            other => anyhow::bail!("unknown compression algorithm: {}", other),
        }
    }
}

const GZIP_LEVEL: u32 = 6;

pub fn compress(bytes: &[u8], algorithm: Compression) -> Result<Vec<u8>, Error> {
    match algorithm {
        Compression::None => Ok(bytes.to_vec()),
        Compression::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), GzLevel::new(GZIP_LEVEL));
            encoder.write_all(bytes).context("gzip compress")?;
            encoder.finish().context("gzip finish")
        }
    }
}

pub fn decompress(bytes: &[u8], algorithm: Compression) -> Result<Vec<u8>, Error> {
    match algorithm {
        Compression::None => Ok(bytes.to_vec()),
        Compression::Gzip => {
            let mut decoder = GzDecoder::new(bytes);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out).context("gzip decompress")?;
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_round_trips() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(50);
        let compressed = compress(&data, Compression::Gzip).unwrap();
        assert!(compressed.len() < data.len());
        let restored = decompress(&compressed, Compression::Gzip).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn none_is_identity() {
        let data = b"raw bytes".to_vec();
        let compressed = compress(&data, Compression::None).unwrap();
        assert_eq!(compressed, data);
        assert_eq!(decompress(&compressed, Compression::None).unwrap(), data);
    }
}
