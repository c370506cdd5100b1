//! Small formatting helpers. Grounded on `proxmox-human-byte`'s `HumanByte`
//! (used throughout the teacher's GC logging) but reimplemented locally
//! since nothing else in this crate needs that crate.

use std::fmt;

pub struct HumanByte(u64);

impl From<u64> for HumanByte {
    fn from(bytes: u64) -> Self {
        HumanByte(bytes)
    }
}

impl fmt::Display for HumanByte {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
        let mut value = self.0 as f64;
        let mut unit = 0;
        while value >= 1024.0 && unit < UNITS.len() - 1 {
            value /= 1024.0;
            unit += 1;
        }
        if unit == 0 {
            write!(f, "{} {}", self.0, UNITS[unit])
        } else {
            write!(f, "{:.2} {}", value, UNITS[unit])
        }
    }
}

/// `backup-id` format from spec §3/§6: `YYYYMMDD-HHMMSS-<6 lowercase hex>` UTC.
pub fn generate_backup_id() -> anyhow::Result<String> {
    let now = proxmox_time::epoch_i64();
    timestamped_id(now)
}

pub fn timestamped_id(epoch: i64) -> anyhow::Result<String> {
    let tm = proxmox_time::gmtime(epoch)?;
    let mut suffix = [0u8; 3];
    openssl::rand::rand_bytes(&mut suffix)?;
    Ok(format!(
        "{:04}{:02}{:02}-{:02}{:02}{:02}-{}",
        tm.tm_year + 1900,
        tm.tm_mon + 1,
        tm.tm_mday,
        tm.tm_hour,
        tm.tm_min,
        tm.tm_sec,
        hex::encode(suffix),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_byte_formats() {
        assert_eq!(HumanByte::from(512).to_string(), "512 B");
        assert_eq!(HumanByte::from(2048).to_string(), "2.00 KiB");
    }

    #[test]
    fn backup_id_format() {
        // 2023-06-15 12:34:56 UTC
        let id = timestamped_id(1_686_832_496).unwrap();
        let (prefix, hexpart) = id.rsplit_once('-').unwrap();
        assert_eq!(prefix, "20230615-123456");
        assert_eq!(hexpart.len(), 6);
        assert!(hexpart.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
