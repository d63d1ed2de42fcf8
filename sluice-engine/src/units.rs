//! Storage units accepted by the `size` function and memory requirements.

use std::str::FromStr;

/// Represents a unit of storage size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageUnit {
    /// Bytes.
    #[default]
    Bytes,
    /// Kilobytes (10^3 bytes).
    Kilobytes,
    /// Megabytes (10^6 bytes).
    Megabytes,
    /// Gigabytes (10^9 bytes).
    Gigabytes,
    /// Kibibytes (2^10 bytes).
    Kibibytes,
    /// Mebibytes (2^20 bytes).
    Mebibytes,
    /// Gibibytes (2^30 bytes).
    Gibibytes,
}

impl StorageUnit {
    /// Converts a byte count into this unit.
    pub fn convert(&self, bytes: u64) -> f64 {
        bytes as f64 / self.bytes_per_unit()
    }

    /// Gets the number of bytes in one of this unit.
    pub fn bytes_per_unit(&self) -> f64 {
        match self {
            Self::Bytes => 1.0,
            Self::Kilobytes => 1e3,
            Self::Megabytes => 1e6,
            Self::Gigabytes => 1e9,
            Self::Kibibytes => 1024.0,
            Self::Mebibytes => 1024.0 * 1024.0,
            Self::Gibibytes => 1024.0 * 1024.0 * 1024.0,
        }
    }
}

impl FromStr for StorageUnit {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "B" => Ok(Self::Bytes),
            "KB" | "K" => Ok(Self::Kilobytes),
            "MB" | "M" => Ok(Self::Megabytes),
            "GB" | "G" => Ok(Self::Gigabytes),
            "KiB" | "Ki" => Ok(Self::Kibibytes),
            "MiB" | "Mi" => Ok(Self::Mebibytes),
            "GiB" | "Gi" => Ok(Self::Gibibytes),
            _ => Err(()),
        }
    }
}

/// Parses a memory amount such as `4G`, `512 MiB`, or a plain byte count.
///
/// Used for the `memory` runtime requirement.
pub fn parse_memory(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Ok(bytes) = s.parse::<i64>() {
        return Some(bytes);
    }

    let split = s.find(|c: char| !c.is_ascii_digit() && c != '.')?;
    let (number, unit) = s.split_at(split);
    let number: f64 = number.trim().parse().ok()?;
    let unit: StorageUnit = unit.trim().parse().ok()?;
    Some((number * unit.bytes_per_unit()) as i64)
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn conversions() {
        assert_eq!(StorageUnit::Bytes.convert(10), 10.0);
        assert_eq!(StorageUnit::Kilobytes.convert(1000), 1.0);
        assert_eq!(StorageUnit::Kibibytes.convert(2048), 2.0);
        assert_eq!(StorageUnit::Gibibytes.convert(1024 * 1024 * 1024), 1.0);
    }

    #[test]
    fn parsing() {
        assert_eq!("B".parse(), Ok(StorageUnit::Bytes));
        assert_eq!("GiB".parse(), Ok(StorageUnit::Gibibytes));
        assert_eq!(StorageUnit::from_str("XB"), Err(()));
    }

    #[test]
    fn memory_strings() {
        assert_eq!(parse_memory("1024"), Some(1024));
        assert_eq!(parse_memory("4G"), Some(4_000_000_000));
        assert_eq!(parse_memory("2 GiB"), Some(2 * 1024 * 1024 * 1024));
        assert_eq!(parse_memory("nonsense"), None);
    }
}
