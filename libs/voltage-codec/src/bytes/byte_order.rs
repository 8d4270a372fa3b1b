//! Byte order of multi-byte fields
//!
//! Buffers always move bits MSB-first; the byte order only decides how the
//! bytes of a whole-byte field wider than 8 bits are arranged on the wire.

use serde::{Deserialize, Serialize};

/// Byte order for 16/24/32/64-bit fields
///
/// For 32-bit value `0x12345678`:
/// - `BigEndian`: [0x12, 0x34, 0x56, 0x78]
/// - `LittleEndian`: [0x78, 0x56, 0x34, 0x12]
///
/// Configured as `big_endian` / `little_endian`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    /// Network byte order (Modbus, S7)
    #[default]
    BigEndian,

    LittleEndian,
}

impl ByteOrder {
    /// Rearrange the bytes of an `n`-bit field read or written MSB-first
    ///
    /// Only whole-byte widths above 8 bits are affected. The operation is its
    /// own inverse, so the same call serves reads and writes.
    #[inline]
    pub fn reorder(&self, value: u64, bit_length: u8) -> u64 {
        match self {
            Self::BigEndian => value,
            Self::LittleEndian if bit_length > 8 && bit_length % 8 == 0 => {
                value.swap_bytes() >> (64 - bit_length as u32)
            },
            Self::LittleEndian => value,
        }
    }
}

impl std::fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::BigEndian => "big_endian",
            Self::LittleEndian => "little_endian",
        })
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_names_match_config() {
        for order in [ByteOrder::BigEndian, ByteOrder::LittleEndian] {
            let json = serde_json::to_string(&order).unwrap();
            assert_eq!(json, format!("\"{}\"", order));
        }
    }

    #[test]
    fn test_reorder() {
        let le = ByteOrder::LittleEndian;
        assert_eq!(le.reorder(0x1234, 16), 0x3412);
        assert_eq!(le.reorder(0x12_3456, 24), 0x56_3412);
        assert_eq!(le.reorder(0x1234_5678, 32), 0x7856_3412);
        // Sub-byte and single-byte widths are untouched
        assert_eq!(le.reorder(0xAB, 8), 0xAB);
        assert_eq!(le.reorder(0x5, 4), 0x5);
        assert_eq!(le.reorder(0x1FF, 9), 0x1FF);

        assert_eq!(ByteOrder::BigEndian.reorder(0x1234, 16), 0x1234);
    }

    #[test]
    fn test_reorder_is_involution() {
        let le = ByteOrder::LittleEndian;
        let value = 0x0102_0304_0506_0708u64;
        assert_eq!(le.reorder(le.reorder(value, 64), 64), value);
    }

    #[test]
    fn test_default() {
        assert_eq!(ByteOrder::default(), ByteOrder::BigEndian);
    }
}
