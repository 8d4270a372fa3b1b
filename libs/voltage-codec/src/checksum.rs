//! Frame checksums
//!
//! Checksums are computed over bytes that are already serialized and are
//! appended last. On the receive side they are read like any other field;
//! verification is a separate call so the driver decides whether a mismatch
//! rejects the frame or only logs.

use crc::{Crc, CRC_16_MODBUS};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::error::{CodecError, Result};

const MODBUS_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// What to do when a received checksum does not match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumPolicy {
    /// Fail the frame
    #[default]
    Reject,
    /// Log a warning and accept the frame
    Warn,
}

impl std::str::FromStr for ChecksumPolicy {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "reject" | "strict" => Ok(Self::Reject),
            "warn" | "lenient" => Ok(Self::Warn),
            _ => Err(CodecError::invalid_data(format!(
                "Unknown checksum policy: {}",
                s
            ))),
        }
    }
}

/// CRC-16/MODBUS (init 0xFFFF, reflected polynomial 0xA001)
pub fn crc16_modbus(data: &[u8]) -> u16 {
    MODBUS_CRC.checksum(data)
}

/// Modbus ASCII longitudinal redundancy check (two's complement of the byte sum)
pub fn lrc(data: &[u8]) -> u8 {
    let sum = data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    (!sum).wrapping_add(1)
}

/// Append the CRC of everything written so far, low byte first
pub fn write_crc16_modbus(buf: &mut WriteBuffer) -> Result<()> {
    if !buf.is_aligned() {
        return Err(CodecError::Misaligned {
            position: buf.position(),
        });
    }
    let crc = crc16_modbus(buf.written());
    buf.write_bytes(&crc.to_le_bytes())
}

/// Read a CRC field transmitted low byte first
pub fn read_crc16_modbus(buf: &mut ReadBuffer<'_>) -> Result<u16> {
    let bytes = buf.read_bytes(2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// Compare a received checksum with the computed one under `policy`
pub fn verify(
    kind: &'static str,
    received: u64,
    computed: u64,
    policy: ChecksumPolicy,
) -> Result<()> {
    if received == computed {
        return Ok(());
    }
    match policy {
        ChecksumPolicy::Reject => Err(CodecError::ChecksumMismatch {
            kind,
            expected: computed,
            actual: received,
        }),
        ChecksumPolicy::Warn => {
            warn!(
                "{} checksum mismatch ignored: received {:#x}, computed {:#x}",
                kind, received, computed
            );
            Ok(())
        },
    }
}
