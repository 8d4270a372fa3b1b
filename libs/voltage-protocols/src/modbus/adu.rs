//! Modbus application data units
//!
//! - TCP: MBAP header (transaction id, const protocol id 0, implicit
//!   length, unit id) followed by the PDU
//! - RTU: unit id, PDU, CRC-16 low byte first
//! - ASCII: `:` + hex of unit id, PDU and LRC + CRLF (helpers only)
//!
//! The frame-check functions tell a stream transport where one frame ends so
//! it can be cut out of the receive buffer.

use voltage_codec::checksum::{self, crc16_modbus, lrc, read_crc16_modbus, write_crc16_modbus};
use voltage_codec::fields::{read_const, read_implicit, write_const, write_implicit};
use voltage_codec::{ChecksumPolicy, CodecError, Message, ReadBuffer, Result, WriteBuffer};
use voltage_driver::FrameCheck;

use super::pdu::{Direction, ModbusPdu, MAX_PDU_SIZE};

/// Transaction id, protocol id, length and unit id
pub const MBAP_HEADER_LEN: usize = 7;

const MODBUS_PROTOCOL_ID: u64 = 0;

/// Largest MBAP length value: unit id plus the largest PDU
const MAX_MBAP_LENGTH: usize = MAX_PDU_SIZE + 1;

// ============================================================================
// TCP
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpAdu {
    pub transaction_id: u16,
    pub unit_id: u8,
    pub pdu: ModbusPdu,
}

impl Message for TcpAdu {
    type Context = Direction;

    fn parse(buf: &mut ReadBuffer<'_>, direction: Direction) -> Result<Self> {
        let transaction_id = buf.read_u16(16)?;
        read_const(buf, "protocol_id", 16, MODBUS_PROTOCOL_ID)?;
        let length = read_implicit(buf, 16)? as usize;
        if length < 2 {
            return Err(CodecError::LengthMismatch {
                expected: 2,
                actual: length,
            });
        }
        let unit_id = buf.read_u8(8)?;

        let mut body = buf.split_off(length - 1)?;
        let pdu = ModbusPdu::parse(&mut body, direction)?;
        if body.has_more(1) {
            return Err(CodecError::LengthMismatch {
                expected: pdu.length_in_bytes(),
                actual: length - 1,
            });
        }

        Ok(Self {
            transaction_id,
            unit_id,
            pdu,
        })
    }

    fn serialize(&self, buf: &mut WriteBuffer) -> Result<()> {
        buf.write_u16(16, self.transaction_id)?;
        write_const(buf, 16, MODBUS_PROTOCOL_ID)?;
        write_implicit(buf, 16, (self.pdu.length_in_bytes() + 1) as u64)?;
        buf.write_u8(8, self.unit_id)?;
        self.pdu.serialize(buf)
    }

    fn length_in_bits(&self) -> usize {
        MBAP_HEADER_LEN * 8 + self.pdu.length_in_bits()
    }
}

/// Transaction id of an MBAP frame, read without parsing the rest
pub fn mbap_transaction_id(frame: &[u8]) -> Option<u16> {
    match frame {
        [high, low, ..] => Some(u16::from_be_bytes([*high, *low])),
        _ => None,
    }
}

/// Frame boundary of an MBAP frame at the start of `data`
///
/// Needs at least [`MBAP_HEADER_LEN`] bytes. A non-zero protocol id or an
/// impossible length means the stream is out of step; one byte is skipped.
pub fn tcp_frame_check(data: &[u8]) -> FrameCheck {
    if data.len() < MBAP_HEADER_LEN {
        return FrameCheck::Incomplete;
    }
    let protocol_id = u16::from_be_bytes([data[2], data[3]]);
    let length = u16::from_be_bytes([data[4], data[5]]) as usize;
    if protocol_id as u64 != MODBUS_PROTOCOL_ID || !(2..=MAX_MBAP_LENGTH).contains(&length) {
        return FrameCheck::Skip(1);
    }
    let total = 6 + length;
    if data.len() < total {
        FrameCheck::Incomplete
    } else {
        FrameCheck::Complete(total)
    }
}

// ============================================================================
// RTU
// ============================================================================

/// Parse context of an RTU frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtuContext {
    pub direction: Direction,
    pub checksum_policy: ChecksumPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtuAdu {
    pub unit_id: u8,
    pub pdu: ModbusPdu,
}

impl Message for RtuAdu {
    type Context = RtuContext;

    fn parse(buf: &mut ReadBuffer<'_>, ctx: RtuContext) -> Result<Self> {
        if !buf.is_aligned() {
            return Err(CodecError::Misaligned {
                position: buf.position(),
            });
        }
        let start = buf.position() / 8;
        let unit_id = buf.read_u8(8)?;
        let pdu = ModbusPdu::parse(buf, ctx.direction)?;
        let end = buf.position() / 8;

        let computed = crc16_modbus(&buf.as_slice()[start..end]);
        let received = read_crc16_modbus(buf)?;
        checksum::verify(
            "CRC-16",
            u64::from(received),
            u64::from(computed),
            ctx.checksum_policy,
        )?;

        Ok(Self { unit_id, pdu })
    }

    /// The CRC covers everything written to `buf`, so the ADU must be
    /// serialized into a buffer of its own
    fn serialize(&self, buf: &mut WriteBuffer) -> Result<()> {
        buf.write_u8(8, self.unit_id)?;
        self.pdu.serialize(buf)?;
        write_crc16_modbus(buf)
    }

    fn length_in_bits(&self) -> usize {
        8 + self.pdu.length_in_bits() + 16
    }
}

/// Frame boundary of an RTU response at the start of `data`
///
/// RTU has no length field; the size follows from the function code and,
/// for reads, the byte count. Needs at least 3 bytes.
pub fn rtu_response_frame_check(data: &[u8]) -> FrameCheck {
    if data.len() < 3 {
        return FrameCheck::Incomplete;
    }
    let function = data[1];
    let total = if function & 0x80 != 0 {
        5
    } else {
        match function {
            0x01..=0x04 => 5 + data[2] as usize,
            0x05 | 0x06 | 0x0F | 0x10 => 8,
            _ => return FrameCheck::Skip(1),
        }
    };
    if data.len() < total {
        FrameCheck::Incomplete
    } else {
        FrameCheck::Complete(total)
    }
}

// ============================================================================
// ASCII
// ============================================================================

/// Encode an ASCII frame: `:` + hex(unit id, PDU, LRC) + CRLF
pub fn encode_ascii_frame(unit_id: u8, pdu: &ModbusPdu) -> Result<Vec<u8>> {
    let mut raw = Vec::with_capacity(pdu.length_in_bytes() + 2);
    raw.push(unit_id);
    raw.extend_from_slice(&pdu.to_bytes()?);
    raw.push(lrc(&raw));

    let mut frame = Vec::with_capacity(raw.len() * 2 + 3);
    frame.push(b':');
    for byte in raw {
        frame.extend_from_slice(format!("{:02X}", byte).as_bytes());
    }
    frame.extend_from_slice(b"\r\n");
    Ok(frame)
}

/// Decode an ASCII frame into its unit id and PDU
pub fn decode_ascii_frame(
    frame: &[u8],
    direction: Direction,
    policy: ChecksumPolicy,
) -> Result<(u8, ModbusPdu)> {
    let text = frame
        .strip_prefix(b":")
        .and_then(|rest| rest.strip_suffix(b"\r\n"))
        .ok_or_else(|| CodecError::invalid_data("ASCII frame must be ':' ... CRLF"))?;
    let text = std::str::from_utf8(text)
        .map_err(|e| CodecError::invalid_encoding(format!("ASCII frame: {}", e)))?;
    let raw = common::hex::decode(text).map_err(CodecError::invalid_encoding)?;

    let Some((&received, body)) = raw.split_last() else {
        return Err(CodecError::invalid_data("empty ASCII frame"));
    };
    if body.len() < 2 {
        return Err(CodecError::LengthMismatch {
            expected: 2,
            actual: body.len(),
        });
    }
    checksum::verify("LRC", u64::from(received), u64::from(lrc(body)), policy)?;

    let pdu = ModbusPdu::from_bytes(&body[1..], direction)?;
    Ok((body[0], pdu))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::modbus::pdu::FunctionCode;
    use tracing_test::traced_test;

    fn read_holding(address: u16, quantity: u16) -> ModbusPdu {
        ModbusPdu::read(FunctionCode::ReadHoldingRegisters, address, quantity).unwrap()
    }

    const STRICT: RtuContext = RtuContext {
        direction: Direction::Request,
        checksum_policy: ChecksumPolicy::Reject,
    };

    #[test]
    fn test_tcp_adu_bytes() {
        let adu = TcpAdu {
            transaction_id: 0x0001,
            unit_id: 0x11,
            pdu: read_holding(0x006B, 3),
        };
        let bytes = adu.to_bytes().unwrap();
        assert_eq!(
            bytes.as_ref(),
            &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x11, 0x03, 0x00, 0x6B, 0x00, 0x03]
        );

        let parsed = TcpAdu::from_bytes(&bytes, Direction::Request).unwrap();
        assert_eq!(parsed, adu);
        assert_eq!(parsed.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_tcp_adu_corrupted_protocol_id() {
        let adu = TcpAdu {
            transaction_id: 7,
            unit_id: 1,
            pdu: read_holding(0, 1),
        };
        let mut bytes = adu.to_bytes().unwrap().to_vec();
        bytes[3] = 0x01;
        assert!(matches!(
            TcpAdu::from_bytes(&bytes, Direction::Request),
            Err(CodecError::ConstMismatch {
                field: "protocol_id",
                ..
            })
        ));
    }

    #[test]
    fn test_tcp_adu_length_disagrees_with_pdu() {
        // Length claims 7 bytes but the read request PDU is 5
        let bytes = [
            0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0xFF,
        ];
        assert!(matches!(
            TcpAdu::from_bytes(&bytes, Direction::Request),
            Err(CodecError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_tcp_frame_check() {
        let frame = [0x00, 0x01, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x00, 0x2A];
        assert_eq!(tcp_frame_check(&frame[..4]), FrameCheck::Incomplete);
        assert_eq!(tcp_frame_check(&frame[..9]), FrameCheck::Incomplete);
        assert_eq!(tcp_frame_check(&frame), FrameCheck::Complete(11));

        let mut extra = frame.to_vec();
        extra.extend_from_slice(&[0x00, 0x02]);
        assert_eq!(tcp_frame_check(&extra), FrameCheck::Complete(11));

        let mut garbage = frame.to_vec();
        garbage[2] = 0xAA;
        assert_eq!(tcp_frame_check(&garbage), FrameCheck::Skip(1));
    }

    #[test]
    fn test_mbap_transaction_id() {
        assert_eq!(mbap_transaction_id(&[0x12, 0x34, 0x00, 0x00]), Some(0x1234));
        assert_eq!(mbap_transaction_id(&[0x12]), None);
    }

    #[test]
    fn test_rtu_adu_crc() {
        let adu = RtuAdu {
            unit_id: 0x01,
            pdu: read_holding(0x0000, 0x000A),
        };
        let bytes = adu.to_bytes().unwrap();
        assert_eq!(
            bytes.as_ref(),
            &[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xC5, 0xCD]
        );
        assert_eq!(RtuAdu::from_bytes(&bytes, STRICT).unwrap(), adu);
    }

    #[test]
    fn test_rtu_adu_bad_crc_rejected() {
        let bytes = [0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xC5, 0xCE];
        assert!(matches!(
            RtuAdu::from_bytes(&bytes, STRICT),
            Err(CodecError::ChecksumMismatch { kind: "CRC-16", .. })
        ));
    }

    #[test]
    #[traced_test]
    fn test_rtu_adu_bad_crc_warned() {
        let bytes = [0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xC5, 0xCE];
        let lenient = RtuContext {
            checksum_policy: ChecksumPolicy::Warn,
            ..STRICT
        };
        let adu = RtuAdu::from_bytes(&bytes, lenient).unwrap();
        assert_eq!(adu.pdu, read_holding(0, 10));
        assert!(logs_contain("CRC-16 checksum mismatch ignored"));
    }

    #[test]
    fn test_rtu_response_frame_check() {
        let read = [0x01, 0x03, 0x02, 0x00, 0x2A, 0x39, 0x9B];
        assert_eq!(rtu_response_frame_check(&read[..2]), FrameCheck::Incomplete);
        assert_eq!(rtu_response_frame_check(&read[..5]), FrameCheck::Incomplete);
        assert_eq!(rtu_response_frame_check(&read), FrameCheck::Complete(7));

        let exception = [0x01, 0x83, 0x02, 0xC0, 0xF1];
        assert_eq!(rtu_response_frame_check(&exception), FrameCheck::Complete(5));

        let write = [0x01, 0x06, 0x00, 0x01, 0x00, 0x03, 0x98, 0x0B];
        assert_eq!(rtu_response_frame_check(&write), FrameCheck::Complete(8));

        assert_eq!(
            rtu_response_frame_check(&[0x01, 0x2B, 0x0E]),
            FrameCheck::Skip(1)
        );
    }

    #[test]
    fn test_ascii_frame() {
        let pdu = read_holding(0x0000, 0x000A);
        let frame = encode_ascii_frame(0x01, &pdu).unwrap();
        assert_eq!(frame, b":01030000000AF2\r\n".to_vec());

        let (unit_id, parsed) =
            decode_ascii_frame(&frame, Direction::Request, ChecksumPolicy::Reject).unwrap();
        assert_eq!(unit_id, 0x01);
        assert_eq!(parsed, pdu);

        let corrupt = b":01030000000AF3\r\n";
        assert!(matches!(
            decode_ascii_frame(corrupt, Direction::Request, ChecksumPolicy::Reject),
            Err(CodecError::ChecksumMismatch { kind: "LRC", .. })
        ));
        assert!(decode_ascii_frame(b"01030000000AF2", Direction::Request, ChecksumPolicy::Reject)
            .is_err());
    }
}
