use bytes::Bytes;

use crate::bytes::{bit_ops, ByteOrder};
use crate::error::{CodecError, Result};
use crate::text::TextEncoding;

/// Pre-sized output buffer for one outgoing message
#[derive(Debug, Clone)]
pub struct WriteBuffer {
    data: Vec<u8>,
    /// Cursor in bits
    pos: usize,
    order: ByteOrder,
}

impl WriteBuffer {
    /// Big-endian buffer holding at most `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self::with_byte_order(capacity, ByteOrder::BigEndian)
    }

    pub fn with_byte_order(capacity: usize, order: ByteOrder) -> Self {
        Self {
            data: vec![0; capacity],
            pos: 0,
            order,
        }
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    /// Bits written so far
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn capacity_bits(&self) -> usize {
        self.data.len() * 8
    }

    #[inline]
    pub fn remaining_bits(&self) -> usize {
        self.capacity_bits() - self.pos
    }

    #[inline]
    pub fn is_aligned(&self) -> bool {
        self.pos % 8 == 0
    }

    /// Bytes written so far, including a partially filled last byte
    pub fn written(&self) -> &[u8] {
        &self.data[..self.pos.div_ceil(8)]
    }

    fn ensure(&self, bits: usize) -> Result<()> {
        if bits <= self.remaining_bits() {
            Ok(())
        } else {
            Err(CodecError::BufferFull {
                requested: bits,
                remaining: self.remaining_bits(),
            })
        }
    }

    fn check_bit_count(bits: u8, max: u8) -> Result<()> {
        if bits == 0 || bits > max {
            return Err(CodecError::InvalidBitCount(bits as usize));
        }
        Ok(())
    }

    /// Write the low `bits` (1-64) bits of `value` at the cursor
    ///
    /// Fails with `BufferFull` without touching the buffer when capacity
    /// would be exceeded, and with `ValueOutOfRange` when `value` does not
    /// fit in `bits` bits.
    pub fn write_bits(&mut self, bits: u8, value: u64) -> Result<()> {
        Self::check_bit_count(bits, 64)?;
        if value & !bit_ops::low_mask(bits) != 0 {
            return Err(CodecError::out_of_range(format!(
                "{} does not fit in {} bits",
                value, bits
            )));
        }
        self.ensure(bits as usize)?;
        let ordered = self.order.reorder(value, bits);
        bit_ops::insert_bits(&mut self.data, self.pos, bits, ordered);
        self.pos += bits as usize;
        Ok(())
    }

    pub fn write_bit(&mut self, value: bool) -> Result<()> {
        self.write_bits(1, value as u64)
    }

    pub fn write_u8(&mut self, bits: u8, value: u8) -> Result<()> {
        Self::check_bit_count(bits, 8)?;
        self.write_bits(bits, value as u64)
    }

    pub fn write_u16(&mut self, bits: u8, value: u16) -> Result<()> {
        Self::check_bit_count(bits, 16)?;
        self.write_bits(bits, value as u64)
    }

    pub fn write_u32(&mut self, bits: u8, value: u32) -> Result<()> {
        Self::check_bit_count(bits, 32)?;
        self.write_bits(bits, value as u64)
    }

    pub fn write_u64(&mut self, bits: u8, value: u64) -> Result<()> {
        self.write_bits(bits, value)
    }

    /// Write a two's complement value in `bits` bits
    pub fn write_signed(&mut self, bits: u8, value: i64) -> Result<()> {
        Self::check_bit_count(bits, 64)?;
        if bits < 64 {
            let min = -(1i64 << (bits - 1));
            let max = (1i64 << (bits - 1)) - 1;
            if value < min || value > max {
                return Err(CodecError::out_of_range(format!(
                    "{} does not fit in signed {} bits",
                    value, bits
                )));
            }
        }
        self.write_bits(bits, value as u64 & bit_ops::low_mask(bits))
    }

    pub fn write_i8(&mut self, bits: u8, value: i8) -> Result<()> {
        Self::check_bit_count(bits, 8)?;
        self.write_signed(bits, value as i64)
    }

    pub fn write_i16(&mut self, bits: u8, value: i16) -> Result<()> {
        Self::check_bit_count(bits, 16)?;
        self.write_signed(bits, value as i64)
    }

    pub fn write_i32(&mut self, bits: u8, value: i32) -> Result<()> {
        Self::check_bit_count(bits, 32)?;
        self.write_signed(bits, value as i64)
    }

    pub fn write_i64(&mut self, bits: u8, value: i64) -> Result<()> {
        self.write_signed(bits, value)
    }

    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        self.write_bits(32, value.to_bits() as u64)
    }

    pub fn write_f64(&mut self, value: f64) -> Result<()> {
        self.write_bits(64, value.to_bits())
    }

    /// Write raw bytes (not subject to byte order)
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure(bytes.len() * 8)?;
        if self.is_aligned() {
            let start = self.pos / 8;
            self.data[start..start + bytes.len()].copy_from_slice(bytes);
        } else {
            for (i, byte) in bytes.iter().enumerate() {
                bit_ops::insert_bits(&mut self.data, self.pos + i * 8, 8, *byte as u64);
            }
        }
        self.pos += bytes.len() * 8;
        Ok(())
    }

    /// Write a fixed-length string field of `bits` bits, NUL padded
    pub fn write_string(&mut self, bits: usize, encoding: TextEncoding, text: &str) -> Result<()> {
        if bits % 8 != 0 {
            return Err(CodecError::InvalidBitCount(bits));
        }
        let mut encoded = encoding.encode(text)?;
        let width = bits / 8;
        if encoded.len() > width {
            return Err(CodecError::out_of_range(format!(
                "string of {} bytes exceeds field width {}",
                encoded.len(),
                width
            )));
        }
        self.ensure(bits)?;
        encoded.resize(width, 0);
        self.write_bytes(&encoded)
    }

    /// Write a string preceded by its byte length in `length_bits` bits
    pub fn write_length_prefixed_string(
        &mut self,
        length_bits: u8,
        encoding: TextEncoding,
        text: &str,
    ) -> Result<()> {
        let encoded = encoding.encode(text)?;
        self.ensure(length_bits as usize + encoded.len() * 8)?;
        self.write_bits(length_bits, encoded.len() as u64)?;
        self.write_bytes(&encoded)
    }

    /// Write `bits` zero bits
    pub fn write_zeros(&mut self, bits: usize) -> Result<()> {
        self.ensure(bits)?;
        let mut left = bits;
        while left > 0 {
            let chunk = left.min(64) as u8;
            bit_ops::insert_bits(&mut self.data, self.pos, chunk, 0);
            self.pos += chunk as usize;
            left -= chunk as usize;
        }
        Ok(())
    }

    /// Finalize the buffer into the bytes actually written
    pub fn finish(mut self) -> Bytes {
        let len = self.pos.div_ceil(8);
        self.data.truncate(len);
        Bytes::from(self.data)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_write_bits_msb_first() {
        let mut buf = WriteBuffer::new(2);
        buf.write_bit(true).unwrap();
        buf.write_bits(3, 0b010).unwrap();
        buf.write_bits(4, 0b1100).unwrap();
        buf.write_u8(8, 0xFF).unwrap();
        assert_eq!(buf.finish().as_ref(), &[0b1010_1100, 0xFF]);
    }

    #[test]
    fn test_buffer_full_without_partial_write() {
        let mut buf = WriteBuffer::new(2);
        buf.write_u8(8, 0xAA).unwrap();

        let err = buf.write_u16(16, 0xFFFF).unwrap_err();
        assert_eq!(
            err,
            CodecError::BufferFull {
                requested: 16,
                remaining: 8
            }
        );
        assert_eq!(buf.position(), 8);
        assert_eq!(buf.written(), &[0xAA]);

        assert!(buf.write_bytes(&[1, 2]).is_err());
        assert_eq!(buf.position(), 8);
    }

    #[test]
    fn test_value_must_fit() {
        let mut buf = WriteBuffer::new(4);
        assert!(buf.write_bits(4, 0x10).is_err());
        assert!(buf.write_i8(4, 8).is_err());
        assert!(buf.write_i8(4, -8).is_ok());
        assert_eq!(buf.written(), &[0x80]);
    }

    #[test]
    fn test_little_endian_words() {
        let mut buf = WriteBuffer::with_byte_order(6, ByteOrder::LittleEndian);
        buf.write_u16(16, 0x1234).unwrap();
        buf.write_u32(32, 0x1234_5678).unwrap();
        assert_eq!(
            buf.finish().as_ref(),
            &[0x34, 0x12, 0x78, 0x56, 0x34, 0x12]
        );
    }

    #[test]
    fn test_unaligned_bytes() {
        let mut buf = WriteBuffer::new(3);
        buf.write_bits(4, 0).unwrap();
        buf.write_bytes(&[0xAB, 0xCD]).unwrap();
        assert_eq!(buf.finish().as_ref(), &[0x0A, 0xBC, 0xD0]);
    }

    #[test]
    fn test_strings_padded() {
        let mut buf = WriteBuffer::new(8);
        buf.write_length_prefixed_string(8, TextEncoding::Ascii, "abc")
            .unwrap();
        buf.write_string(32, TextEncoding::Utf8, "PLC").unwrap();
        assert_eq!(buf.finish().as_ref(), b"\x03abcPLC\0");
    }

    #[test]
    fn test_string_too_long() {
        let mut buf = WriteBuffer::new(8);
        assert!(buf.write_string(16, TextEncoding::Utf8, "abc").is_err());
        assert_eq!(buf.position(), 0);
    }

    #[test]
    fn test_finish_partial_byte() {
        let mut buf = WriteBuffer::new(4);
        buf.write_bits(3, 0b111).unwrap();
        assert_eq!(buf.finish().as_ref(), &[0b1110_0000]);
    }
}
