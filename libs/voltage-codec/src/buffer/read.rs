use crate::bytes::{bit_ops, ByteOrder};
use crate::error::{CodecError, Result};
use crate::text::TextEncoding;

/// Read cursor over a received message
#[derive(Debug, Clone)]
pub struct ReadBuffer<'a> {
    data: &'a [u8],
    /// Cursor in bits
    pos: usize,
    order: ByteOrder,
}

impl<'a> ReadBuffer<'a> {
    /// Big-endian reader over `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_byte_order(data, ByteOrder::BigEndian)
    }

    pub fn with_byte_order(data: &'a [u8], order: ByteOrder) -> Self {
        Self {
            data,
            pos: 0,
            order,
        }
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    /// Bits consumed so far
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn total_bits(&self) -> usize {
        self.data.len() * 8
    }

    #[inline]
    pub fn remaining_bits(&self) -> usize {
        self.total_bits() - self.pos
    }

    /// Whole bytes left after the cursor
    #[inline]
    pub fn remaining_bytes(&self) -> usize {
        self.remaining_bits() / 8
    }

    /// Whether at least `bits` more bits can be read
    #[inline]
    pub fn has_more(&self, bits: usize) -> bool {
        self.remaining_bits() >= bits
    }

    #[inline]
    pub fn is_aligned(&self) -> bool {
        self.pos % 8 == 0
    }

    /// The full underlying byte slice
    pub fn as_slice(&self) -> &'a [u8] {
        self.data
    }

    fn ensure(&self, bits: usize) -> Result<()> {
        if self.has_more(bits) {
            Ok(())
        } else {
            Err(CodecError::OutOfData {
                requested: bits,
                remaining: self.remaining_bits(),
            })
        }
    }

    fn ensure_aligned(&self) -> Result<()> {
        if self.is_aligned() {
            Ok(())
        } else {
            Err(CodecError::Misaligned { position: self.pos })
        }
    }

    fn check_bit_count(bits: u8, max: u8) -> Result<()> {
        if bits == 0 || bits > max {
            return Err(CodecError::InvalidBitCount(bits as usize));
        }
        Ok(())
    }

    /// Look at the next `bits` bits without consuming them
    pub fn peek_bits(&self, bits: u8) -> Result<u64> {
        Self::check_bit_count(bits, 64)?;
        self.ensure(bits as usize)?;
        let raw = bit_ops::extract_bits(self.data, self.pos, bits);
        Ok(self.order.reorder(raw, bits))
    }

    /// Read the next `bits` (1-64) bits as an unsigned integer
    ///
    /// Fails with `OutOfData` and leaves the cursor unchanged when fewer than
    /// `bits` bits remain.
    pub fn read_bits(&mut self, bits: u8) -> Result<u64> {
        let value = self.peek_bits(bits)?;
        self.pos += bits as usize;
        Ok(value)
    }

    pub fn read_bit(&mut self) -> Result<bool> {
        Ok(self.read_bits(1)? == 1)
    }

    pub fn read_u8(&mut self, bits: u8) -> Result<u8> {
        Self::check_bit_count(bits, 8)?;
        Ok(self.read_bits(bits)? as u8)
    }

    pub fn read_u16(&mut self, bits: u8) -> Result<u16> {
        Self::check_bit_count(bits, 16)?;
        Ok(self.read_bits(bits)? as u16)
    }

    pub fn read_u32(&mut self, bits: u8) -> Result<u32> {
        Self::check_bit_count(bits, 32)?;
        Ok(self.read_bits(bits)? as u32)
    }

    pub fn read_u64(&mut self, bits: u8) -> Result<u64> {
        self.read_bits(bits)
    }

    pub fn read_i8(&mut self, bits: u8) -> Result<i8> {
        Self::check_bit_count(bits, 8)?;
        Ok(bit_ops::sign_extend(self.read_bits(bits)?, bits) as i8)
    }

    pub fn read_i16(&mut self, bits: u8) -> Result<i16> {
        Self::check_bit_count(bits, 16)?;
        Ok(bit_ops::sign_extend(self.read_bits(bits)?, bits) as i16)
    }

    pub fn read_i32(&mut self, bits: u8) -> Result<i32> {
        Self::check_bit_count(bits, 32)?;
        Ok(bit_ops::sign_extend(self.read_bits(bits)?, bits) as i32)
    }

    pub fn read_i64(&mut self, bits: u8) -> Result<i64> {
        Ok(bit_ops::sign_extend(self.read_bits(bits)?, bits))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_bits(32)? as u32))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_bits(64)?))
    }

    /// Read `count` raw bytes (not subject to byte order)
    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>> {
        self.ensure(count * 8)?;
        if self.is_aligned() {
            let start = self.pos / 8;
            self.pos += count * 8;
            return Ok(self.data[start..start + count].to_vec());
        }
        let bytes = (0..count)
            .map(|i| bit_ops::extract_bits(self.data, self.pos + i * 8, 8) as u8)
            .collect();
        self.pos += count * 8;
        Ok(bytes)
    }

    /// Borrow the next `count` bytes without copying (cursor must be aligned)
    pub fn read_slice(&mut self, count: usize) -> Result<&'a [u8]> {
        self.ensure_aligned()?;
        self.ensure(count * 8)?;
        let start = self.pos / 8;
        self.pos += count * 8;
        Ok(&self.data[start..start + count])
    }

    /// Read a fixed-length string field of `bits` bits
    pub fn read_string(&mut self, bits: usize, encoding: TextEncoding) -> Result<String> {
        if bits % 8 != 0 {
            return Err(CodecError::InvalidBitCount(bits));
        }
        self.ensure(bits)?;
        let start = self.pos;
        let raw = self.read_bytes(bits / 8)?;
        match encoding.decode(&raw) {
            Ok(text) => Ok(text),
            Err(e) => {
                self.pos = start;
                Err(e)
            },
        }
    }

    /// Read a string prefixed by its byte length in `length_bits` bits
    pub fn read_length_prefixed_string(
        &mut self,
        length_bits: u8,
        encoding: TextEncoding,
    ) -> Result<String> {
        let start = self.pos;
        let length = self.read_bits(length_bits)? as usize;
        match self.read_string(length * 8, encoding) {
            Ok(text) => Ok(text),
            Err(e) => {
                self.pos = start;
                Err(e)
            },
        }
    }

    /// Skip `bits` bits
    pub fn skip_bits(&mut self, bits: usize) -> Result<()> {
        self.ensure(bits)?;
        self.pos += bits;
        Ok(())
    }

    /// Split off a sub-buffer covering exactly the next `byte_count` bytes
    ///
    /// The cursor of `self` moves past the region. Nested messages parse from
    /// the returned buffer and cannot read beyond their budget.
    pub fn split_off(&mut self, byte_count: usize) -> Result<ReadBuffer<'a>> {
        let slice = self.read_slice(byte_count)?;
        Ok(ReadBuffer::with_byte_order(slice, self.order))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_read_bits_msb_first() {
        let data = [0b1010_1100, 0xFF];
        let mut buf = ReadBuffer::new(&data);

        assert!(buf.read_bit().unwrap());
        assert_eq!(buf.read_bits(3).unwrap(), 0b010);
        assert_eq!(buf.read_bits(4).unwrap(), 0b1100);
        assert_eq!(buf.position(), 8);
        assert_eq!(buf.read_u8(8).unwrap(), 0xFF);
        assert!(!buf.has_more(1));
    }

    #[test]
    fn test_out_of_data_leaves_cursor() {
        let data = [0x12, 0x34];
        let mut buf = ReadBuffer::new(&data);
        buf.read_bits(4).unwrap();

        let err = buf.read_bits(13).unwrap_err();
        assert_eq!(
            err,
            CodecError::OutOfData {
                requested: 13,
                remaining: 12
            }
        );
        assert_eq!(buf.position(), 4);
        assert_eq!(buf.read_bits(12).unwrap(), 0x234);
    }

    #[test]
    fn test_invalid_bit_counts() {
        let data = [0u8; 16];
        let mut buf = ReadBuffer::new(&data);
        assert_eq!(buf.read_bits(0), Err(CodecError::InvalidBitCount(0)));
        assert_eq!(buf.read_bits(65), Err(CodecError::InvalidBitCount(65)));
        assert_eq!(buf.read_u8(9), Err(CodecError::InvalidBitCount(9)));
        assert_eq!(buf.position(), 0);
    }

    #[test]
    fn test_little_endian_words() {
        let data = [0x34, 0x12, 0x78, 0x56, 0x34, 0x12];
        let mut buf = ReadBuffer::with_byte_order(&data, ByteOrder::LittleEndian);
        assert_eq!(buf.read_u16(16).unwrap(), 0x1234);
        assert_eq!(buf.read_u32(32).unwrap(), 0x1234_5678);
    }

    #[test]
    fn test_signed_reads() {
        let data = [0xFF, 0xFE, 0x80, 0xF0];
        let mut buf = ReadBuffer::new(&data);
        assert_eq!(buf.read_i16(16).unwrap(), -2);
        assert_eq!(buf.read_i8(8).unwrap(), -128);
        assert_eq!(buf.read_i8(4).unwrap(), -1);
        assert_eq!(buf.read_i8(4).unwrap(), 0);
    }

    #[test]
    fn test_float_reads() {
        let mut data = Vec::new();
        data.extend_from_slice(&1.5f32.to_be_bytes());
        data.extend_from_slice(&(-0.25f64).to_be_bytes());
        let mut buf = ReadBuffer::new(&data);
        assert_eq!(buf.read_f32().unwrap(), 1.5);
        assert_eq!(buf.read_f64().unwrap(), -0.25);
    }

    #[test]
    fn test_unaligned_bytes() {
        let data = [0x0A, 0xBC, 0xD0];
        let mut buf = ReadBuffer::new(&data);
        buf.read_bits(4).unwrap();
        assert_eq!(buf.read_bytes(2).unwrap(), vec![0xAB, 0xCD]);
        assert!(buf.read_slice(0).is_err());
    }

    #[test]
    fn test_strings() {
        let data = b"\x03abcPLC\0";
        let mut buf = ReadBuffer::new(data);
        assert_eq!(
            buf.read_length_prefixed_string(8, TextEncoding::Ascii)
                .unwrap(),
            "abc"
        );
        assert_eq!(buf.read_string(32, TextEncoding::Utf8).unwrap(), "PLC");
    }

    #[test]
    fn test_split_off_budget() {
        let data = [0x01, 0x02, 0x03, 0x04];
        let mut outer = ReadBuffer::new(&data);
        let mut inner = outer.split_off(2).unwrap();

        assert_eq!(outer.position(), 16);
        assert_eq!(inner.read_u16(16).unwrap(), 0x0102);
        assert!(inner.read_bits(1).is_err());
        assert_eq!(outer.read_u16(16).unwrap(), 0x0304);
    }

    #[test]
    fn test_peek_does_not_consume() {
        let data = [0x83];
        let buf = ReadBuffer::new(&data);
        assert_eq!(buf.peek_bits(1).unwrap(), 1);
        assert_eq!(buf.position(), 0);
    }
}
