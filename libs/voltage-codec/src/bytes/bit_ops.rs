//! Bit-level operations for wire message data
//!
//! All functions use MSB-first ordering: bit 0 of a stream is the most
//! significant bit of its first byte. This matches how field grammars for
//! Modbus, S7 and friends lay out packed flags and sub-byte integers.

/// Extract single bit from u8 value (bit 0 = MSB)
#[inline]
pub fn extract_bit_u8(value: u8, bit_index: u8) -> bool {
    debug_assert!(bit_index < 8, "Bit index out of range: {}", bit_index);
    (value & (0x80 >> bit_index)) != 0
}

/// Extract multi-bit value from byte array (MSB-first bit ordering)
///
/// # Arguments
/// * `bytes` - Source byte array
/// * `start_bit` - Starting bit position (0-indexed from the stream start)
/// * `bit_length` - Number of bits to extract (1-64)
///
/// Bits past the end of `bytes` read as zero; callers bounds-check first.
pub fn extract_bits(bytes: &[u8], start_bit: usize, bit_length: u8) -> u64 {
    debug_assert!(bit_length <= 64, "Bit length out of range: {}", bit_length);
    debug_assert!(bit_length > 0, "Bit length must be greater than 0");

    // Fast path: whole bytes at an aligned position
    if start_bit % 8 == 0 && bit_length % 8 == 0 {
        let first = start_bit / 8;
        let count = (bit_length / 8) as usize;
        if first + count <= bytes.len() {
            return bytes[first..first + count]
                .iter()
                .fold(0u64, |acc, b| (acc << 8) | *b as u64);
        }
    }

    let mut result = 0u64;
    for i in 0..bit_length as usize {
        let bit_position = start_bit + i;
        let byte_index = bit_position / 8;
        let bit_index = (bit_position % 8) as u8;

        let bit = match bytes.get(byte_index) {
            Some(byte) => extract_bit_u8(*byte, bit_index) as u64,
            None => 0,
        };
        result = (result << 1) | bit;
    }

    result
}

/// Insert bits into byte array (MSB-first, mirrors `extract_bits`)
///
/// Only the low `bit_length` bits of `value` are written. Positions past the
/// end of `bytes` are ignored; callers bounds-check first.
pub fn insert_bits(bytes: &mut [u8], start_bit: usize, bit_length: u8, value: u64) {
    debug_assert!(bit_length <= 64, "Bit length out of range: {}", bit_length);
    debug_assert!(bit_length > 0, "Bit length must be greater than 0");

    let len = bit_length as usize;
    for i in 0..len {
        let bit_position = start_bit + i;
        let byte_index = bit_position / 8;
        let mask = 0x80u8 >> (bit_position % 8);

        if let Some(byte) = bytes.get_mut(byte_index) {
            let bit_value = (value >> (len - 1 - i)) & 0x01;
            if bit_value == 1 {
                *byte |= mask;
            } else {
                *byte &= !mask;
            }
        }
    }
}

/// Sign-extend the low `bit_length` bits of `value`
#[inline]
pub fn sign_extend(value: u64, bit_length: u8) -> i64 {
    debug_assert!(bit_length > 0 && bit_length <= 64);
    if bit_length == 64 {
        return value as i64;
    }
    let shift = 64 - bit_length as u32;
    ((value << shift) as i64) >> shift
}

/// Mask with the low `bit_length` bits set
#[inline]
pub fn low_mask(bit_length: u8) -> u64 {
    if bit_length >= 64 {
        u64::MAX
    } else {
        (1u64 << bit_length) - 1
    }
}

/// Number of bits needed to reach the next multiple of `align_bits`
#[inline]
pub fn bits_to_alignment(position: usize, align_bits: usize) -> usize {
    if align_bits == 0 {
        return 0;
    }
    (align_bits - position % align_bits) % align_bits
}
