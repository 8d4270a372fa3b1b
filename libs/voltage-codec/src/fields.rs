//! Field policies and array helpers
//!
//! Message parsers are sequential compositions of these calls against one
//! `ReadBuffer`; serializers mirror them against a `WriteBuffer`.
//!
//! | policy   | parse                                   | serialize              |
//! |----------|-----------------------------------------|------------------------|
//! | const    | read, mismatch is a fatal error         | write the literal      |
//! | implicit | read, returned to the parser, not kept  | recomputed and written |
//! | reserved | read, non-zero only logs a warning      | write zero             |
//! | padding  | skip alignment bits if predicate holds  | write zero bits        |

use tracing::warn;

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::error::{CodecError, Result};

// ============================================================================
// Const fields
// ============================================================================

/// Read a const field and check it against its literal
///
/// A mismatch aborts the enclosing parse. The cursor is left after the field.
pub fn read_const(
    buf: &mut ReadBuffer<'_>,
    field: &'static str,
    bits: u8,
    expected: u64,
) -> Result<()> {
    let actual = buf.read_bits(bits)?;
    if actual != expected {
        return Err(CodecError::ConstMismatch {
            field,
            expected,
            actual,
        });
    }
    Ok(())
}

pub fn write_const(buf: &mut WriteBuffer, bits: u8, value: u64) -> Result<()> {
    buf.write_bits(bits, value)
}

// ============================================================================
// Implicit fields
// ============================================================================

/// Read an implicit field; the caller uses the value but does not store it
pub fn read_implicit(buf: &mut ReadBuffer<'_>, bits: u8) -> Result<u64> {
    buf.read_bits(bits)
}

/// Write an implicit field from a value recomputed out of message state
pub fn write_implicit(buf: &mut WriteBuffer, bits: u8, value: u64) -> Result<()> {
    buf.write_bits(bits, value)
}

// ============================================================================
// Reserved fields
// ============================================================================

/// Read a reserved field that should be zero
///
/// Devices do send non-zero reserved bits; that is logged and parsing goes on.
pub fn read_reserved(buf: &mut ReadBuffer<'_>, field: &'static str, bits: u8) -> Result<()> {
    let position = buf.position();
    let value = buf.read_bits(bits)?;
    if value != 0 {
        warn!(
            "Reserved field '{}' at bit {} is {:#x}, expected 0",
            field, position, value
        );
    }
    Ok(())
}

pub fn write_reserved(buf: &mut WriteBuffer, bits: u8) -> Result<()> {
    buf.write_bits(bits, 0)
}

// ============================================================================
// Padding
// ============================================================================

/// Consume `bits` bits of padding when `condition` holds
pub fn read_padding(buf: &mut ReadBuffer<'_>, bits: usize, condition: bool) -> Result<()> {
    if condition {
        buf.skip_bits(bits)?;
    }
    Ok(())
}

/// Write `bits` zero bits of padding when `condition` holds
pub fn write_padding(buf: &mut WriteBuffer, bits: usize, condition: bool) -> Result<()> {
    if condition {
        buf.write_zeros(bits)?;
    }
    Ok(())
}

// ============================================================================
// Arrays
// ============================================================================

/// Read exactly `count` elements
///
/// The element reader gets the element index and whether it is the last one,
/// which padding predicates such as "not last item" depend on.
pub fn read_count_array<'a, T, F>(
    buf: &mut ReadBuffer<'a>,
    count: usize,
    mut element: F,
) -> Result<Vec<T>>
where
    F: FnMut(&mut ReadBuffer<'a>, usize, bool) -> Result<T>,
{
    let mut items = Vec::with_capacity(count.min(1024));
    for index in 0..count {
        items.push(element(buf, index, index + 1 == count)?);
    }
    Ok(items)
}

/// Read elements out of the next `byte_length` bytes until they are used up
///
/// Elements parse from a sub-buffer, so they cannot read past the declared
/// length. Leftover bits that do not form a whole element are an error.
pub fn read_length_array<'a, T, F>(
    buf: &mut ReadBuffer<'a>,
    byte_length: usize,
    mut element: F,
) -> Result<Vec<T>>
where
    F: FnMut(&mut ReadBuffer<'a>) -> Result<T>,
{
    let mut region = buf.split_off(byte_length)?;
    let mut items = Vec::new();
    while region.has_more(1) {
        let before = region.position();
        items.push(element(&mut region)?);
        if region.position() == before {
            return Err(CodecError::invalid_data("array element consumed no input"));
        }
    }
    Ok(items)
}

/// Read elements until the enclosing buffer is exhausted
pub fn read_array_until_end<'a, T, F>(
    buf: &mut ReadBuffer<'a>,
    mut element: F,
) -> Result<Vec<T>>
where
    F: FnMut(&mut ReadBuffer<'a>) -> Result<T>,
{
    let mut items = Vec::new();
    while buf.has_more(1) {
        let before = buf.position();
        items.push(element(buf)?);
        if buf.position() == before {
            return Err(CodecError::invalid_data("array element consumed no input"));
        }
    }
    Ok(items)
}

/// Write every element; the writer gets the element and whether it is last
pub fn write_array<T, F>(buf: &mut WriteBuffer, items: &[T], mut element: F) -> Result<()>
where
    F: FnMut(&mut WriteBuffer, &T, bool) -> Result<()>,
{
    for (index, item) in items.iter().enumerate() {
        element(buf, item, index + 1 == items.len())?;
    }
    Ok(())
}

/// Element count from a byte length and a fixed element size in bytes
pub fn count_from_length(byte_length: usize, element_size: usize) -> Result<usize> {
    if element_size == 0 || byte_length % element_size != 0 {
        return Err(CodecError::LengthMismatch {
            expected: element_size,
            actual: byte_length,
        });
    }
    Ok(byte_length / element_size)
}
