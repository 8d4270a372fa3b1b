//! Modbus value codec
//!
//! Converts between typed [`PlcValue`]s and the coil bits or 16-bit
//! registers a [`ModbusField`] covers.
//!
//! A single register is always big-endian as the Modbus data model defines
//! it. The connection's byte order applies to values spanning 2 or 4
//! registers: `LittleEndian` reverses all bytes of the value.

use errors::{PlcError, Result};
use tracing::trace;
use voltage_codec::{ByteOrder, ReadBuffer, WriteBuffer};
use voltage_driver::{PlcField, PlcValue, PlcValueType};

use super::address::ModbusField;

fn element_order(field: &ModbusField, byte_order: ByteOrder) -> ByteOrder {
    if field.element_width() > 1 {
        byte_order
    } else {
        ByteOrder::BigEndian
    }
}

fn into_value(field: &ModbusField, mut values: Vec<PlcValue>) -> PlcValue {
    if field.quantity == 1 && values.len() == 1 {
        values.remove(0)
    } else {
        PlcValue::List(values)
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Decode the register data block of an FC 03/04 response
pub fn decode_registers(field: &ModbusField, data: &[u8], byte_order: ByteOrder) -> Result<PlcValue> {
    let expected = field.wire_quantity() * 2;
    if data.len() != expected {
        return Err(PlcError::parse(format!(
            "{}: expected {} data bytes, got {}",
            field.area,
            expected,
            data.len()
        )));
    }

    let element_bytes = field.element_width() * 2;
    let order = element_order(field, byte_order);
    let values = data
        .chunks(element_bytes)
        .map(|chunk| {
            let mut buf = ReadBuffer::with_byte_order(chunk, order);
            let bits = (element_bytes * 8) as u8;
            let value = match field.value_type {
                PlcValueType::Word => PlcValue::Word(buf.read_u16(bits)?),
                PlcValueType::Int => PlcValue::Int(buf.read_i16(bits)?),
                PlcValueType::Uint => PlcValue::Uint(buf.read_u16(bits)?),
                PlcValueType::Dword => PlcValue::Dword(buf.read_u32(bits)?),
                PlcValueType::Dint => PlcValue::Dint(buf.read_i32(bits)?),
                PlcValueType::Udint => PlcValue::Udint(buf.read_u32(bits)?),
                PlcValueType::Real => PlcValue::Real(buf.read_f32()?),
                PlcValueType::Lword => PlcValue::Lword(buf.read_u64(bits)?),
                PlcValueType::Lint => PlcValue::Lint(buf.read_i64(bits)?),
                PlcValueType::Ulint => PlcValue::Ulint(buf.read_u64(bits)?),
                PlcValueType::Lreal => PlcValue::Lreal(buf.read_f64()?),
                other => {
                    return Err(PlcError::internal(format!(
                        "{} is not a register type",
                        other
                    )))
                },
            };
            Ok(value)
        })
        .collect::<Result<Vec<_>>>()?;

    trace!(
        "Decoded {} x {} from {} bytes ({:?})",
        field.quantity,
        field.value_type,
        data.len(),
        order
    );
    Ok(into_value(field, values))
}

/// Decode the packed bit block of an FC 01/02 response
pub fn decode_bits(field: &ModbusField, data: &[u8]) -> Result<PlcValue> {
    let bits = super::pdu::unpack_coils(data, field.quantity)?;
    Ok(into_value(field, bits.into_iter().map(PlcValue::Bool).collect()))
}

// ============================================================================
// Encoding
// ============================================================================

fn elements<'a>(field: &ModbusField, value: &'a PlcValue) -> Result<Vec<&'a PlcValue>> {
    let elements = value.elements();
    if elements.len() != field.quantity {
        return Err(PlcError::parse(format!(
            "'{}' takes {} values, got {}",
            field.address(),
            field.quantity,
            elements.len()
        )));
    }
    Ok(elements)
}

fn mismatch(field: &ModbusField, value: &PlcValue) -> PlcError {
    PlcError::parse(format!("{} does not fit {}", value, field.value_type))
}

fn int_in<T: TryFrom<i64>>(field: &ModbusField, value: &PlcValue) -> Result<T> {
    value
        .as_i64()
        .and_then(|v| T::try_from(v).ok())
        .ok_or_else(|| mismatch(field, value))
}

fn uint_in<T: TryFrom<u64>>(field: &ModbusField, value: &PlcValue) -> Result<T> {
    value
        .as_u64()
        .and_then(|v| T::try_from(v).ok())
        .ok_or_else(|| mismatch(field, value))
}

/// Encode a value into the registers of an FC 06/16 request
pub fn encode_registers(
    field: &ModbusField,
    value: &PlcValue,
    byte_order: ByteOrder,
) -> Result<Vec<u16>> {
    let elements = elements(field, value)?;
    let order = element_order(field, byte_order);
    let mut buf = WriteBuffer::with_byte_order(field.wire_quantity() * 2, order);

    for element in elements {
        match field.value_type {
            PlcValueType::Word | PlcValueType::Uint => {
                buf.write_u16(16, uint_in(field, element)?)?
            },
            PlcValueType::Int => buf.write_i16(16, int_in(field, element)?)?,
            PlcValueType::Dword | PlcValueType::Udint => {
                buf.write_u32(32, uint_in(field, element)?)?
            },
            PlcValueType::Dint => buf.write_i32(32, int_in(field, element)?)?,
            PlcValueType::Lword | PlcValueType::Ulint => {
                buf.write_u64(64, uint_in(field, element)?)?
            },
            PlcValueType::Lint => buf.write_i64(64, int_in(field, element)?)?,
            PlcValueType::Real => {
                let v = element.as_f64().ok_or_else(|| mismatch(field, element))?;
                buf.write_f32(v as f32)?
            },
            PlcValueType::Lreal => {
                let v = element.as_f64().ok_or_else(|| mismatch(field, element))?;
                buf.write_f64(v)?
            },
            _ => return Err(mismatch(field, element)),
        }
    }

    Ok(buf
        .finish()
        .chunks(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

/// Encode a value into the coil states of an FC 05/15 request
pub fn encode_bits(field: &ModbusField, value: &PlcValue) -> Result<Vec<bool>> {
    elements(field, value)?
        .into_iter()
        .map(|element| match element {
            PlcValue::Bool(b) => Ok(*b),
            other => Err(mismatch(field, other)),
        })
        .collect()
}
