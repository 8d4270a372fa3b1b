//! Message and wire enum contracts
//!
//! Drivers only ever call `parse` and `serialize`; message internals stay
//! private to the protocol module that defines them.

use bytes::Bytes;

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::error::Result;

/// A protocol message with a one-pass parser and a mirrored serializer
pub trait Message: Sized {
    /// Caller-supplied parse context (direction flags, enclosing lengths, ...)
    type Context: Copy;

    /// Parse one message starting at the buffer's cursor
    fn parse(buf: &mut ReadBuffer<'_>, ctx: Self::Context) -> Result<Self>;

    /// Serialize into `buf`; implicit fields are recomputed here
    fn serialize(&self, buf: &mut WriteBuffer) -> Result<()>;

    /// Exact serialized size in bits
    fn length_in_bits(&self) -> usize;

    fn length_in_bytes(&self) -> usize {
        self.length_in_bits().div_ceil(8)
    }

    /// Serialize into a buffer sized to this message
    fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = WriteBuffer::new(self.length_in_bytes());
        self.serialize(&mut buf)?;
        Ok(buf.finish())
    }

    /// Parse from the start of `data`
    fn from_bytes(data: &[u8], ctx: Self::Context) -> Result<Self> {
        let mut buf = ReadBuffer::new(data);
        Self::parse(&mut buf, ctx)
    }
}

/// Closed enumeration with a total mapping to and from its wire value
pub trait WireEnum: Sized + Copy {
    /// Width of the field on the wire
    const BITS: u8;

    /// Unknown values are an `InvalidEnumValue` error
    fn from_wire_value(value: u64) -> Result<Self>;

    fn to_wire_value(self) -> u64;

    fn read(buf: &mut ReadBuffer<'_>) -> Result<Self> {
        Self::from_wire_value(buf.read_bits(Self::BITS)?)
    }

    fn write(self, buf: &mut WriteBuffer) -> Result<()> {
        buf.write_bits(Self::BITS, self.to_wire_value())
    }
}

/// Declare a closed enum together with its `WireEnum` mapping
///
/// ```
/// voltage_codec::wire_enum! {
///     /// Transport size of an item
///     pub enum DataSize: 8 {
///         Bit = 0x01,
///         Byte = 0x02,
///     }
/// }
/// ```
#[macro_export]
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident : $bits:literal {
            $(
                $(#[$vmeta:meta])*
                $variant:ident = $value:literal
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $(
                $(#[$vmeta])*
                $variant,
            )+
        }

        impl $crate::WireEnum for $name {
            const BITS: u8 = $bits;

            fn from_wire_value(value: u64) -> $crate::Result<Self> {
                match value {
                    $($value => Ok(Self::$variant),)+
                    other => Err($crate::CodecError::InvalidEnumValue {
                        name: stringify!($name),
                        value: other,
                    }),
                }
            }

            fn to_wire_value(self) -> u64 {
                match self {
                    $(Self::$variant => $value,)+
                }
            }
        }
    };
}
