//! Voltage Codec Library
//!
//! Bit-level message encoding substrate for VoltageEMS PLC drivers.
//!
//! # Architecture
//!
//! - **Buffers**: `ReadBuffer` / `WriteBuffer` with a bit cursor and bounds checks
//! - **Fields**: const / implicit / reserved / padding policies and array helpers
//! - **Checksums**: Modbus CRC-16 and LRC with an explicit verification policy
//! - **Messages**: the `Message` and `WireEnum` contracts protocol types implement

pub mod buffer;
pub mod bytes;
pub mod checksum;
pub mod error;
pub mod fields;
pub mod message;
pub mod text;

// Re-export core types
pub use buffer::{ReadBuffer, WriteBuffer};
pub use crate::bytes::ByteOrder;
pub use checksum::ChecksumPolicy;
pub use error::{CodecError, Result};
pub use message::{Message, WireEnum};
pub use text::TextEncoding;
