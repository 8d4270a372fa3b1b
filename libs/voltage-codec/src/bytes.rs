//! Binary data processing utilities
//!
//! Byte order handling and MSB-first bit extraction shared by the read and
//! write buffers.

pub mod bit_ops;
pub mod byte_order;

pub use bit_ops::*;
pub use byte_order::ByteOrder;
