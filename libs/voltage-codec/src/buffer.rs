//! Bit-addressable message buffers
//!
//! `ReadBuffer` is an immutable cursor over received bytes. `WriteBuffer` is a
//! pre-sized output region that refuses writes past its capacity with
//! `BufferFull` instead of growing; it is finalized exactly once with
//! [`WriteBuffer::finish`].
//!
//! Both move bits MSB-first and keep their cursor untouched when an operation
//! fails, so a failed field read or write never leaves a half-consumed field
//! behind.

mod read;
mod write;

pub use read::ReadBuffer;
pub use write::WriteBuffer;
