//! Transport layer
//!
//! Transports move whole frames and never block: `open` reports
//! [`OpenStatus::Connecting`] while a connection is being established and
//! `select_message` returns `Ok(None)` while a frame is still incomplete. Framing is decided by the
//! driver through a [`FrameCheck`] predicate over the buffered bytes.

pub mod mock;
pub mod tcp;

use std::fmt;

use bytes::{Buf, Bytes, BytesMut};
use errors::Result;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::ConnectionConfig;

pub use mock::{MockHandle, MockTransport, MockTransportFactory};
pub use tcp::{TcpTransport, TcpTransportFactory};

/// Verdict of a driver's frame predicate over the buffered bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCheck {
    /// More bytes are needed
    Incomplete,
    /// The first `n` bytes form a frame
    Complete(usize),
    /// Drop `n` leading bytes and look again (resynchronize)
    Skip(usize),
}

/// Progress of [`Transport::open`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenStatus {
    /// Ready to send and receive
    Open,
    /// Still connecting; call `open` again on a later pass
    Connecting,
}

/// Transport statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransportStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub frames_sent: u64,
    pub frames_received: u64,
    /// Bytes discarded while resynchronizing
    pub bytes_skipped: u64,
}

/// Core transport trait
pub trait Transport: Send + fmt::Debug {
    /// Transport code used in connection strings
    fn code(&self) -> &'static str;

    /// Start or continue opening; `Open` once the transport is usable
    fn open(&mut self) -> Result<OpenStatus>;

    fn close(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;

    /// Queue a complete frame for sending
    fn send_message(&mut self, frame: Bytes) -> Result<()>;

    /// Return the next complete frame, or `None` while it is incomplete
    ///
    /// `accept` is only called once at least `min_size` bytes are buffered.
    fn select_message(
        &mut self,
        min_size: usize,
        accept: &dyn Fn(&[u8]) -> FrameCheck,
    ) -> Result<Option<Bytes>>;

    fn stats(&self) -> TransportStats;
}

/// What a transport factory needs to build a transport
#[derive(Debug, Clone, Copy)]
pub struct TransportTarget<'a> {
    /// Connect information from the connection string
    pub connect_info: &'a str,
    /// Port the driver's protocol uses when none is given
    pub default_port: Option<u16>,
    pub config: &'a ConnectionConfig,
}

/// Creates transports of one kind
pub trait TransportFactory: Send + Sync {
    fn code(&self) -> &'static str;

    fn name(&self) -> &'static str;

    fn create(&self, target: &TransportTarget<'_>) -> Result<Box<dyn Transport>>;
}

// ============================================================================
// Receive buffer with frame selection
// ============================================================================

/// Accumulates received bytes and cuts frames out of them
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
    limit: usize,
}

impl FrameBuffer {
    /// Buffer that holds at most `limit` unconsumed bytes
    pub fn new(limit: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(limit),
            limit,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Room left before the limit is reached
    pub fn available(&self) -> usize {
        self.limit.saturating_sub(self.buf.len())
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Cut the next frame out of the buffer
    ///
    /// Returns the selected frame and the number of bytes skipped on the way.
    pub fn select(
        &mut self,
        min_size: usize,
        accept: &dyn Fn(&[u8]) -> FrameCheck,
    ) -> (Option<Bytes>, usize) {
        let mut skipped = 0;
        loop {
            if self.buf.is_empty() || self.buf.len() < min_size {
                return (None, skipped);
            }
            match accept(&self.buf[..]) {
                FrameCheck::Incomplete => return (None, skipped),
                FrameCheck::Complete(len) => {
                    if len == 0 || len > self.buf.len() {
                        return (None, skipped);
                    }
                    return (Some(self.buf.split_to(len).freeze()), skipped);
                },
                FrameCheck::Skip(n) => {
                    let n = n.clamp(1, self.buf.len());
                    debug!("Skipping {} bytes to resynchronize", n);
                    self.buf.advance(n);
                    skipped += n;
                },
            }
        }
    }

    /// Drop everything if a peer floods the buffer with unframed data
    pub fn enforce_limit(&mut self) -> usize {
        if self.buf.len() <= self.limit {
            return 0;
        }
        let dropped = self.buf.len();
        warn!(
            "Receive buffer exceeded {} bytes without a frame, dropping {} bytes",
            self.limit, dropped
        );
        self.buf.clear();
        dropped
    }
}
