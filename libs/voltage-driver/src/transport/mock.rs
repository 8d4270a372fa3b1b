//! Mock transport for testing
//!
//! Opens on the first call unless told to keep connecting, and exchanges
//! frames with a scripted peer. The
//! [`MockHandle`] is shared between the test and every transport created
//! from the same factory, so tests can queue replies, install a responder
//! and inspect what was sent.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use common::hex::frame_hex;
use errors::{PlcError, Result};
use parking_lot::Mutex;
use tracing::debug;

use super::{
    FrameBuffer, FrameCheck, OpenStatus, Transport, TransportFactory, TransportStats,
    TransportTarget,
};

type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

struct MockState {
    open: bool,
    open_count: u32,
    close_count: u32,
    /// Number of upcoming `open` calls that fail
    failing_opens: u32,
    /// Number of upcoming `open` calls that report `Connecting`
    delayed_opens: u32,
    /// Number of upcoming `send_message` calls that fail
    failing_sends: u32,
    rx: FrameBuffer,
    sent: Vec<Bytes>,
    responder: Option<Responder>,
    stats: TransportStats,
}

impl fmt::Debug for MockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockState")
            .field("open", &self.open)
            .field("pending_rx", &self.rx.len())
            .field("sent", &self.sent.len())
            .field("responder", &self.responder.is_some())
            .finish()
    }
}

/// Test-side control of mock transports
#[derive(Debug, Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHandle {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                open: false,
                open_count: 0,
                close_count: 0,
                failing_opens: 0,
                delayed_opens: 0,
                failing_sends: 0,
                rx: FrameBuffer::new(64 * 1024),
                sent: Vec::new(),
                responder: None,
                stats: TransportStats::default(),
            })),
        }
    }

    /// Append bytes the peer "sent"
    pub fn push_incoming(&self, data: &[u8]) {
        self.state.lock().rx.extend(data);
    }

    /// Answer every sent frame; `None` means no reply
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        self.state.lock().responder = Some(Box::new(responder));
    }

    pub fn clear_responder(&self) {
        self.state.lock().responder = None;
    }

    /// Make the next `count` opens fail
    pub fn fail_opens(&self, count: u32) {
        self.state.lock().failing_opens = count;
    }

    /// Make the next `count` opens report `Connecting`, like a slow handshake
    pub fn delay_opens(&self, count: u32) {
        self.state.lock().delayed_opens = count;
    }

    /// Make the next `count` sends fail
    pub fn fail_sends(&self, count: u32) {
        self.state.lock().failing_sends = count;
    }

    pub fn sent_frames(&self) -> Vec<Bytes> {
        self.state.lock().sent.clone()
    }

    pub fn take_sent_frames(&self) -> Vec<Bytes> {
        std::mem::take(&mut self.state.lock().sent)
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    pub fn open_count(&self) -> u32 {
        self.state.lock().open_count
    }

    pub fn close_count(&self) -> u32 {
        self.state.lock().close_count
    }
}

/// Transport backed by a [`MockHandle`]
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    handle: MockHandle,
}

impl MockTransport {
    pub fn new(handle: MockHandle) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> &MockHandle {
        &self.handle
    }
}

impl Transport for MockTransport {
    fn code(&self) -> &'static str {
        "dummy"
    }

    fn open(&mut self) -> Result<OpenStatus> {
        let mut state = self.handle.state.lock();
        if state.open {
            return Ok(OpenStatus::Open);
        }
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(PlcError::transport("Mock open refused"));
        }
        if state.delayed_opens > 0 {
            state.delayed_opens -= 1;
            return Ok(OpenStatus::Connecting);
        }
        state.open = true;
        state.open_count += 1;
        debug!("Mock transport opened");
        Ok(OpenStatus::Open)
    }

    fn close(&mut self) -> Result<()> {
        let mut state = self.handle.state.lock();
        if state.open {
            state.open = false;
            state.close_count += 1;
            state.rx.clear();
            debug!("Mock transport closed");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    fn send_message(&mut self, frame: Bytes) -> Result<()> {
        let mut state = self.handle.state.lock();
        if !state.open {
            return Err(PlcError::NotConnected);
        }
        if state.failing_sends > 0 {
            state.failing_sends -= 1;
            return Err(PlcError::transport("Mock send failed"));
        }

        debug!(hex_data = %frame_hex(&frame), length = frame.len(), direction = "send", "[Mock Transport] Raw packet");
        state.stats.bytes_sent += frame.len() as u64;
        state.stats.frames_sent += 1;

        let reply = state.responder.as_mut().and_then(|respond| respond(&frame));
        if let Some(reply) = reply {
            state.rx.extend(&reply);
        }
        state.sent.push(frame);
        Ok(())
    }

    fn select_message(
        &mut self,
        min_size: usize,
        accept: &dyn Fn(&[u8]) -> FrameCheck,
    ) -> Result<Option<Bytes>> {
        let mut state = self.handle.state.lock();
        if !state.open {
            return Err(PlcError::NotConnected);
        }
        let (frame, skipped) = state.rx.select(min_size, accept);
        state.stats.bytes_skipped += skipped as u64;
        if let Some(frame) = &frame {
            debug!(hex_data = %frame_hex(frame), length = frame.len(), direction = "recv", "[Mock Transport] Raw packet");
            state.stats.bytes_received += frame.len() as u64;
            state.stats.frames_received += 1;
        }
        Ok(frame)
    }

    fn stats(&self) -> TransportStats {
        self.handle.state.lock().stats.clone()
    }
}

/// Factory for `dummy` transports sharing one handle
#[derive(Debug, Clone, Default)]
pub struct MockTransportFactory {
    handle: MockHandle,
}

impl MockTransportFactory {
    pub fn new(handle: MockHandle) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> &MockHandle {
        &self.handle
    }
}

impl TransportFactory for MockTransportFactory {
    fn code(&self) -> &'static str {
        "dummy"
    }

    fn name(&self) -> &'static str {
        "Mock"
    }

    fn create(&self, _target: &TransportTarget<'_>) -> Result<Box<dyn Transport>> {
        Ok(Box::new(MockTransport::new(self.handle.clone())))
    }
}
