//! In-flight request/response exchanges of one connection
//!
//! Every task on a connection reads from the same transport, so a task may
//! pull a frame that answers somebody else's request. [`PendingExchanges`]
//! keeps the open exchanges by transaction id and parks such frames for
//! their owner instead of losing them.
//!
//! Protocols without transaction ids (serial framings) cannot tell replies
//! apart; they hold the transport exclusively for one exchange at a time.

use std::collections::HashMap;

use bytes::Bytes;
use tracing::{debug, warn};

/// Open exchanges of a connection, keyed by transaction id
#[derive(Debug, Default)]
pub struct PendingExchanges {
    /// Open exchanges and a response parked for each, if one arrived
    open: HashMap<u16, Option<Bytes>>,
    /// Exchange holding the transport exclusively
    exclusive: Option<u16>,
}

impl PendingExchanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start waiting for a response to `id`
    pub fn open(&mut self, id: u16) {
        if self.open.insert(id, None).is_some() {
            warn!("Transaction {} reopened while still pending", id);
        }
    }

    pub fn is_open(&self, id: u16) -> bool {
        self.open.contains_key(&id)
    }

    /// Stop waiting for `id`, dropping a parked response
    pub fn close(&mut self, id: u16) {
        if let Some(Some(frame)) = self.open.remove(&id) {
            debug!("Transaction {} closed with {}-byte response unread", id, frame.len());
        }
    }

    /// Number of open exchanges
    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    /// Park `frame` for the task waiting on `id`
    ///
    /// Returns `false` when no exchange `id` is open; the frame is then
    /// stale or unsolicited and the caller drops it.
    pub fn route(&mut self, id: u16, frame: Bytes) -> bool {
        match self.open.get_mut(&id) {
            Some(slot) => {
                if slot.replace(frame).is_some() {
                    warn!("Duplicate response for transaction {}, keeping the newest", id);
                }
                true
            },
            None => false,
        }
    }

    /// Response parked for `id` by another task
    pub fn take(&mut self, id: u16) -> Option<Bytes> {
        self.open.get_mut(&id).and_then(Option::take)
    }

    /// Claim the transport for exchange `token`
    ///
    /// Succeeds when the transport is free or already held by `token`.
    pub fn try_acquire(&mut self, token: u16) -> bool {
        match self.exclusive {
            None => {
                self.exclusive = Some(token);
                true
            },
            Some(holder) => holder == token,
        }
    }

    /// Give the transport back if `token` holds it
    pub fn release(&mut self, token: u16) {
        if self.exclusive == Some(token) {
            self.exclusive = None;
        }
    }

    /// Exchange currently holding the transport
    pub fn holder(&self) -> Option<u16> {
        self.exclusive
    }

    /// Forget everything, e.g. when the transport is closed
    pub fn clear(&mut self) {
        self.open.clear();
        self.exclusive = None;
    }
}
