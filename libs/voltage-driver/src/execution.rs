//! Requests, responses and execution handles
//!
//! An [`Execution`] is the caller's handle on a queued task. The task only
//! keeps an [`ExecutionSink`], a weak reference used to deliver the result.
//! Dropping the execution releases the slot; the engine notices on the next
//! poll and discards a read or write task that nobody waits for.

use std::sync::{Arc, Weak};

use errors::{PlcError, ResponseCode, Result};
use parking_lot::Mutex;

use crate::field::FieldRef;
use crate::value::PlcValue;

/// Task identifier, unique within a connection
pub type TaskId = u64;

// ============================================================================
// Requests
// ============================================================================

/// One named field of a read request
#[derive(Debug, Clone)]
pub struct ReadItem {
    pub name: String,
    pub field: FieldRef,
}

#[derive(Debug, Clone)]
pub struct ReadRequest {
    items: Vec<ReadItem>,
}

impl ReadRequest {
    pub(crate) fn new(items: Vec<ReadItem>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[ReadItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// One named field and the value to write to it
#[derive(Debug, Clone)]
pub struct WriteItem {
    pub name: String,
    pub field: FieldRef,
    pub value: PlcValue,
}

#[derive(Debug, Clone)]
pub struct WriteRequest {
    items: Vec<WriteItem>,
}

impl WriteRequest {
    pub(crate) fn new(items: Vec<WriteItem>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[WriteItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ReadResponseItem {
    pub name: String,
    pub code: ResponseCode,
    /// `Null` unless `code` is `Ok`
    pub value: PlcValue,
}

/// Per-item results of a read, in request order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadResponse {
    items: Vec<ReadResponseItem>,
}

impl ReadResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, code: ResponseCode, value: PlcValue) {
        self.items.push(ReadResponseItem {
            name: name.into(),
            code,
            value,
        });
    }

    pub fn items(&self) -> &[ReadResponseItem] {
        &self.items
    }

    pub fn get(&self, name: &str) -> Option<&ReadResponseItem> {
        self.items.iter().find(|item| item.name == name)
    }

    /// Value of an item that was read successfully
    pub fn value(&self, name: &str) -> Option<&PlcValue> {
        self.get(name)
            .filter(|item| item.code.is_ok())
            .map(|item| &item.value)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteResponseItem {
    pub name: String,
    pub code: ResponseCode,
}

/// Per-item results of a write, in request order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteResponse {
    items: Vec<WriteResponseItem>,
}

impl WriteResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, code: ResponseCode) {
        self.items.push(WriteResponseItem {
            name: name.into(),
            code,
        });
    }

    pub fn items(&self) -> &[WriteResponseItem] {
        &self.items
    }

    pub fn code(&self, name: &str) -> Option<ResponseCode> {
        self.items
            .iter()
            .find(|item| item.name == name)
            .map(|item| item.code)
    }

    pub fn all_ok(&self) -> bool {
        self.items.iter().all(|item| item.code.is_ok())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// ============================================================================
// Execution handles
// ============================================================================

type Slot<T> = Mutex<Option<Result<T>>>;

/// Caller-side handle on a queued task
#[derive(Debug)]
pub struct Execution<T> {
    task_id: TaskId,
    slot: Arc<Slot<T>>,
}

pub type ConnectExecution = Execution<()>;
pub type DisconnectExecution = Execution<()>;
pub type ReadExecution = Execution<ReadResponse>;
pub type WriteExecution = Execution<WriteResponse>;

impl<T> Execution<T> {
    /// Create a handle and the sink its task delivers through
    pub(crate) fn new(task_id: TaskId) -> (Self, ExecutionSink<T>) {
        let slot = Arc::new(Mutex::new(None));
        let sink = ExecutionSink {
            slot: Arc::downgrade(&slot),
        };
        (Self { task_id, slot }, sink)
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// The task has completed, successfully or not
    pub fn is_finished(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// The task has completed without error
    pub fn finished_successfully(&self) -> bool {
        matches!(*self.slot.lock(), Some(Ok(_)))
    }

    pub fn has_error(&self) -> bool {
        matches!(*self.slot.lock(), Some(Err(_)))
    }

    pub fn error(&self) -> Option<PlcError> {
        match &*self.slot.lock() {
            Some(Err(err)) => Some(err.clone()),
            _ => None,
        }
    }

    /// Take the result out of the handle, leaving it unfinished
    pub fn take_result(&self) -> Option<Result<T>> {
        self.slot.lock().take()
    }
}

impl<T: Clone> Execution<T> {
    /// Response of a successfully completed task
    pub fn response(&self) -> Option<T> {
        match &*self.slot.lock() {
            Some(Ok(response)) => Some(response.clone()),
            _ => None,
        }
    }
}

/// Task-side, non-owning end of an execution
#[derive(Debug)]
pub struct ExecutionSink<T> {
    slot: Weak<Slot<T>>,
}

impl<T> ExecutionSink<T> {
    /// The caller dropped its handle
    pub fn is_released(&self) -> bool {
        self.slot.strong_count() == 0
    }

    /// A result has been delivered
    pub fn is_resolved(&self) -> bool {
        self.slot
            .upgrade()
            .map(|slot| slot.lock().is_some())
            .unwrap_or(false)
    }

    /// Deliver the result; returns `false` when nobody is listening
    ///
    /// The first delivered result wins.
    pub fn complete(&self, result: Result<T>) -> bool {
        match self.slot.upgrade() {
            Some(slot) => {
                let mut guard = slot.lock();
                if guard.is_none() {
                    *guard = Some(result);
                }
                true
            },
            None => false,
        }
    }

    pub fn succeed(&self, value: T) -> bool {
        self.complete(Ok(value))
    }

    pub fn fail(&self, err: PlcError) -> bool {
        self.complete(Err(err))
    }
}
