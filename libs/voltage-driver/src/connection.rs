//! Connections
//!
//! A [`Connection`] owns its driver, its task queue and a [`ConnectionCore`]
//! with everything a state machine may touch while it is stepped: the
//! transport, the configuration, the connection flags and the transaction
//! counter. Queue mutation only happens through `&mut Connection`.

use std::time::Instant;

use errors::{PlcError, Result};
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::connection_string::ConnectionString;
use crate::driver::Driver;
use crate::exchange::PendingExchanges;
use crate::execution::{
    ConnectExecution, DisconnectExecution, Execution, ReadExecution, ReadItem, ReadRequest,
    TaskId, WriteExecution, WriteItem, WriteRequest,
};
use crate::field::FieldRef;
use crate::queue::{PassStats, TaskQueue};
use crate::task::{LifecycleContext, ReadContext, StateMachine, Task, TaskContext, WriteContext};
use crate::transport::{Transport, TransportStats};
use crate::value::PlcValue;

// ============================================================================
// ConnectionCore - state shared with the running task
// ============================================================================

/// Connection state handed to a state machine on every step
#[derive(Debug)]
pub struct ConnectionCore {
    connection_string: ConnectionString,
    config: ConnectionConfig,
    transport: Box<dyn Transport>,
    connected: bool,
    disconnecting: bool,
    running_tasks: usize,
    transaction_id: u16,
    exchanges: PendingExchanges,
}

impl ConnectionCore {
    pub fn new(
        connection_string: ConnectionString,
        config: ConnectionConfig,
        transport: Box<dyn Transport>,
    ) -> Self {
        Self {
            connection_string,
            config,
            transport,
            connected: false,
            disconnecting: false,
            running_tasks: 0,
            transaction_id: 0,
            exchanges: PendingExchanges::new(),
        }
    }

    pub fn connection_string(&self) -> &ConnectionString {
        &self.connection_string
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn transport_mut(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    pub fn is_disconnecting(&self) -> bool {
        self.disconnecting
    }

    pub fn set_disconnecting(&mut self, disconnecting: bool) {
        self.disconnecting = disconnecting;
    }

    /// Tasks queued on this connection, including the one being stepped
    pub fn running_tasks(&self) -> usize {
        self.running_tasks
    }

    pub(crate) fn task_added(&mut self) {
        self.running_tasks += 1;
    }

    pub(crate) fn task_removed(&mut self) {
        self.running_tasks = self.running_tasks.saturating_sub(1);
    }

    /// Next transaction id; the counter wraps and is incremented on use
    pub fn next_transaction_id(&mut self) -> u16 {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        self.transaction_id
    }

    /// Exchanges in flight on the shared transport
    pub fn exchanges(&self) -> &PendingExchanges {
        &self.exchanges
    }

    pub fn exchanges_mut(&mut self) -> &mut PendingExchanges {
        &mut self.exchanges
    }
}

// ============================================================================
// Connection
// ============================================================================

/// A caller-owned connection to one PLC
#[derive(Debug)]
pub struct Connection {
    core: ConnectionCore,
    driver: Box<dyn Driver>,
    queue: TaskQueue,
    next_task_id: TaskId,
}

impl Connection {
    pub fn new(core: ConnectionCore, driver: Box<dyn Driver>) -> Self {
        Self {
            core,
            driver,
            queue: TaskQueue::new(),
            next_task_id: 1,
        }
    }

    pub fn connection_string(&self) -> &ConnectionString {
        self.core.connection_string()
    }

    pub fn protocol_code(&self) -> &'static str {
        self.driver.code()
    }

    pub fn config(&self) -> &ConnectionConfig {
        self.core.config()
    }

    pub fn is_connected(&self) -> bool {
        self.core.is_connected()
    }

    pub fn is_disconnecting(&self) -> bool {
        self.core.is_disconnecting()
    }

    pub fn running_tasks(&self) -> usize {
        self.core.running_tasks()
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn supports_reading(&self) -> bool {
        self.driver.supports_reading()
    }

    pub fn supports_writing(&self) -> bool {
        self.driver.supports_writing()
    }

    pub fn transport_stats(&self) -> TransportStats {
        self.core.transport().stats()
    }

    fn ensure_not_disconnecting(&self) -> Result<()> {
        if self.core.is_disconnecting() {
            return Err(PlcError::NotConnected);
        }
        Ok(())
    }

    fn ensure_ready(&self) -> Result<()> {
        self.ensure_not_disconnecting()?;
        if !self.core.is_connected() {
            return Err(PlcError::NotConnected);
        }
        Ok(())
    }

    fn allocate_task_id(&mut self) -> TaskId {
        let id = self.next_task_id;
        self.next_task_id += 1;
        id
    }

    fn enqueue(&mut self, id: TaskId, context: TaskContext, machine: Box<dyn StateMachine>) {
        debug!(
            "Queueing {} task {} ({}) on {}",
            context.kind(),
            id,
            machine.name(),
            self.core.connection_string()
        );
        self.queue.push(Task::new(id, context, machine));
        self.core.task_added();
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    /// Parse an address in the driver's grammar without building a request
    pub fn parse_address(&self, address: &str) -> Result<FieldRef> {
        self.driver.parse_address(address)
    }

    /// Build a read request from `(name, address)` pairs
    pub fn create_read_request(&self, items: &[(&str, &str)]) -> Result<ReadRequest> {
        if !self.driver.supports_reading() {
            return Err(PlcError::unsupported(format!(
                "Driver '{}' does not support reading",
                self.driver.code()
            )));
        }
        if items.is_empty() {
            return Err(PlcError::unsupported("Read request without items"));
        }
        self.ensure_not_disconnecting()?;

        let items = items
            .iter()
            .map(|(name, address)| {
                Ok(ReadItem {
                    name: (*name).to_string(),
                    field: self.driver.parse_address(address)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ReadRequest::new(items))
    }

    /// Build a write request from `(name, address, value)` triples
    pub fn create_write_request(&self, items: &[(&str, &str, PlcValue)]) -> Result<WriteRequest> {
        if !self.driver.supports_writing() {
            return Err(PlcError::unsupported(format!(
                "Driver '{}' does not support writing",
                self.driver.code()
            )));
        }
        if items.is_empty() {
            return Err(PlcError::unsupported("Write request without items"));
        }
        self.ensure_not_disconnecting()?;

        let items = items
            .iter()
            .map(|(name, address, value)| {
                Ok(WriteItem {
                    name: (*name).to_string(),
                    field: self.driver.parse_address(address)?,
                    value: value.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(WriteRequest::new(items))
    }

    /// Queue a read and return its execution handle
    pub fn execute_read(&mut self, request: ReadRequest) -> Result<ReadExecution> {
        self.ensure_ready()?;
        let machine = self.driver.read_task(&request, &self.core)?;
        let id = self.allocate_task_id();
        let (execution, sink) = Execution::new(id);
        let context = TaskContext::Read(ReadContext {
            request,
            sink,
            deadline: Instant::now() + self.core.config().request_timeout(),
        });
        self.enqueue(id, context, machine);
        Ok(execution)
    }

    /// Queue a write and return its execution handle
    pub fn execute_write(&mut self, request: WriteRequest) -> Result<WriteExecution> {
        self.ensure_ready()?;
        let machine = self.driver.write_task(&request, &self.core)?;
        let id = self.allocate_task_id();
        let (execution, sink) = Execution::new(id);
        let context = TaskContext::Write(WriteContext {
            request,
            sink,
            deadline: Instant::now() + self.core.config().request_timeout(),
        });
        self.enqueue(id, context, machine);
        Ok(execution)
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Queue the driver's connect task
    ///
    /// Connecting an already connected connection completes the execution
    /// with `AlreadyConnected`.
    pub fn connect(&mut self) -> Result<ConnectExecution> {
        let machine = self.driver.connect_task(&self.core);
        let id = self.allocate_task_id();
        let (execution, sink) = Execution::new(id);
        let context = TaskContext::Connect(LifecycleContext {
            sink,
            deadline: Instant::now() + self.core.config().connect_timeout(),
        });
        self.enqueue(id, context, machine);
        Ok(execution)
    }

    /// Queue the driver's disconnect task
    ///
    /// Requests already queued run to completion first; new requests are
    /// refused with `NotConnected` from now on.
    pub fn disconnect(&mut self) -> Result<DisconnectExecution> {
        self.ensure_ready()?;
        let machine = self.driver.disconnect_task(&self.core);
        let id = self.allocate_task_id();
        let (execution, sink) = Execution::new(id);
        let context = TaskContext::Disconnect(LifecycleContext {
            sink,
            deadline: Instant::now() + self.core.config().request_timeout(),
        });
        self.enqueue(id, context, machine);
        self.core.set_disconnecting(true);
        Ok(execution)
    }

    /// One scheduler pass over this connection's queue
    pub fn poll_once(&mut self) -> PassStats {
        self.queue.run_pass(&mut self.core)
    }

    /// Close immediately, failing every queued task with `NotConnected`
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let aborted = self.queue.abort_all(&PlcError::NotConnected);
        self.core.running_tasks = 0;
        self.core.exchanges.clear();
        if self.core.transport().is_open() {
            if let Err(e) = self.core.transport_mut().close() {
                warn!("Closing transport of {} failed: {}", self.core.connection_string(), e);
            }
        }
        self.core.set_connected(false);
        if aborted > 0 {
            info!(
                "Closed {} with {} unfinished tasks",
                self.core.connection_string(),
                aborted
            );
        } else {
            debug!("Closed {}", self.core.connection_string());
        }
    }
}
