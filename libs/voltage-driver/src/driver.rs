//! Driver contract
//!
//! A driver supplies the address grammar of its protocol and builds the
//! state machines for connect, disconnect, read and write. Drivers are
//! registered with a [`crate::PlcSystem`] through a [`DriverFactory`]; each
//! connection gets its own driver instance.

use std::fmt;

use errors::{PlcError, Result};

use crate::config::ConnectionConfig;
use crate::connection::ConnectionCore;
use crate::connection_string::ConnectionString;
use crate::execution::{ReadRequest, WriteRequest};
use crate::field::FieldRef;
use crate::lifecycle::{ConnectMachine, DisconnectMachine};
use crate::task::StateMachine;

/// Protocol implementation bound to one connection
pub trait Driver: Send + fmt::Debug {
    /// Protocol code used in connection strings
    fn code(&self) -> &'static str;

    fn supports_reading(&self) -> bool {
        true
    }

    fn supports_writing(&self) -> bool {
        true
    }

    /// Parse and validate an address in this driver's grammar
    fn parse_address(&self, address: &str) -> Result<FieldRef>;

    /// Connect: open the transport and mark the connection connected
    fn connect_task(&self, core: &ConnectionCore) -> Box<dyn StateMachine> {
        Box::new(ConnectMachine::new(core.config().max_retries))
    }

    /// Disconnect: wait for running tasks, then close the transport
    fn disconnect_task(&self, _core: &ConnectionCore) -> Box<dyn StateMachine> {
        Box::new(DisconnectMachine::new())
    }

    fn read_task(
        &self,
        _request: &ReadRequest,
        _core: &ConnectionCore,
    ) -> Result<Box<dyn StateMachine>> {
        Err(PlcError::unsupported(format!(
            "Driver '{}' does not support reading",
            self.code()
        )))
    }

    fn write_task(
        &self,
        _request: &WriteRequest,
        _core: &ConnectionCore,
    ) -> Result<Box<dyn StateMachine>> {
        Err(PlcError::unsupported(format!(
            "Driver '{}' does not support writing",
            self.code()
        )))
    }
}

/// Registers a protocol and creates its drivers
pub trait DriverFactory: Send + Sync {
    /// Protocol code used in connection strings
    fn code(&self) -> &'static str;

    /// Human readable protocol name
    fn name(&self) -> &'static str;

    /// Transport used when the connection string names none
    fn default_transport(&self) -> Option<&'static str> {
        None
    }

    /// Port used by network transports when the connect info has none
    fn default_port(&self) -> Option<u16> {
        None
    }

    fn create(
        &self,
        connection_string: &ConnectionString,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn Driver>>;
}
