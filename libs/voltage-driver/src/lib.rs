//! VoltageEMS PLC driver engine
//!
//! Protocol-independent runtime for PLC drivers:
//! - `task` / `queue` / `scheduler`: step-once state machines driven by a
//!   cooperative round-robin poll loop
//! - `connection` / `execution`: caller-owned connections and the handles
//!   that correlate queued tasks with their responses
//! - `transport`: non-blocking frame transports (TCP and a scripted mock)
//! - `system`: driver and transport registry, connection strings, config
//!
//! No async runtime is involved; callers own the loop.

pub mod config;
pub mod connection;
pub mod connection_string;
pub mod driver;
pub mod exchange;
pub mod execution;
pub mod field;
pub mod lifecycle;
pub mod queue;
pub mod scheduler;
pub mod system;
pub mod task;
pub mod transport;
pub mod value;

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod testing;

pub use config::ConnectionConfig;
pub use connection::{Connection, ConnectionCore};
pub use connection_string::ConnectionString;
pub use driver::{Driver, DriverFactory};
pub use exchange::PendingExchanges;
pub use execution::{
    ConnectExecution, DisconnectExecution, Execution, ExecutionSink, ReadExecution, ReadItem,
    ReadRequest, ReadResponse, ReadResponseItem, TaskId, WriteExecution, WriteItem, WriteRequest,
    WriteResponse, WriteResponseItem,
};
pub use field::{downcast_field, FieldRef, PlcField};
pub use queue::{PassStats, TaskQueue};
pub use scheduler::Scheduler;
pub use system::PlcSystem;
pub use task::{
    ErrorAction, LifecycleContext, ReadContext, StateId, StateMachine, StepOutcome, Task,
    TaskContext, TaskKind, WriteContext,
};
pub use transport::{
    FrameCheck, OpenStatus, Transport, TransportFactory, TransportStats, TransportTarget,
};
pub use value::{PlcValue, PlcValueType};

// Re-export shared crates so drivers see one version
pub use errors::{PlcError, ResponseCode, Result, ReturnCode};
pub use voltage_codec;
