//! Tasks and state machines
//!
//! A task is one unit of suspendable protocol work: a driver-supplied state
//! machine, the operation context it works on, and a completion flag. The
//! scheduler steps a task once per pass; a step either stays pending,
//! advances the state, completes, or fails with an error that the machine's
//! error policy turns into a retry or a failure.

use std::fmt;
use std::time::Instant;

use errors::{PlcError, Result};
use tracing::{debug, event, trace, Level};

use crate::connection::ConnectionCore;
use crate::execution::{
    ExecutionSink, ReadRequest, ReadResponse, TaskId, WriteRequest, WriteResponse,
};

// ============================================================================
// State machine contract
// ============================================================================

/// Identifier of a machine's current state
///
/// Ordinals follow declaration order, so a machine that only moves forward
/// reports non-decreasing ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateId {
    pub ordinal: u8,
    pub name: &'static str,
}

impl StateId {
    pub const fn new(ordinal: u8, name: &'static str) -> Self {
        Self { ordinal, name }
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Result of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Waiting on I/O; state unchanged
    Pending,
    /// Moved to another state
    Advanced,
    /// The operation is over and its result delivered
    Completed,
}

/// Decision of a machine's error policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Keep the task and step the current state again
    Retry,
    /// Record the failure in the execution and complete the task
    Fail,
}

/// Driver-supplied behavior of a task
pub trait StateMachine: Send {
    /// Machine name for logs, e.g. `modbus-read`
    fn name(&self) -> &'static str;

    fn state(&self) -> StateId;

    /// Run the current state once
    fn step(&mut self, ctx: &mut TaskContext, core: &mut ConnectionCore) -> Result<StepOutcome>;

    /// Error policy; fails the task unless overridden
    fn on_error(&mut self, _err: &PlcError) -> ErrorAction {
        ErrorAction::Fail
    }

    /// Called once when the task completes, however it ends
    ///
    /// Machines give back connection state they hold here, such as an
    /// open exchange or exclusive use of the transport.
    fn release(&mut self, _core: &mut ConnectionCore) {}
}

// ============================================================================
// Operation contexts
// ============================================================================

/// Kind of operation a task performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Connect,
    Disconnect,
    Read,
    Write,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Read => "read",
            Self::Write => "write",
        };
        write!(f, "{}", name)
    }
}

/// Context of a connect or disconnect task
#[derive(Debug)]
pub struct LifecycleContext {
    pub sink: ExecutionSink<()>,
    pub deadline: Instant,
}

#[derive(Debug)]
pub struct ReadContext {
    pub request: ReadRequest,
    pub sink: ExecutionSink<ReadResponse>,
    pub deadline: Instant,
}

#[derive(Debug)]
pub struct WriteContext {
    pub request: WriteRequest,
    pub sink: ExecutionSink<WriteResponse>,
    pub deadline: Instant,
}

/// Tagged per-operation context owned by a task
#[derive(Debug)]
pub enum TaskContext {
    Connect(LifecycleContext),
    Disconnect(LifecycleContext),
    Read(ReadContext),
    Write(WriteContext),
}

fn wrong_context(expected: TaskKind, actual: TaskKind) -> PlcError {
    PlcError::internal(format!(
        "Expected a {} context, got a {} context",
        expected, actual
    ))
}

impl TaskContext {
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Connect(_) => TaskKind::Connect,
            Self::Disconnect(_) => TaskKind::Disconnect,
            Self::Read(_) => TaskKind::Read,
            Self::Write(_) => TaskKind::Write,
        }
    }

    pub fn deadline(&self) -> Instant {
        match self {
            Self::Connect(ctx) | Self::Disconnect(ctx) => ctx.deadline,
            Self::Read(ctx) => ctx.deadline,
            Self::Write(ctx) => ctx.deadline,
        }
    }

    /// Fail with `Timeout` once the deadline has passed
    pub fn check_deadline(&self) -> Result<()> {
        if Instant::now() >= self.deadline() {
            return Err(PlcError::timeout(format!(
                "{} did not complete in time",
                self.kind()
            )));
        }
        Ok(())
    }

    /// Nobody waits for the result any more
    ///
    /// Only read and write tasks are abandoned this way; connect and
    /// disconnect change connection state and always run to the end.
    pub fn is_released(&self) -> bool {
        match self {
            Self::Read(ctx) => ctx.sink.is_released(),
            Self::Write(ctx) => ctx.sink.is_released(),
            Self::Connect(_) | Self::Disconnect(_) => false,
        }
    }

    /// A result has been delivered (or there is nobody to deliver to)
    pub fn is_resolved(&self) -> bool {
        match self {
            Self::Connect(ctx) | Self::Disconnect(ctx) => {
                ctx.sink.is_resolved() || ctx.sink.is_released()
            },
            Self::Read(ctx) => ctx.sink.is_resolved() || ctx.sink.is_released(),
            Self::Write(ctx) => ctx.sink.is_resolved() || ctx.sink.is_released(),
        }
    }

    /// Record a failure in the execution
    pub fn fail(&self, err: PlcError) {
        match self {
            Self::Connect(ctx) | Self::Disconnect(ctx) => ctx.sink.fail(err),
            Self::Read(ctx) => ctx.sink.fail(err),
            Self::Write(ctx) => ctx.sink.fail(err),
        };
    }

    pub fn as_lifecycle(&self) -> Result<&LifecycleContext> {
        match self {
            Self::Connect(ctx) | Self::Disconnect(ctx) => Ok(ctx),
            other => Err(wrong_context(TaskKind::Connect, other.kind())),
        }
    }

    pub fn as_read(&self) -> Result<&ReadContext> {
        match self {
            Self::Read(ctx) => Ok(ctx),
            other => Err(wrong_context(TaskKind::Read, other.kind())),
        }
    }

    pub fn as_write(&self) -> Result<&WriteContext> {
        match self {
            Self::Write(ctx) => Ok(ctx),
            other => Err(wrong_context(TaskKind::Write, other.kind())),
        }
    }
}

// ============================================================================
// Task
// ============================================================================

/// A queued unit of work
pub struct Task {
    id: TaskId,
    context: TaskContext,
    machine: Box<dyn StateMachine>,
    completed: bool,
    steps: u64,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("kind", &self.context.kind())
            .field("machine", &self.machine.name())
            .field("state", &self.machine.state())
            .field("completed", &self.completed)
            .field("steps", &self.steps)
            .finish()
    }
}

impl Task {
    pub fn new(id: TaskId, context: TaskContext, machine: Box<dyn StateMachine>) -> Self {
        Self {
            id,
            context,
            machine,
            completed: false,
            steps: 0,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.context.kind()
    }

    pub fn state(&self) -> StateId {
        self.machine.state()
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Number of steps run so far
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Step the task once; returns `true` when it is completed
    ///
    /// A completed task is never stepped again. A read or write whose
    /// execution handle was dropped is discarded without stepping.
    pub fn poll(&mut self, core: &mut ConnectionCore) -> bool {
        if self.completed {
            return true;
        }
        if self.context.is_released() {
            debug!(
                "Task {} ({}) discarded: execution dropped in state {}",
                self.id,
                self.context.kind(),
                self.machine.state()
            );
            self.completed = true;
            self.machine.release(core);
            return true;
        }

        self.steps += 1;
        let before = self.machine.state();
        match self.machine.step(&mut self.context, core) {
            Ok(StepOutcome::Completed) => {
                if !self.context.is_resolved() {
                    self.context.fail(PlcError::internal(format!(
                        "{} completed without a result",
                        self.machine.name()
                    )));
                }
                debug!(
                    "Task {} ({}) completed after {} steps",
                    self.id, self.machine.name(), self.steps
                );
                self.completed = true;
            },
            Ok(StepOutcome::Advanced) => {
                trace!(
                    "Task {} ({}): {} -> {}",
                    self.id,
                    self.machine.name(),
                    before,
                    self.machine.state()
                );
            },
            Ok(StepOutcome::Pending) => {},
            Err(err) => match self.machine.on_error(&err) {
                ErrorAction::Retry => {
                    debug!(
                        "Task {} ({}) retrying {} after: {}",
                        self.id,
                        self.machine.name(),
                        self.machine.state(),
                        err
                    );
                },
                ErrorAction::Fail => {
                    log_failure(self.id, self.machine.name(), &err);
                    self.context.fail(err);
                    self.completed = true;
                },
            },
        }
        if self.completed {
            self.machine.release(core);
        }
        self.completed
    }

    /// Fail the task from outside, e.g. when its connection is closed
    pub(crate) fn abort(&mut self, err: PlcError) {
        if !self.completed {
            self.context.fail(err);
            self.completed = true;
        }
    }
}

fn log_failure(id: TaskId, machine: &str, err: &PlcError) {
    match err.log_level() {
        Level::ERROR => event!(Level::ERROR, "Task {} ({}) failed: {}", id, machine, err),
        Level::WARN => event!(Level::WARN, "Task {} ({}) failed: {}", id, machine, err),
        _ => event!(Level::INFO, "Task {} ({}) failed: {}", id, machine, err),
    }
}
