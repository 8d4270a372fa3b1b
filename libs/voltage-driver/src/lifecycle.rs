//! Connect and disconnect state machines
//!
//! Shared by drivers whose connection setup is just opening the transport.
//!
//! Connect:    INIT → TRANSPORT_CONNECT → FINISHED
//! Disconnect: INIT → WAIT_TASKS_FINISHED → FINISHED

use errors::{PlcError, Result};
use tracing::{info, warn};

use crate::connection::ConnectionCore;
use crate::task::{ErrorAction, StateId, StateMachine, StepOutcome, TaskContext};
use crate::transport::OpenStatus;

// ============================================================================
// Connect
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
    Init,
    TransportConnect,
    Finished,
}

impl ConnectState {
    pub fn id(self) -> StateId {
        match self {
            Self::Init => StateId::new(0, "INIT"),
            Self::TransportConnect => StateId::new(1, "TRANSPORT_CONNECT"),
            Self::Finished => StateId::new(2, "FINISHED"),
        }
    }
}

/// Opens the transport and marks the connection connected
#[derive(Debug)]
pub struct ConnectMachine {
    state: ConnectState,
    attempts: u32,
    max_retries: u32,
    /// An open was started and reported `Connecting`
    opening: bool,
}

impl ConnectMachine {
    pub fn new(max_retries: u32) -> Self {
        Self {
            state: ConnectState::Init,
            attempts: 0,
            max_retries,
            opening: false,
        }
    }
}

impl StateMachine for ConnectMachine {
    fn name(&self) -> &'static str {
        "connect"
    }

    fn state(&self) -> StateId {
        self.state.id()
    }

    fn step(&mut self, ctx: &mut TaskContext, core: &mut ConnectionCore) -> Result<StepOutcome> {
        let lifecycle = ctx.as_lifecycle()?;
        match self.state {
            ConnectState::Init => {
                if core.is_connected() {
                    return Err(PlcError::AlreadyConnected);
                }
                self.state = ConnectState::TransportConnect;
                Ok(StepOutcome::Advanced)
            },
            ConnectState::TransportConnect => {
                ctx.check_deadline()?;
                if !self.opening {
                    self.attempts += 1;
                }
                match core.transport_mut().open() {
                    Ok(OpenStatus::Open) => {
                        self.opening = false;
                        self.state = ConnectState::Finished;
                        Ok(StepOutcome::Advanced)
                    },
                    Ok(OpenStatus::Connecting) => {
                        self.opening = true;
                        Ok(StepOutcome::Pending)
                    },
                    Err(e) => {
                        self.opening = false;
                        Err(e)
                    },
                }
            },
            ConnectState::Finished => {
                core.set_connected(true);
                core.set_disconnecting(false);
                info!("Connected {}", core.connection_string());
                lifecycle.sink.succeed(());
                Ok(StepOutcome::Completed)
            },
        }
    }

    fn on_error(&mut self, err: &PlcError) -> ErrorAction {
        if self.state == ConnectState::TransportConnect
            && err.is_retryable()
            && self.attempts <= self.max_retries
        {
            warn!(
                "Connect attempt {}/{} failed: {}",
                self.attempts,
                self.max_retries + 1,
                err
            );
            return ErrorAction::Retry;
        }
        ErrorAction::Fail
    }
}

// ============================================================================
// Disconnect
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectState {
    Init,
    WaitTasksFinished,
    Finished,
}

impl DisconnectState {
    pub fn id(self) -> StateId {
        match self {
            Self::Init => StateId::new(0, "INIT"),
            Self::WaitTasksFinished => StateId::new(1, "WAIT_TASKS_FINISHED"),
            Self::Finished => StateId::new(2, "FINISHED"),
        }
    }
}

/// Lets queued requests finish, then closes the transport
#[derive(Debug)]
pub struct DisconnectMachine {
    state: DisconnectState,
}

impl Default for DisconnectMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl DisconnectMachine {
    pub fn new() -> Self {
        Self {
            state: DisconnectState::Init,
        }
    }
}

impl StateMachine for DisconnectMachine {
    fn name(&self) -> &'static str {
        "disconnect"
    }

    fn state(&self) -> StateId {
        self.state.id()
    }

    fn step(&mut self, ctx: &mut TaskContext, core: &mut ConnectionCore) -> Result<StepOutcome> {
        let lifecycle = ctx.as_lifecycle()?;
        match self.state {
            DisconnectState::Init => {
                if !core.is_connected() {
                    core.set_disconnecting(false);
                    return Err(PlcError::NotConnected);
                }
                // Already set when the task was queued; kept for tasks built directly
                core.set_disconnecting(true);
                self.state = DisconnectState::WaitTasksFinished;
                Ok(StepOutcome::Advanced)
            },
            DisconnectState::WaitTasksFinished => {
                // The disconnect task itself is one of the running tasks
                if core.running_tasks() > 1 {
                    return Ok(StepOutcome::Pending);
                }
                self.state = DisconnectState::Finished;
                Ok(StepOutcome::Advanced)
            },
            DisconnectState::Finished => {
                if let Err(e) = core.transport_mut().close() {
                    warn!("Closing transport of {} failed: {}", core.connection_string(), e);
                }
                core.exchanges_mut().clear();
                core.set_connected(false);
                core.set_disconnecting(false);
                info!("Disconnected {}", core.connection_string());
                lifecycle.sink.succeed(());
                Ok(StepOutcome::Completed)
            },
        }
    }
}
