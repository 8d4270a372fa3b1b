//! Shared fixtures for the engine's unit tests

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use errors::{PlcError, ResponseCode, Result};

use crate::config::ConnectionConfig;
use crate::connection::{Connection, ConnectionCore};
use crate::driver::Driver;
use crate::execution::{Execution, ReadRequest, ReadResponse, TaskId, WriteRequest, WriteResponse};
use crate::field::{FieldRef, PlcField};
use crate::task::{
    ErrorAction, ReadContext, StateId, StateMachine, StepOutcome, Task, TaskContext,
};
use crate::transport::{MockHandle, MockTransport};
use crate::value::{PlcValue, PlcValueType};

const STEP_NAMES: [&str; 8] = [
    "STEP_0", "STEP_1", "STEP_2", "STEP_3", "STEP_4", "STEP_5", "STEP_6", "STEP_7",
];

pub fn core_with(handle: MockHandle) -> ConnectionCore {
    ConnectionCore::new(
        "test://local".parse().unwrap(),
        ConnectionConfig::default(),
        Box::new(MockTransport::new(handle)),
    )
}

pub fn core_for_tests() -> ConnectionCore {
    core_with(MockHandle::new())
}

pub fn connection_for_tests(driver: TestDriver) -> (Connection, MockHandle) {
    let handle = MockHandle::new();
    let connection = Connection::new(core_with(handle.clone()), Box::new(driver));
    (connection, handle)
}

pub fn read_task_with(id: TaskId, machine: Box<dyn StateMachine>) -> (Task, Execution<ReadResponse>) {
    let (execution, sink) = Execution::new(id);
    let ctx = TaskContext::Read(ReadContext {
        request: ReadRequest::new(Vec::new()),
        sink,
        deadline: Instant::now() + Duration::from_secs(5),
    });
    (Task::new(id, ctx, machine), execution)
}

/// Machine that needs `total` steps and moves one state per step
pub struct CountingMachine {
    done: usize,
    total: usize,
    fail_at: Option<(usize, PlcError)>,
    retry: bool,
    deliver: bool,
    token: Option<u16>,
}

impl CountingMachine {
    pub fn new(total: usize) -> Self {
        Self {
            done: 0,
            total,
            fail_at: None,
            retry: false,
            deliver: true,
            token: None,
        }
    }

    /// Hold the transport exclusively from the first step until released
    pub fn holding_transport(mut self, token: u16) -> Self {
        self.token = Some(token);
        self
    }

    /// Fail once when about to run step `index`
    pub fn failing_at(mut self, index: usize, err: PlcError) -> Self {
        self.fail_at = Some((index, err));
        self
    }

    pub fn retrying(mut self) -> Self {
        self.retry = true;
        self
    }

    /// Complete without delivering a result
    pub fn silent(mut self) -> Self {
        self.deliver = false;
        self
    }
}

impl StateMachine for CountingMachine {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn state(&self) -> StateId {
        let index = self.done.min(STEP_NAMES.len() - 1);
        StateId::new(index as u8, STEP_NAMES[index])
    }

    fn step(&mut self, ctx: &mut TaskContext, core: &mut ConnectionCore) -> Result<StepOutcome> {
        if let Some(token) = self.token {
            if !core.exchanges_mut().try_acquire(token) {
                return Ok(StepOutcome::Pending);
            }
        }
        if matches!(&self.fail_at, Some((index, _)) if *index == self.done) {
            if let Some((_, err)) = self.fail_at.take() {
                return Err(err);
            }
        }
        self.done += 1;
        if self.done < self.total {
            return Ok(StepOutcome::Advanced);
        }
        if self.deliver {
            match ctx {
                TaskContext::Read(read) => {
                    read.sink.succeed(ReadResponse::new());
                },
                TaskContext::Write(write) => {
                    write.sink.succeed(WriteResponse::new());
                },
                TaskContext::Connect(lifecycle) | TaskContext::Disconnect(lifecycle) => {
                    lifecycle.sink.succeed(());
                },
            }
        }
        Ok(StepOutcome::Completed)
    }

    fn on_error(&mut self, _err: &PlcError) -> ErrorAction {
        if self.retry {
            ErrorAction::Retry
        } else {
            ErrorAction::Fail
        }
    }

    fn release(&mut self, core: &mut ConnectionCore) {
        if let Some(token) = self.token {
            core.exchanges_mut().release(token);
        }
    }
}

#[derive(Debug)]
pub struct TestField {
    address: String,
}

impl PlcField for TestField {
    fn address(&self) -> &str {
        &self.address
    }

    fn value_type(&self) -> PlcValueType {
        PlcValueType::Bool
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Driver whose reads take two steps and return `true` for every item
#[derive(Debug)]
pub struct TestDriver {
    writable: bool,
}

impl Default for TestDriver {
    fn default() -> Self {
        Self { writable: true }
    }
}

impl TestDriver {
    pub fn read_only() -> Self {
        Self { writable: false }
    }
}

struct TestReadMachine {
    stepped: bool,
}

impl StateMachine for TestReadMachine {
    fn name(&self) -> &'static str {
        "test-read"
    }

    fn state(&self) -> StateId {
        if self.stepped {
            StateId::new(1, "FINISHED")
        } else {
            StateId::new(0, "INIT")
        }
    }

    fn step(&mut self, ctx: &mut TaskContext, _core: &mut ConnectionCore) -> Result<StepOutcome> {
        let read = ctx.as_read()?;
        if !self.stepped {
            self.stepped = true;
            return Ok(StepOutcome::Advanced);
        }
        let mut response = ReadResponse::new();
        for item in read.request.items() {
            response.push(item.name.clone(), ResponseCode::Ok, PlcValue::Bool(true));
        }
        read.sink.succeed(response);
        Ok(StepOutcome::Completed)
    }
}

impl Driver for TestDriver {
    fn code(&self) -> &'static str {
        "test"
    }

    fn supports_writing(&self) -> bool {
        self.writable
    }

    fn parse_address(&self, address: &str) -> Result<FieldRef> {
        if address.is_empty() {
            return Err(PlcError::invalid_address("empty address"));
        }
        Ok(Arc::new(TestField {
            address: address.to_string(),
        }))
    }

    fn read_task(
        &self,
        _request: &ReadRequest,
        _core: &ConnectionCore,
    ) -> Result<Box<dyn StateMachine>> {
        Ok(Box::new(TestReadMachine { stepped: false }))
    }

    fn write_task(
        &self,
        _request: &WriteRequest,
        _core: &ConnectionCore,
    ) -> Result<Box<dyn StateMachine>> {
        Ok(Box::new(CountingMachine::new(1)))
    }
}
