//! Simulated driver
//!
//! In-process data source for exercising the engine without a PLC.
//!
//! Address grammar: `[TYPE/]name:DATATYPE[[count]]`
//!
//! - `RANDOM/temp:REAL` reads a fresh random value on every read
//! - `STATE/setpoint:DINT[4]` reads back what was last written on this
//!   connection
//! - `STDOUT/trace:STRING` logs every written value
//!
//! `TYPE` defaults to `RANDOM`. Items that cannot serve the operation get a
//! per-item `InvalidAddress`; written values of the wrong shape get
//! `InvalidDatatype`.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use errors::{PlcError, ResponseCode, Result};
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, info};
use voltage_driver::{
    downcast_field, ConnectionConfig, ConnectionCore, ConnectionString, Driver, DriverFactory,
    FieldRef, PlcField, PlcValue, PlcValueType, ReadRequest, ReadResponse, StateId, StateMachine,
    StepOutcome, TaskContext, WriteRequest, WriteResponse,
};

/// Length of randomly generated strings
const RANDOM_STRING_LEN: usize = 8;

// ============================================================================
// Addresses
// ============================================================================

/// What a simulated field is backed by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedKind {
    Random,
    State,
    Stdout,
}

impl FromStr for SimulatedKind {
    type Err = PlcError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "RANDOM" => Ok(Self::Random),
            "STATE" => Ok(Self::State),
            "STDOUT" => Ok(Self::Stdout),
            other => Err(PlcError::invalid_address(format!(
                "Unknown simulated field type '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for SimulatedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Random => "RANDOM",
            Self::State => "STATE",
            Self::Stdout => "STDOUT",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedField {
    address: String,
    pub kind: SimulatedKind,
    pub name: String,
    pub value_type: PlcValueType,
    pub quantity: usize,
}

impl SimulatedField {
    pub fn parse(address: &str) -> Result<Self> {
        let invalid = |reason: &str| {
            PlcError::invalid_address(format!("'{}': {}", address, reason))
        };

        let (kind, rest) = match address.split_once('/') {
            Some((kind, rest)) => (kind.parse()?, rest),
            None => (SimulatedKind::Random, address),
        };
        let (name, type_part) = rest
            .split_once(':')
            .ok_or_else(|| invalid("expected name:DATATYPE"))?;
        if name.is_empty() {
            return Err(invalid("empty name"));
        }

        let (type_name, quantity) = match type_part.split_once('[') {
            Some((type_name, count)) => {
                let count = count
                    .strip_suffix(']')
                    .ok_or_else(|| invalid("unterminated element count"))?;
                let quantity = count
                    .parse::<usize>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| invalid("element count must be a positive integer"))?;
                (type_name, quantity)
            },
            None => (type_part, 1),
        };

        Ok(Self {
            address: address.to_string(),
            kind,
            name: name.to_string(),
            value_type: type_name.parse()?,
            quantity,
        })
    }

    /// Whether `value` has this field's type and element count
    fn accepts(&self, value: &PlcValue) -> bool {
        let shape_ok = match value {
            PlcValue::List(items) => self.quantity > 1 && items.len() == self.quantity,
            PlcValue::Null => false,
            _ => self.quantity == 1,
        };
        shape_ok && value.value_type() == Some(self.value_type)
    }
}

impl PlcField for SimulatedField {
    fn address(&self) -> &str {
        &self.address
    }

    fn value_type(&self) -> PlcValueType {
        self.value_type
    }

    fn quantity(&self) -> usize {
        self.quantity
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Values
// ============================================================================

fn random_scalar<R: Rng>(rng: &mut R, value_type: PlcValueType) -> PlcValue {
    match value_type {
        PlcValueType::Bool => PlcValue::Bool(rng.gen()),
        PlcValueType::Byte => PlcValue::Byte(rng.gen()),
        PlcValueType::Word => PlcValue::Word(rng.gen()),
        PlcValueType::Dword => PlcValue::Dword(rng.gen()),
        PlcValueType::Lword => PlcValue::Lword(rng.gen()),
        PlcValueType::Sint => PlcValue::Sint(rng.gen()),
        PlcValueType::Int => PlcValue::Int(rng.gen()),
        PlcValueType::Dint => PlcValue::Dint(rng.gen()),
        PlcValueType::Lint => PlcValue::Lint(rng.gen()),
        PlcValueType::Usint => PlcValue::Usint(rng.gen()),
        PlcValueType::Uint => PlcValue::Uint(rng.gen()),
        PlcValueType::Udint => PlcValue::Udint(rng.gen()),
        PlcValueType::Ulint => PlcValue::Ulint(rng.gen()),
        PlcValueType::Real => PlcValue::Real(rng.gen()),
        PlcValueType::Lreal => PlcValue::Lreal(rng.gen()),
        PlcValueType::Char => PlcValue::Char(char::from(rng.sample(Alphanumeric))),
        PlcValueType::String => PlcValue::String(
            rng.sample_iter(&Alphanumeric)
                .take(RANDOM_STRING_LEN)
                .map(char::from)
                .collect(),
        ),
    }
}

fn random_value(field: &SimulatedField) -> PlcValue {
    let mut rng = rand::thread_rng();
    if field.quantity == 1 {
        return random_scalar(&mut rng, field.value_type);
    }
    PlcValue::List(
        (0..field.quantity)
            .map(|_| random_scalar(&mut rng, field.value_type))
            .collect(),
    )
}

/// Values written to `STATE` fields, shared by the tasks of one connection
type StateStore = Arc<Mutex<HashMap<String, PlcValue>>>;

// ============================================================================
// State machines
// ============================================================================

const READ_INIT: StateId = StateId::new(0, "READ_INIT");
const READ_FINISHED: StateId = StateId::new(1, "READ_FINISHED");
const WRITE_INIT: StateId = StateId::new(0, "WRITE_INIT");
const WRITE_FINISHED: StateId = StateId::new(1, "WRITE_FINISHED");

struct SimulatedRead {
    store: StateStore,
    done: bool,
}

impl StateMachine for SimulatedRead {
    fn name(&self) -> &'static str {
        "simulated-read"
    }

    fn state(&self) -> StateId {
        if self.done {
            READ_FINISHED
        } else {
            READ_INIT
        }
    }

    fn step(&mut self, ctx: &mut TaskContext, _core: &mut ConnectionCore) -> Result<StepOutcome> {
        let read = ctx.as_read()?;
        let store = self.store.lock();
        let mut response = ReadResponse::new();

        for item in read.request.items() {
            let field = downcast_field::<SimulatedField>(item.field.as_ref())?;
            let (code, value) = match field.kind {
                SimulatedKind::Random => (ResponseCode::Ok, random_value(field)),
                SimulatedKind::State => match store.get(&field.name) {
                    Some(value) => (ResponseCode::Ok, value.clone()),
                    None => (ResponseCode::NotFound, PlcValue::Null),
                },
                SimulatedKind::Stdout => (ResponseCode::InvalidAddress, PlcValue::Null),
            };
            debug!("Simulated read {} -> {} ({})", field.address(), value, code);
            response.push(item.name.clone(), code, value);
        }

        read.sink.succeed(response);
        self.done = true;
        Ok(StepOutcome::Completed)
    }
}

struct SimulatedWrite {
    store: StateStore,
    done: bool,
}

impl StateMachine for SimulatedWrite {
    fn name(&self) -> &'static str {
        "simulated-write"
    }

    fn state(&self) -> StateId {
        if self.done {
            WRITE_FINISHED
        } else {
            WRITE_INIT
        }
    }

    fn step(&mut self, ctx: &mut TaskContext, _core: &mut ConnectionCore) -> Result<StepOutcome> {
        let write = ctx.as_write()?;
        let mut store = self.store.lock();
        let mut response = WriteResponse::new();

        for item in write.request.items() {
            let field = downcast_field::<SimulatedField>(item.field.as_ref())?;
            let code = match field.kind {
                SimulatedKind::Random => ResponseCode::InvalidAddress,
                _ if !field.accepts(&item.value) => {
                    debug!(
                        "Simulated write to {}: value is {:?} but field is {}[{}]",
                        field.address(),
                        item.value.value_type(),
                        field.value_type,
                        field.quantity
                    );
                    ResponseCode::InvalidDatatype
                },
                SimulatedKind::State => {
                    store.insert(field.name.clone(), item.value.clone());
                    ResponseCode::Ok
                },
                SimulatedKind::Stdout => {
                    info!(
                        "Simulated write ({}) {}: {}",
                        field.value_type, field.name, item.value
                    );
                    ResponseCode::Ok
                },
            };
            response.push(item.name.clone(), code);
        }

        write.sink.succeed(response);
        self.done = true;
        Ok(StepOutcome::Completed)
    }
}

// ============================================================================
// Driver
// ============================================================================

#[derive(Debug, Default)]
pub struct SimulatedDriver {
    store: StateStore,
}

impl SimulatedDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Driver for SimulatedDriver {
    fn code(&self) -> &'static str {
        "simulated"
    }

    fn parse_address(&self, address: &str) -> Result<FieldRef> {
        Ok(Arc::new(SimulatedField::parse(address)?))
    }

    fn read_task(
        &self,
        _request: &ReadRequest,
        _core: &ConnectionCore,
    ) -> Result<Box<dyn StateMachine>> {
        Ok(Box::new(SimulatedRead {
            store: Arc::clone(&self.store),
            done: false,
        }))
    }

    fn write_task(
        &self,
        _request: &WriteRequest,
        _core: &ConnectionCore,
    ) -> Result<Box<dyn StateMachine>> {
        Ok(Box::new(SimulatedWrite {
            store: Arc::clone(&self.store),
            done: false,
        }))
    }
}

/// `simulated` protocol; each connection gets its own state store
#[derive(Debug, Default)]
pub struct SimulatedDriverFactory;

impl DriverFactory for SimulatedDriverFactory {
    fn code(&self) -> &'static str {
        "simulated"
    }

    fn name(&self) -> &'static str {
        "Simulated Datasource"
    }

    fn default_transport(&self) -> Option<&'static str> {
        Some("dummy")
    }

    fn create(
        &self,
        _connection_string: &ConnectionString,
        _config: &ConnectionConfig,
    ) -> Result<Box<dyn Driver>> {
        Ok(Box::new(SimulatedDriver::new()))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use errors::ReturnCode;
    use std::time::Duration;
    use tracing_test::traced_test;
    use voltage_driver::transport::MockTransportFactory;
    use voltage_driver::{Connection, PlcSystem, Scheduler};

    fn connected() -> (Connection, Scheduler) {
        let system = PlcSystem::new();
        system.register_driver(Arc::new(SimulatedDriverFactory));
        system.register_transport(Arc::new(MockTransportFactory::default()));

        let (mut connection, connecting) = system.connect("simulated://local").unwrap();
        let mut scheduler = Scheduler::new().with_idle_sleep(Duration::ZERO);
        scheduler
            .run_until_finished(&mut connection, &connecting, Duration::from_secs(1))
            .unwrap();
        assert!(connection.is_connected());
        (connection, scheduler)
    }

    fn write(
        connection: &mut Connection,
        scheduler: &mut Scheduler,
        items: &[(&str, &str, PlcValue)],
    ) -> WriteResponse {
        let request = connection.create_write_request(items).unwrap();
        let writing = connection.execute_write(request).unwrap();
        scheduler
            .run_until_finished(connection, &writing, Duration::from_secs(1))
            .unwrap();
        writing.response().unwrap()
    }

    fn read(
        connection: &mut Connection,
        scheduler: &mut Scheduler,
        items: &[(&str, &str)],
    ) -> ReadResponse {
        let request = connection.create_read_request(items).unwrap();
        let reading = connection.execute_read(request).unwrap();
        scheduler
            .run_until_finished(connection, &reading, Duration::from_secs(1))
            .unwrap();
        reading.response().unwrap()
    }

    #[test]
    fn test_parse_address() {
        let field = SimulatedField::parse("STATE/setpoint:DINT[4]").unwrap();
        assert_eq!(field.kind, SimulatedKind::State);
        assert_eq!(field.name, "setpoint");
        assert_eq!(field.value_type, PlcValueType::Dint);
        assert_eq!(field.quantity, 4);

        let field = SimulatedField::parse("temp:INTEGER").unwrap();
        assert_eq!(field.kind, SimulatedKind::Random);
        assert_eq!(field.value_type, PlcValueType::Dint);
        assert_eq!(field.quantity, 1);

        for bad in [
            "FOO/x:INT",
            "x",
            ":INT",
            "RANDOM/x:NOPE",
            "RANDOM/x:INT[",
            "RANDOM/x:INT[0]",
            "RANDOM/x:INT[a]",
        ] {
            assert_eq!(
                SimulatedField::parse(bad).unwrap_err().code(),
                ReturnCode::InvalidAddress,
                "{}",
                bad
            );
        }
    }

    #[test]
    fn test_random_read() {
        let (mut connection, mut scheduler) = connected();
        let response = read(
            &mut connection,
            &mut scheduler,
            &[("a", "RANDOM/a:DINT"), ("b", "RANDOM/b:STRING"), ("c", "c:REAL[3]")],
        );
        assert!(matches!(response.value("a"), Some(PlcValue::Dint(_))));
        match response.value("b") {
            Some(PlcValue::String(s)) => assert_eq!(s.len(), RANDOM_STRING_LEN),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(response.value("c").unwrap().len(), 3);
        assert_eq!(
            response.value("c").unwrap().value_type(),
            Some(PlcValueType::Real)
        );
    }

    #[test]
    fn test_state_round_trip() {
        let (mut connection, mut scheduler) = connected();

        let before = read(&mut connection, &mut scheduler, &[("sp", "STATE/sp:INT")]);
        assert_eq!(before.get("sp").unwrap().code, ResponseCode::NotFound);

        let written = write(
            &mut connection,
            &mut scheduler,
            &[("sp", "STATE/sp:INT", PlcValue::Int(-12))],
        );
        assert!(written.all_ok());

        let after = read(&mut connection, &mut scheduler, &[("sp", "STATE/sp:INT")]);
        assert_eq!(after.value("sp"), Some(&PlcValue::Int(-12)));
    }

    #[test]
    fn test_state_is_per_connection() {
        let (mut first, mut scheduler) = connected();
        write(
            &mut first,
            &mut scheduler,
            &[("x", "STATE/x:BOOL", PlcValue::Bool(true))],
        );

        let (mut second, mut scheduler) = connected();
        let response = read(&mut second, &mut scheduler, &[("x", "STATE/x:BOOL")]);
        assert_eq!(response.get("x").unwrap().code, ResponseCode::NotFound);
    }

    #[test]
    fn test_write_response_codes() {
        let (mut connection, mut scheduler) = connected();
        let response = write(
            &mut connection,
            &mut scheduler,
            &[
                ("random", "RANDOM/r:INT", PlcValue::Int(1)),
                ("mismatch", "STDOUT/s:STRING", PlcValue::Int(1)),
                ("short", "STATE/l:INT[2]", PlcValue::Int(1)),
                ("list", "STATE/l:INT[2]", PlcValue::List(vec![PlcValue::Int(1), PlcValue::Int(2)])),
            ],
        );
        assert_eq!(response.code("random"), Some(ResponseCode::InvalidAddress));
        assert_eq!(response.code("mismatch"), Some(ResponseCode::InvalidDatatype));
        assert_eq!(response.code("short"), Some(ResponseCode::InvalidDatatype));
        assert_eq!(response.code("list"), Some(ResponseCode::Ok));
    }

    #[test]
    fn test_stdout_is_write_only() {
        let (mut connection, mut scheduler) = connected();
        let response = read(&mut connection, &mut scheduler, &[("s", "STDOUT/s:STRING")]);
        assert_eq!(response.get("s").unwrap().code, ResponseCode::InvalidAddress);
        assert_eq!(response.value("s"), None);
    }

    #[test]
    #[traced_test]
    fn test_stdout_write_is_logged() {
        let (mut connection, mut scheduler) = connected();
        let response = write(
            &mut connection,
            &mut scheduler,
            &[("s", "STDOUT/greeting:STRING", PlcValue::String("hello".into()))],
        );
        assert!(response.all_ok());
        assert!(logs_contain("Simulated write (STRING) greeting: \"hello\""));
    }

    #[test]
    fn test_single_step_operations() {
        let (mut connection, _) = connected();
        let request = connection
            .create_read_request(&[("a", "RANDOM/a:BOOL")])
            .unwrap();
        let reading = connection.execute_read(request).unwrap();
        connection.poll_once();
        assert!(reading.finished_successfully());
        assert!(connection.queue().is_empty());
    }
}
