//! Modbus driver
//!
//! Each request item becomes one Modbus transaction. Read and write tasks
//! walk their items in order, alternating between sending a request and
//! waiting for the matching response:
//!
//! ```text
//! SEND_REQUEST ──send──▶ RECEIVE_RESPONSE ──frame──▶ SEND_REQUEST (next item)
//!      ▲                        │
//!      └── retryable error ─────┘          last item ──▶ completed
//! ```
//!
//! Exception responses fail only their own item (`REMOTE_ERROR`); transport
//! and checksum errors resend the current item up to `max_retries` times.
//!
//! Several tasks may share one connection. Modbus TCP keeps every request
//! open in the connection's pending exchanges so a task that reads another
//! task's response parks it for its owner. RTU responses carry no
//! transaction id, so RTU tasks take turns holding the transport for one
//! request/response exchange at a time.

use std::sync::Arc;

use bytes::Bytes;
use errors::{PlcError, ResponseCode, Result};
use tracing::{debug, warn};
use voltage_codec::{ByteOrder, ChecksumPolicy, Message};
use voltage_driver::{
    downcast_field, ConnectionConfig, ConnectionCore, ConnectionString, Driver, DriverFactory,
    ErrorAction, FieldRef, PlcValue, ReadRequest, ReadResponse, StateId, StateMachine,
    StepOutcome, TaskContext, WriteItem, WriteRequest, WriteResponse,
};

use super::address::{ModbusArea, ModbusField};
use super::adu::{
    mbap_transaction_id, rtu_response_frame_check, tcp_frame_check, RtuAdu, RtuContext, TcpAdu,
    MBAP_HEADER_LEN,
};
use super::codec;
use super::pdu::{Direction, FunctionCode, ModbusPdu};

/// Framing of the Modbus ADU on the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModbusFraming {
    /// MBAP header, TCP port 502
    Tcp,
    /// Unit id + PDU + CRC-16, usually over a serial line or a TCP gateway
    Rtu,
}

const SEND_REQUEST: StateId = StateId::new(0, "SEND_REQUEST");
const RECEIVE_RESPONSE: StateId = StateId::new(1, "RECEIVE_RESPONSE");

// ============================================================================
// Transaction - one request/response exchange
// ============================================================================

/// Send side and receive side of the exchange for the current item
#[derive(Debug)]
struct Transaction {
    framing: ModbusFraming,
    unit_id: u8,
    checksum_policy: ChecksumPolicy,
    max_retries: u32,
    /// Open exchange awaiting its response (TCP)
    transaction_id: Option<u16>,
    /// Token under which the transport is held exclusively (RTU)
    token: Option<u16>,
    function: Option<FunctionCode>,
    attempts: u32,
}

impl Transaction {
    fn new(framing: ModbusFraming, config: &ConnectionConfig) -> Self {
        Self {
            framing,
            unit_id: config.unit_id,
            checksum_policy: config.checksum_policy,
            max_retries: config.max_retries,
            transaction_id: None,
            token: None,
            function: None,
            attempts: 0,
        }
    }

    /// Claim the transport before sending
    ///
    /// Always granted for TCP. An RTU exchange waits until no other task
    /// holds the transport.
    fn acquire(&mut self, core: &mut ConnectionCore) -> bool {
        match self.framing {
            ModbusFraming::Tcp => true,
            ModbusFraming::Rtu => {
                let token = match self.token {
                    Some(token) => token,
                    None => {
                        let token = core.next_transaction_id();
                        self.token = Some(token);
                        token
                    },
                };
                core.exchanges_mut().try_acquire(token)
            },
        }
    }

    /// Close the answered exchange and start over for the next item
    fn finish(&mut self, core: &mut ConnectionCore) {
        self.release(core);
        self.function = None;
        self.attempts = 0;
    }

    /// Give back the open exchange and the transport
    fn release(&mut self, core: &mut ConnectionCore) {
        if let Some(id) = self.transaction_id.take() {
            core.exchanges_mut().close(id);
        }
        if let Some(token) = self.token {
            core.exchanges_mut().release(token);
        }
    }

    fn send(&mut self, core: &mut ConnectionCore, pdu: &ModbusPdu) -> Result<()> {
        let frame: Bytes = match self.framing {
            ModbusFraming::Tcp => {
                if let Some(previous) = self.transaction_id.take() {
                    core.exchanges_mut().close(previous);
                }
                let id = core.next_transaction_id();
                let frame = TcpAdu {
                    transaction_id: id,
                    unit_id: self.unit_id,
                    pdu: pdu.clone(),
                }
                .to_bytes()?;
                core.exchanges_mut().open(id);
                self.transaction_id = Some(id);
                frame
            },
            ModbusFraming::Rtu => {
                discard_stale_rtu_frames(core)?;
                RtuAdu {
                    unit_id: self.unit_id,
                    pdu: pdu.clone(),
                }
                .to_bytes()?
            },
        };
        if frame.len() > core.config().max_message_size {
            return Err(PlcError::NoMemory(format!(
                "{}-byte frame exceeds max_message_size {}",
                frame.len(),
                core.config().max_message_size
            )));
        }

        self.attempts += 1;
        self.function = Some(pdu.function());
        debug!(
            "Modbus {} request to unit {} (attempt {})",
            pdu.function().description(),
            self.unit_id,
            self.attempts
        );
        core.transport_mut().send_message(frame)
    }

    /// Next response belonging to this exchange, if one has arrived
    fn receive(&mut self, core: &mut ConnectionCore) -> Result<Option<ModbusPdu>> {
        let (unit_id, pdu) = match self.framing {
            ModbusFraming::Tcp => {
                let Some(id) = self.transaction_id else {
                    return Err(PlcError::internal("Modbus TCP receive without an open transaction"));
                };
                let Some(frame) = next_tcp_response(core, id)? else {
                    return Ok(None);
                };
                let adu = TcpAdu::from_bytes(&frame, Direction::Response)?;
                (adu.unit_id, adu.pdu)
            },
            ModbusFraming::Rtu => {
                let Some(frame) = core
                    .transport_mut()
                    .select_message(3, &rtu_response_frame_check)?
                else {
                    return Ok(None);
                };
                let adu = RtuAdu::from_bytes(
                    &frame,
                    RtuContext {
                        direction: Direction::Response,
                        checksum_policy: self.checksum_policy,
                    },
                )?;
                (adu.unit_id, adu.pdu)
            },
        };

        if unit_id != self.unit_id {
            warn!(
                "Dropping Modbus response from unit {} while waiting for unit {}",
                unit_id, self.unit_id
            );
            return Ok(None);
        }
        if Some(pdu.function()) != self.function {
            return Err(PlcError::parse(format!(
                "Modbus response carries {} but {:?} was requested",
                pdu.function().description(),
                self.function.map(|f| f.description())
            )));
        }
        Ok(Some(pdu))
    }

    fn should_retry(&self, err: &PlcError) -> bool {
        err.is_retryable() && self.attempts <= self.max_retries
    }
}

/// Response to transaction `id`
///
/// Frames answering other open transactions are parked for their tasks;
/// frames nobody waits for are dropped.
fn next_tcp_response(core: &mut ConnectionCore, id: u16) -> Result<Option<Bytes>> {
    if let Some(frame) = core.exchanges_mut().take(id) {
        return Ok(Some(frame));
    }
    while let Some(frame) = core
        .transport_mut()
        .select_message(MBAP_HEADER_LEN, &tcp_frame_check)?
    {
        match mbap_transaction_id(&frame) {
            Some(found) if found == id => return Ok(Some(frame)),
            Some(found) => {
                if core.exchanges_mut().route(found, frame) {
                    debug!(
                        "Modbus response for transaction {} parked while waiting for {}",
                        found, id
                    );
                } else {
                    warn!(
                        "Dropping Modbus response for transaction {} while waiting for {}",
                        found, id
                    );
                }
            },
            None => warn!("Dropping truncated Modbus TCP frame"),
        }
    }
    Ok(None)
}

/// Late RTU replies left in the receive buffer belong to finished exchanges
fn discard_stale_rtu_frames(core: &mut ConnectionCore) -> Result<()> {
    while let Some(frame) = core
        .transport_mut()
        .select_message(3, &rtu_response_frame_check)?
    {
        warn!("Dropping stale {}-byte Modbus RTU frame", frame.len());
    }
    Ok(())
}

fn exception_code(pdu: &ModbusPdu, address: &str) -> Option<ResponseCode> {
    if let ModbusPdu::Exception { function, code } = pdu {
        warn!(
            "Modbus exception for {}: {} ({})",
            address,
            code.description(),
            function.description()
        );
        return Some(ResponseCode::RemoteError);
    }
    None
}

// ============================================================================
// Read
// ============================================================================

struct ModbusRead {
    transaction: Transaction,
    byte_order: ByteOrder,
    item: usize,
    waiting: bool,
    response: ReadResponse,
}

impl ModbusRead {
    fn decode(&self, field: &ModbusField, pdu: ModbusPdu) -> Result<(ResponseCode, PlcValue)> {
        if let Some(code) = exception_code(&pdu, &field.to_string()) {
            return Ok((code, PlcValue::Null));
        }
        let ModbusPdu::ReadResponse { data, .. } = pdu else {
            return Err(PlcError::parse("Modbus read answered with a non-read PDU"));
        };
        let decoded = if field.area.is_bit() {
            codec::decode_bits(field, &data)
        } else {
            codec::decode_registers(field, &data, self.byte_order)
        };
        match decoded {
            Ok(value) => Ok((ResponseCode::Ok, value)),
            Err(e) => {
                warn!("Modbus read of {} returned unusable data: {}", field, e);
                Ok((ResponseCode::InvalidDatatype, PlcValue::Null))
            },
        }
    }
}

impl StateMachine for ModbusRead {
    fn name(&self) -> &'static str {
        "modbus-read"
    }

    fn state(&self) -> StateId {
        if self.waiting {
            RECEIVE_RESPONSE
        } else {
            SEND_REQUEST
        }
    }

    fn step(&mut self, ctx: &mut TaskContext, core: &mut ConnectionCore) -> Result<StepOutcome> {
        let read = ctx.as_read()?;
        let items = read.request.items();
        let Some(item) = items.get(self.item) else {
            read.sink.succeed(std::mem::take(&mut self.response));
            return Ok(StepOutcome::Completed);
        };
        let field = downcast_field::<ModbusField>(item.field.as_ref())?;

        if !self.waiting {
            if !self.transaction.acquire(core) {
                ctx.check_deadline()?;
                return Ok(StepOutcome::Pending);
            }
            let pdu = ModbusPdu::read(
                field.area.read_function(),
                field.start,
                field.wire_quantity() as u16,
            )?;
            self.transaction.send(core, &pdu)?;
            self.waiting = true;
            return Ok(StepOutcome::Advanced);
        }

        ctx.check_deadline()?;
        let Some(pdu) = self.transaction.receive(core)? else {
            return Ok(StepOutcome::Pending);
        };
        let (code, value) = self.decode(field, pdu)?;
        self.response.push(item.name.clone(), code, value);
        self.transaction.finish(core);
        self.waiting = false;
        self.item += 1;

        if self.item == items.len() {
            read.sink.succeed(std::mem::take(&mut self.response));
            return Ok(StepOutcome::Completed);
        }
        Ok(StepOutcome::Advanced)
    }

    fn on_error(&mut self, err: &PlcError) -> ErrorAction {
        if self.transaction.should_retry(err) {
            warn!("Modbus read failed ({}), resending", err);
            self.waiting = false;
            return ErrorAction::Retry;
        }
        ErrorAction::Fail
    }

    fn release(&mut self, core: &mut ConnectionCore) {
        self.transaction.release(core);
    }
}

// ============================================================================
// Write
// ============================================================================

/// Request PDU for one write item, or the code that rejects it locally
fn write_pdu(
    field: &ModbusField,
    item: &WriteItem,
    byte_order: ByteOrder,
) -> std::result::Result<ModbusPdu, ResponseCode> {
    if !field.area.is_writable() {
        debug!("Modbus write to read-only {} refused", field);
        return Err(ResponseCode::AccessDenied);
    }
    let invalid_datatype = |e: PlcError| {
        debug!("Modbus write to {} refused: {}", field, e);
        ResponseCode::InvalidDatatype
    };

    let pdu = match field.area {
        ModbusArea::Coil => {
            let bits = codec::encode_bits(field, &item.value).map_err(invalid_datatype)?;
            match bits.as_slice() {
                [single] => Ok(ModbusPdu::write_single_coil(field.start, *single)),
                many => ModbusPdu::write_multiple_coils(field.start, many),
            }
        },
        _ => {
            let registers = codec::encode_registers(field, &item.value, byte_order)
                .map_err(invalid_datatype)?;
            match registers.as_slice() {
                [single] => Ok(ModbusPdu::write_single_register(field.start, *single)),
                many => ModbusPdu::write_multiple_registers(field.start, many),
            }
        },
    };
    pdu.map_err(|e| {
        debug!("Modbus write to {} refused: {}", field, e);
        ResponseCode::InvalidAddress
    })
}

struct ModbusWrite {
    transaction: Transaction,
    byte_order: ByteOrder,
    item: usize,
    waiting: bool,
    response: WriteResponse,
}

impl StateMachine for ModbusWrite {
    fn name(&self) -> &'static str {
        "modbus-write"
    }

    fn state(&self) -> StateId {
        if self.waiting {
            RECEIVE_RESPONSE
        } else {
            SEND_REQUEST
        }
    }

    fn step(&mut self, ctx: &mut TaskContext, core: &mut ConnectionCore) -> Result<StepOutcome> {
        let write = ctx.as_write()?;
        let items = write.request.items();

        if !self.waiting {
            // Items refused locally never reach the wire
            while let Some(item) = items.get(self.item) {
                let field = downcast_field::<ModbusField>(item.field.as_ref())?;
                match write_pdu(field, item, self.byte_order) {
                    Ok(pdu) => {
                        if !self.transaction.acquire(core) {
                            ctx.check_deadline()?;
                            return Ok(StepOutcome::Pending);
                        }
                        self.transaction.send(core, &pdu)?;
                        self.waiting = true;
                        return Ok(StepOutcome::Advanced);
                    },
                    Err(code) => {
                        self.response.push(item.name.clone(), code);
                        self.item += 1;
                    },
                }
            }
            write.sink.succeed(std::mem::take(&mut self.response));
            return Ok(StepOutcome::Completed);
        }

        let Some(item) = items.get(self.item) else {
            return Err(PlcError::internal("Modbus write waiting without an item"));
        };
        let field = downcast_field::<ModbusField>(item.field.as_ref())?;

        ctx.check_deadline()?;
        let Some(pdu) = self.transaction.receive(core)? else {
            return Ok(StepOutcome::Pending);
        };
        let code = exception_code(&pdu, &field.to_string()).unwrap_or(ResponseCode::Ok);
        self.response.push(item.name.clone(), code);
        self.transaction.finish(core);
        self.waiting = false;
        self.item += 1;

        if self.item == items.len() {
            write.sink.succeed(std::mem::take(&mut self.response));
            return Ok(StepOutcome::Completed);
        }
        Ok(StepOutcome::Advanced)
    }

    fn on_error(&mut self, err: &PlcError) -> ErrorAction {
        if self.transaction.should_retry(err) {
            warn!("Modbus write failed ({}), resending", err);
            self.waiting = false;
            return ErrorAction::Retry;
        }
        ErrorAction::Fail
    }

    fn release(&mut self, core: &mut ConnectionCore) {
        self.transaction.release(core);
    }
}

// ============================================================================
// Driver and factories
// ============================================================================

#[derive(Debug)]
pub struct ModbusDriver {
    framing: ModbusFraming,
}

impl ModbusDriver {
    pub fn new(framing: ModbusFraming) -> Self {
        Self { framing }
    }

    pub fn framing(&self) -> ModbusFraming {
        self.framing
    }
}

impl Driver for ModbusDriver {
    fn code(&self) -> &'static str {
        match self.framing {
            ModbusFraming::Tcp => "modbus-tcp",
            ModbusFraming::Rtu => "modbus-rtu",
        }
    }

    fn parse_address(&self, address: &str) -> Result<FieldRef> {
        Ok(Arc::new(ModbusField::parse(address)?))
    }

    fn read_task(
        &self,
        _request: &ReadRequest,
        core: &ConnectionCore,
    ) -> Result<Box<dyn StateMachine>> {
        Ok(Box::new(ModbusRead {
            transaction: Transaction::new(self.framing, core.config()),
            byte_order: core.config().byte_order,
            item: 0,
            waiting: false,
            response: ReadResponse::new(),
        }))
    }

    fn write_task(
        &self,
        _request: &WriteRequest,
        core: &ConnectionCore,
    ) -> Result<Box<dyn StateMachine>> {
        Ok(Box::new(ModbusWrite {
            transaction: Transaction::new(self.framing, core.config()),
            byte_order: core.config().byte_order,
            item: 0,
            waiting: false,
            response: WriteResponse::new(),
        }))
    }
}

/// `modbus-tcp`: MBAP framing over TCP, port 502 by default
#[derive(Debug, Default)]
pub struct ModbusTcpDriverFactory;

impl DriverFactory for ModbusTcpDriverFactory {
    fn code(&self) -> &'static str {
        "modbus-tcp"
    }

    fn name(&self) -> &'static str {
        "Modbus TCP"
    }

    fn default_transport(&self) -> Option<&'static str> {
        Some("tcp")
    }

    fn default_port(&self) -> Option<u16> {
        Some(502)
    }

    fn create(
        &self,
        _connection_string: &ConnectionString,
        _config: &ConnectionConfig,
    ) -> Result<Box<dyn Driver>> {
        Ok(Box::new(ModbusDriver::new(ModbusFraming::Tcp)))
    }
}

/// `modbus-rtu`: RTU framing; the transport must be named, e.g.
/// `modbus-rtu:tcp://gateway:4001`
#[derive(Debug, Default)]
pub struct ModbusRtuDriverFactory;

impl DriverFactory for ModbusRtuDriverFactory {
    fn code(&self) -> &'static str {
        "modbus-rtu"
    }

    fn name(&self) -> &'static str {
        "Modbus RTU"
    }

    fn create(
        &self,
        _connection_string: &ConnectionString,
        _config: &ConnectionConfig,
    ) -> Result<Box<dyn Driver>> {
        Ok(Box::new(ModbusDriver::new(ModbusFraming::Rtu)))
    }
}
