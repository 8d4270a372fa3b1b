//! Modbus driver integration tests
//!
//! A small in-memory Modbus slave answers the frames the driver sends over
//! the mock transport, so whole read and write requests run through the
//! registry, the task queue, framing and the value codec.

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use voltage_driver::transport::{MockHandle, MockTransportFactory};
use voltage_driver::voltage_codec::{ChecksumPolicy, Message};
use voltage_driver::{
    Connection, Execution, PlcSystem, PlcValue, ResponseCode, ReturnCode, Scheduler,
};
use voltage_protocols::modbus::pdu::{pack_coils, unpack_coils, COIL_ON};
use voltage_protocols::modbus::{
    Direction, ExceptionCode, FunctionCode, ModbusPdu, ModbusRtuDriverFactory,
    ModbusTcpDriverFactory, RtuAdu, RtuContext, TcpAdu,
};

// ============================================================================
// In-memory slave
// ============================================================================

#[derive(Debug)]
struct Tables {
    coils: Vec<bool>,
    discrete_inputs: Vec<bool>,
    input_registers: Vec<u16>,
    holding_registers: Vec<u16>,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            coils: vec![false; 64],
            discrete_inputs: (0..64).map(|i| i % 3 == 0).collect(),
            input_registers: (0..64).map(|i| 1000 + i).collect(),
            holding_registers: vec![0; 64],
        }
    }
}

fn registers_to_bytes(registers: &[u16]) -> Vec<u8> {
    registers.iter().flat_map(|r| r.to_be_bytes()).collect()
}

fn exception(function: FunctionCode) -> ModbusPdu {
    ModbusPdu::Exception {
        function,
        code: ExceptionCode::IllegalDataAddress,
    }
}

/// Execute one request PDU against the tables
fn serve(tables: &mut Tables, request: ModbusPdu) -> ModbusPdu {
    match request {
        ModbusPdu::ReadRequest {
            function,
            address,
            quantity,
        } => {
            let range = address as usize..address as usize + quantity as usize;
            let data = match function {
                FunctionCode::ReadCoils => tables.coils.get(range).map(pack_coils),
                FunctionCode::ReadDiscreteInputs => {
                    tables.discrete_inputs.get(range).map(pack_coils)
                },
                FunctionCode::ReadInputRegisters => {
                    tables.input_registers.get(range).map(registers_to_bytes)
                },
                _ => tables.holding_registers.get(range).map(registers_to_bytes),
            };
            match data {
                Some(data) => ModbusPdu::ReadResponse { function, data },
                None => exception(function),
            }
        },
        ModbusPdu::WriteSingle {
            function,
            address,
            value,
        } => {
            let written = match function {
                FunctionCode::WriteSingleCoil => tables
                    .coils
                    .get_mut(address as usize)
                    .map(|coil| *coil = value == COIL_ON),
                _ => tables
                    .holding_registers
                    .get_mut(address as usize)
                    .map(|register| *register = value),
            };
            match written {
                Some(()) => ModbusPdu::WriteSingle {
                    function,
                    address,
                    value,
                },
                None => exception(function),
            }
        },
        ModbusPdu::WriteMultipleRequest {
            function,
            address,
            quantity,
            data,
        } => {
            let range = address as usize..address as usize + quantity as usize;
            let written = if function == FunctionCode::WriteMultipleCoils {
                let bits = unpack_coils(&data, quantity as usize).unwrap();
                tables
                    .coils
                    .get_mut(range)
                    .map(|coils| coils.copy_from_slice(&bits))
            } else {
                let registers: Vec<u16> = data
                    .chunks(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                tables
                    .holding_registers
                    .get_mut(range)
                    .map(|slots| slots.copy_from_slice(&registers))
            };
            match written {
                Some(()) => ModbusPdu::WriteMultipleResponse {
                    function,
                    address,
                    quantity,
                },
                None => exception(function),
            }
        },
        other => panic!("unexpected request {:?}", other),
    }
}

fn tcp_slave(tables: Arc<Mutex<Tables>>) -> impl FnMut(&[u8]) -> Option<Vec<u8>> + Send {
    move |frame: &[u8]| {
        let request = TcpAdu::from_bytes(frame, Direction::Request).unwrap();
        let reply = TcpAdu {
            transaction_id: request.transaction_id,
            unit_id: request.unit_id,
            pdu: serve(&mut tables.lock(), request.pdu),
        };
        Some(reply.to_bytes().unwrap().to_vec())
    }
}

fn rtu_slave(tables: Arc<Mutex<Tables>>) -> impl FnMut(&[u8]) -> Option<Vec<u8>> + Send {
    move |frame: &[u8]| {
        let request = RtuAdu::from_bytes(
            frame,
            RtuContext {
                direction: Direction::Request,
                checksum_policy: ChecksumPolicy::Reject,
            },
        )
        .unwrap();
        let reply = RtuAdu {
            unit_id: request.unit_id,
            pdu: serve(&mut tables.lock(), request.pdu),
        };
        Some(reply.to_bytes().unwrap().to_vec())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn system(handle: &MockHandle) -> PlcSystem {
    let system = PlcSystem::new();
    system.register_driver(Arc::new(ModbusTcpDriverFactory));
    system.register_driver(Arc::new(ModbusRtuDriverFactory));
    system.register_transport(Arc::new(MockTransportFactory::new(handle.clone())));
    system
}

fn run<T>(connection: &mut Connection, execution: &Execution<T>) {
    let mut scheduler = Scheduler::new().with_idle_sleep(Duration::ZERO);
    scheduler
        .run_until_finished(connection, execution, Duration::from_secs(2))
        .unwrap();
}

fn connect(handle: &MockHandle, connection_string: &str) -> Connection {
    let (mut connection, connecting) = system(handle).connect(connection_string).unwrap();
    run(&mut connection, &connecting);
    assert!(connecting.finished_successfully());
    connection
}

fn tcp_connection(params: &str) -> (Connection, MockHandle, Arc<Mutex<Tables>>) {
    let handle = MockHandle::new();
    let tables = Arc::new(Mutex::new(Tables::default()));
    handle.set_responder(tcp_slave(Arc::clone(&tables)));
    let connection = connect(&handle, &format!("modbus-tcp:dummy://plc{}", params));
    (connection, handle, tables)
}

fn read(connection: &mut Connection, items: &[(&str, &str)]) -> voltage_driver::ReadResponse {
    let request = connection.create_read_request(items).unwrap();
    let reading = connection.execute_read(request).unwrap();
    run(connection, &reading);
    reading.response().unwrap()
}

fn write(
    connection: &mut Connection,
    items: &[(&str, &str, PlcValue)],
) -> voltage_driver::WriteResponse {
    let request = connection.create_write_request(items).unwrap();
    let writing = connection.execute_write(request).unwrap();
    run(connection, &writing);
    writing.response().unwrap()
}

// ============================================================================
// Modbus TCP
// ============================================================================

#[test]
fn reads_input_registers_with_mbap_framing() {
    let (mut connection, handle, _tables) = tcp_connection("");

    let response = read(&mut connection, &[("values", "3x1[3]")]);
    assert_eq!(
        response.value("values"),
        Some(&PlcValue::List(vec![
            PlcValue::Word(1000),
            PlcValue::Word(1001),
            PlcValue::Word(1002),
        ]))
    );

    let sent = handle.sent_frames();
    assert_eq!(
        sent[0].as_ref(),
        &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x04, 0x00, 0x00, 0x00, 0x03]
    );
}

#[test]
fn one_transaction_per_item() {
    let (mut connection, handle, _tables) = tcp_connection("?unit_id=17");

    let response = read(
        &mut connection,
        &[("a", "discrete-input:1"), ("b", "discrete-input:2"), ("c", "4x1")],
    );
    assert_eq!(response.value("a"), Some(&PlcValue::Bool(true)));
    assert_eq!(response.value("b"), Some(&PlcValue::Bool(false)));
    assert_eq!(response.value("c"), Some(&PlcValue::Word(0)));

    let sent = handle.sent_frames();
    let ids: Vec<u16> = sent.iter().map(|f| u16::from_be_bytes([f[0], f[1]])).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert!(sent.iter().all(|f| f[6] == 17));
}

#[test]
fn writes_then_reads_back() {
    let (mut connection, handle, tables) = tcp_connection("");

    let response = write(
        &mut connection,
        &[
            ("setpoint", "holding-register:5:INT", PlcValue::Int(-40)),
            ("total", "4x10:DINT", PlcValue::Dint(70000)),
            ("pump", "coil:3", PlcValue::Bool(true)),
            (
                "valves",
                "coil:10[3]",
                PlcValue::List(vec![
                    PlcValue::Bool(true),
                    PlcValue::Bool(false),
                    PlcValue::Bool(true),
                ]),
            ),
        ],
    );
    assert!(response.all_ok());

    let functions: Vec<u8> = handle.sent_frames().iter().map(|f| f[7]).collect();
    assert_eq!(functions, vec![0x06, 0x10, 0x05, 0x0F]);
    {
        let tables = tables.lock();
        assert_eq!(tables.holding_registers[4], (-40i16) as u16);
        assert_eq!(&tables.holding_registers[9..11], &[0x0001, 0x1170]);
        assert!(tables.coils[2]);
        assert_eq!(&tables.coils[9..12], &[true, false, true]);
    }

    let response = read(
        &mut connection,
        &[("setpoint", "4x5:INT"), ("total", "4x10:DINT"), ("valves", "0x10[3]")],
    );
    assert_eq!(response.value("setpoint"), Some(&PlcValue::Int(-40)));
    assert_eq!(response.value("total"), Some(&PlcValue::Dint(70000)));
    assert_eq!(
        response.value("valves"),
        Some(&PlcValue::List(vec![
            PlcValue::Bool(true),
            PlcValue::Bool(false),
            PlcValue::Bool(true),
        ]))
    );
}

#[test]
fn little_endian_values() {
    let (mut connection, _handle, tables) = tcp_connection("?byte_order=little_endian");

    let response = write(&mut connection, &[("t", "4x1:REAL", PlcValue::Real(1.0))]);
    assert!(response.all_ok());
    assert_eq!(&tables.lock().holding_registers[0..2], &[0x0000, 0x803F]);

    let response = read(&mut connection, &[("t", "4x1:REAL")]);
    assert_eq!(response.value("t"), Some(&PlcValue::Real(1.0)));
}

#[test]
fn exception_fails_only_its_item() {
    let (mut connection, _handle, _tables) = tcp_connection("");

    let response = read(&mut connection, &[("missing", "4x100"), ("present", "3x2")]);
    assert_eq!(response.get("missing").unwrap().code, ResponseCode::RemoteError);
    assert_eq!(response.get("missing").unwrap().value, PlcValue::Null);
    assert_eq!(response.value("present"), Some(&PlcValue::Word(1001)));

    let response = write(&mut connection, &[("missing", "4x100", PlcValue::Word(1))]);
    assert_eq!(response.code("missing"), Some(ResponseCode::RemoteError));
}

#[test]
fn locally_refused_writes_skip_the_wire() {
    let (mut connection, handle, _tables) = tcp_connection("");

    let response = write(
        &mut connection,
        &[
            ("input", "3x1", PlcValue::Word(1)),
            ("text", "4x1", PlcValue::String("x".into())),
            ("short", "4x1:INT[2]", PlcValue::Int(1)),
            ("ok", "4x2", PlcValue::Word(7)),
        ],
    );
    assert_eq!(response.code("input"), Some(ResponseCode::AccessDenied));
    assert_eq!(response.code("text"), Some(ResponseCode::InvalidDatatype));
    assert_eq!(response.code("short"), Some(ResponseCode::InvalidDatatype));
    assert_eq!(response.code("ok"), Some(ResponseCode::Ok));
    assert_eq!(handle.sent_frames().len(), 1);
}

#[test]
fn stale_transaction_is_dropped() {
    let handle = MockHandle::new();
    let mut connection = connect(&handle, "modbus-tcp:dummy://plc");

    let request = connection.create_read_request(&[("a", "4x1")]).unwrap();
    let reading = connection.execute_read(request).unwrap();
    connection.poll_once();
    assert_eq!(handle.sent_frames().len(), 1);

    // Late answer to transaction 9, then the answer to transaction 1
    handle.push_incoming(&[0x00, 0x09, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0xAA, 0xAA]);
    connection.poll_once();
    assert!(!reading.is_finished());

    handle.push_incoming(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x12, 0x34]);
    connection.poll_once();
    assert_eq!(
        reading.response().unwrap().value("a"),
        Some(&PlcValue::Word(0x1234))
    );
}

#[test]
fn concurrent_tcp_reads_accept_out_of_order_responses() {
    let handle = MockHandle::new();
    let mut connection = connect(&handle, "modbus-tcp:dummy://plc");

    let first = connection.create_read_request(&[("a", "4x1")]).unwrap();
    let first = connection.execute_read(first).unwrap();
    let second = connection.create_read_request(&[("b", "4x2")]).unwrap();
    let second = connection.execute_read(second).unwrap();
    connection.poll_once();
    assert_eq!(handle.sent_frames().len(), 2);

    // The slave answers transaction 2 first; the first task reads both frames
    handle.push_incoming(&[0x00, 0x02, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x00, 0x02]);
    handle.push_incoming(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x00, 0x01]);
    connection.poll_once();

    assert_eq!(
        first.response().unwrap().value("a"),
        Some(&PlcValue::Word(1))
    );
    assert_eq!(
        second.response().unwrap().value("b"),
        Some(&PlcValue::Word(2))
    );
    assert!(connection.queue().is_empty());
}

#[test]
fn parked_response_is_dropped_with_its_task() {
    let handle = MockHandle::new();
    let mut connection = connect(&handle, "modbus-tcp:dummy://plc");

    let first = connection.create_read_request(&[("a", "4x1")]).unwrap();
    let first = connection.execute_read(first).unwrap();
    let second = connection.create_read_request(&[("b", "4x2")]).unwrap();
    let second = connection.execute_read(second).unwrap();
    connection.poll_once();

    // The first task parks the answer to transaction 2 for a task that is
    // discarded later in the same pass
    drop(second);
    handle.push_incoming(&[0x00, 0x02, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x00, 0x02]);
    connection.poll_once();
    assert_eq!(connection.queue().len(), 1);

    handle.push_incoming(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x00, 0x01]);
    connection.poll_once();
    assert_eq!(
        first.response().unwrap().value("a"),
        Some(&PlcValue::Word(1))
    );
    assert!(connection.queue().is_empty());
}

#[test]
fn unanswered_request_times_out() {
    let handle = MockHandle::new();
    let mut connection = connect(&handle, "modbus-tcp:dummy://plc?request_timeout_ms=20");

    let request = connection.create_read_request(&[("a", "4x1")]).unwrap();
    let reading = connection.execute_read(request).unwrap();
    let mut scheduler = Scheduler::new().with_idle_sleep(Duration::from_millis(2));
    scheduler
        .run_until_finished(&mut connection, &reading, Duration::from_secs(2))
        .unwrap();
    assert_eq!(reading.error().unwrap().code(), ReturnCode::Timeout);
}

#[test]
fn invalid_addresses_are_rejected_up_front() {
    let (connection, _handle, _tables) = tcp_connection("");
    for bad in ["4x0", "coil:1:REAL", "holding-register:1:STRING", "5x1"] {
        assert_eq!(
            connection
                .create_read_request(&[("a", bad)])
                .unwrap_err()
                .code(),
            ReturnCode::InvalidAddress,
            "{}",
            bad
        );
    }
}

// ============================================================================
// Modbus RTU
// ============================================================================

#[test]
fn rtu_read_and_write() {
    let handle = MockHandle::new();
    let tables = Arc::new(Mutex::new(Tables::default()));
    handle.set_responder(rtu_slave(Arc::clone(&tables)));
    let mut connection = connect(&handle, "modbus-rtu:dummy://bus?unit_id=3");

    let words = PlcValue::List(vec![PlcValue::Word(0x1111), PlcValue::Word(0x2222)]);
    let response = write(&mut connection, &[("w", "4x1[2]", words)]);
    assert!(response.all_ok());

    let response = read(&mut connection, &[("w", "4x2")]);
    assert_eq!(response.value("w"), Some(&PlcValue::Word(0x2222)));

    let sent = handle.sent_frames();
    assert_eq!(sent[1].as_ref(), &[0x03, 0x03, 0x00, 0x01, 0x00, 0x01, 0xD4, 0x28]);
}

#[test]
fn rtu_requests_take_turns_on_the_transport() {
    let handle = MockHandle::new();
    let mut connection = connect(&handle, "modbus-rtu:dummy://bus");

    let first = connection.create_read_request(&[("a", "4x1")]).unwrap();
    let first = connection.execute_read(first).unwrap();
    let second = connection.create_read_request(&[("b", "4x2")]).unwrap();
    let second = connection.execute_read(second).unwrap();

    for _ in 0..3 {
        connection.poll_once();
    }
    assert_eq!(handle.sent_frames().len(), 1);
    assert!(!second.is_finished());

    let reply = |value: u16| {
        RtuAdu {
            unit_id: 1,
            pdu: ModbusPdu::ReadResponse {
                function: FunctionCode::ReadHoldingRegisters,
                data: value.to_be_bytes().to_vec(),
            },
        }
        .to_bytes()
        .unwrap()
    };
    handle.push_incoming(&reply(0x0A0A));
    connection.poll_once();
    assert_eq!(
        first.response().unwrap().value("a"),
        Some(&PlcValue::Word(0x0A0A))
    );

    // The second request goes out only once the first exchange is over
    let sent = handle.sent_frames();
    assert_eq!(sent.len(), 2);
    assert_eq!(&sent[1][..4], &[0x01, 0x03, 0x00, 0x01]);

    handle.push_incoming(&reply(0x0B0B));
    connection.poll_once();
    assert_eq!(
        second.response().unwrap().value("b"),
        Some(&PlcValue::Word(0x0B0B))
    );
}

#[test]
fn stale_rtu_reply_is_discarded_before_sending() {
    let handle = MockHandle::new();
    let tables = Arc::new(Mutex::new(Tables::default()));
    tables.lock().holding_registers[0] = 0x4242;
    let mut connection = connect(&handle, "modbus-rtu:dummy://bus");

    // Reply to a request nobody is waiting for any more
    handle.push_incoming(&[0x01, 0x03, 0x02, 0x00, 0x2A, 0x39, 0x9B]);
    handle.set_responder(rtu_slave(tables));

    let response = read(&mut connection, &[("a", "4x1")]);
    assert_eq!(response.value("a"), Some(&PlcValue::Word(0x4242)));
}

/// Slave that corrupts the CRC of its first `bad` replies
fn corrupting_rtu_slave(bad: u32) -> impl FnMut(&[u8]) -> Option<Vec<u8>> + Send {
    let tables = Arc::new(Mutex::new(Tables::default()));
    tables.lock().holding_registers[0] = 0xBEEF;
    let mut inner = rtu_slave(tables);
    let replies = AtomicU32::new(0);
    move |frame: &[u8]| {
        let mut reply = inner(frame)?;
        if replies.fetch_add(1, Ordering::Relaxed) < bad {
            let last = reply.len() - 1;
            reply[last] ^= 0xFF;
        }
        Some(reply)
    }
}

#[test]
fn rtu_checksum_error_is_retried() {
    let handle = MockHandle::new();
    handle.set_responder(corrupting_rtu_slave(1));
    let mut connection = connect(&handle, "modbus-rtu:dummy://bus");

    let response = read(&mut connection, &[("a", "4x1")]);
    assert_eq!(response.value("a"), Some(&PlcValue::Word(0xBEEF)));
    assert_eq!(handle.sent_frames().len(), 2);
}

#[test]
fn rtu_checksum_errors_exhaust_retries() {
    let handle = MockHandle::new();
    handle.set_responder(corrupting_rtu_slave(10));
    let mut connection = connect(&handle, "modbus-rtu:dummy://bus?max_retries=2");

    let request = connection.create_read_request(&[("a", "4x1")]).unwrap();
    let reading = connection.execute_read(request).unwrap();
    run(&mut connection, &reading);
    assert_eq!(reading.error().unwrap().code(), ReturnCode::ChecksumMismatch);
    assert_eq!(handle.sent_frames().len(), 3);
}

#[test]
fn rtu_warn_policy_accepts_bad_checksum() {
    let handle = MockHandle::new();
    handle.set_responder(corrupting_rtu_slave(10));
    let mut connection = connect(&handle, "modbus-rtu:dummy://bus?checksum_policy=warn");

    let response = read(&mut connection, &[("a", "4x1")]);
    assert_eq!(response.value("a"), Some(&PlcValue::Word(0xBEEF)));
    assert_eq!(handle.sent_frames().len(), 1);
}

#[test]
fn rtu_needs_an_explicit_transport() {
    let handle = MockHandle::new();
    let err = system(&handle).create_connection("modbus-rtu://bus").unwrap_err();
    assert_eq!(err.code(), ReturnCode::UnspecifiedTransport);
}
