//! Modbus protocol implementation
//!
//! Modbus TCP and RTU drivers for the VoltageEMS PLC driver engine:
//! - Function codes FC01-04 (read), FC05/06 (write single), FC15/16 (write
//!   multiple)
//! - MBAP framing with transaction ids, RTU framing with CRC-16, ASCII
//!   framing helpers with LRC
//! - Typed values over 1, 2 or 4 registers with configurable byte order
//!
//! # Architecture
//!
//! ```text
//! voltage-protocols/modbus
//!     ├── pdu      (function codes, exception codes, PDU messages)
//!     ├── adu      (TCP / RTU / ASCII framing, frame checks)
//!     ├── address  (ModbusField address grammar)
//!     ├── codec    (PlcValue <-> registers / coils)
//!     └── driver   (read/write state machines, driver factories)
//! ```
//!
//! # Connection strings
//!
//! ```text
//! modbus-tcp://192.168.1.10              (tcp transport, port 502)
//! modbus-tcp://plc:1502?unit_id=17
//! modbus-rtu:tcp://gateway:4001?byte_order=little_endian
//! ```

pub mod address;
pub mod adu;
pub mod codec;
pub mod driver;
pub mod pdu;

pub use address::{ModbusArea, ModbusField};
pub use adu::{
    decode_ascii_frame, encode_ascii_frame, mbap_transaction_id, rtu_response_frame_check,
    tcp_frame_check, RtuAdu, RtuContext, TcpAdu, MBAP_HEADER_LEN,
};
pub use driver::{ModbusDriver, ModbusFraming, ModbusRtuDriverFactory, ModbusTcpDriverFactory};
pub use pdu::{
    Direction, ExceptionCode, FunctionCode, ModbusPdu, MAX_PDU_SIZE, MAX_READ_COILS,
    MAX_READ_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS,
};
