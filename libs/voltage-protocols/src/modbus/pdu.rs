//! Modbus PDU
//!
//! The first byte carries a 1-bit error flag and a 7-bit function code. The
//! body layout depends on the function code and on the direction, which the
//! caller passes as parse context.

use voltage_codec::fields::{read_implicit, write_implicit};
use voltage_codec::{wire_enum, CodecError, Message, ReadBuffer, Result, WireEnum, WriteBuffer};

/// Largest PDU allowed by the Modbus standard
pub const MAX_PDU_SIZE: usize = 253;

pub const MAX_READ_COILS: usize = 2000;
pub const MAX_READ_REGISTERS: usize = 125;
pub const MAX_WRITE_COILS: usize = 1968;
pub const MAX_WRITE_REGISTERS: usize = 123;

/// Wire value of an ON coil in Write Single Coil
pub const COIL_ON: u16 = 0xFF00;

wire_enum! {
    /// Supported function codes (7 bits, without the error flag)
    pub enum FunctionCode: 7 {
        ReadCoils = 0x01,
        ReadDiscreteInputs = 0x02,
        ReadHoldingRegisters = 0x03,
        ReadInputRegisters = 0x04,
        WriteSingleCoil = 0x05,
        WriteSingleRegister = 0x06,
        WriteMultipleCoils = 0x0F,
        WriteMultipleRegisters = 0x10,
    }
}

impl FunctionCode {
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            Self::ReadCoils
                | Self::ReadDiscreteInputs
                | Self::ReadHoldingRegisters
                | Self::ReadInputRegisters
        )
    }

    pub fn is_write_single(&self) -> bool {
        matches!(self, Self::WriteSingleCoil | Self::WriteSingleRegister)
    }

    pub fn is_write_multiple(&self) -> bool {
        matches!(self, Self::WriteMultipleCoils | Self::WriteMultipleRegisters)
    }

    /// Coil and discrete input functions address single bits
    pub fn is_bit_access(&self) -> bool {
        matches!(
            self,
            Self::ReadCoils
                | Self::ReadDiscreteInputs
                | Self::WriteSingleCoil
                | Self::WriteMultipleCoils
        )
    }

    pub fn code(&self) -> u8 {
        self.to_wire_value() as u8
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::ReadCoils => "Read Coils",
            Self::ReadDiscreteInputs => "Read Discrete Inputs",
            Self::ReadHoldingRegisters => "Read Holding Registers",
            Self::ReadInputRegisters => "Read Input Registers",
            Self::WriteSingleCoil => "Write Single Coil",
            Self::WriteSingleRegister => "Write Single Register",
            Self::WriteMultipleCoils => "Write Multiple Coils",
            Self::WriteMultipleRegisters => "Write Multiple Registers",
        }
    }
}

wire_enum! {
    /// Exception codes returned with the error flag set
    pub enum ExceptionCode: 8 {
        IllegalFunction = 0x01,
        IllegalDataAddress = 0x02,
        IllegalDataValue = 0x03,
        SlaveDeviceFailure = 0x04,
        Acknowledge = 0x05,
        SlaveDeviceBusy = 0x06,
        NegativeAcknowledge = 0x07,
        MemoryParityError = 0x08,
        GatewayPathUnavailable = 0x0A,
        GatewayTargetFailedToRespond = 0x0B,
    }
}

impl ExceptionCode {
    pub fn description(&self) -> &'static str {
        match self {
            Self::IllegalFunction => "Illegal Function",
            Self::IllegalDataAddress => "Illegal Data Address",
            Self::IllegalDataValue => "Illegal Data Value",
            Self::SlaveDeviceFailure => "Slave Device Failure",
            Self::Acknowledge => "Acknowledge",
            Self::SlaveDeviceBusy => "Slave Device Busy",
            Self::NegativeAcknowledge => "Negative Acknowledge",
            Self::MemoryParityError => "Memory Parity Error",
            Self::GatewayPathUnavailable => "Gateway Path Unavailable",
            Self::GatewayTargetFailedToRespond => "Gateway Target Device Failed to Respond",
        }
    }
}

/// Which side of an exchange a PDU belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

/// A Modbus protocol data unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModbusPdu {
    /// FC 01-04 request
    ReadRequest {
        function: FunctionCode,
        address: u16,
        quantity: u16,
    },
    /// FC 01-04 response; coils are packed LSB first, registers big-endian
    ReadResponse { function: FunctionCode, data: Vec<u8> },
    /// FC 05/06 request, echoed unchanged as the response
    WriteSingle {
        function: FunctionCode,
        address: u16,
        value: u16,
    },
    /// FC 15/16 request
    WriteMultipleRequest {
        function: FunctionCode,
        address: u16,
        quantity: u16,
        data: Vec<u8>,
    },
    /// FC 15/16 response
    WriteMultipleResponse {
        function: FunctionCode,
        address: u16,
        quantity: u16,
    },
    /// Any function answered with the error flag set
    Exception {
        function: FunctionCode,
        code: ExceptionCode,
    },
}

fn check_quantity(function: FunctionCode, quantity: usize, max: usize) -> Result<()> {
    if quantity == 0 || quantity > max {
        return Err(CodecError::out_of_range(format!(
            "{}: quantity {} outside 1..={}",
            function.description(),
            quantity,
            max
        )));
    }
    Ok(())
}

/// Byte length of the data block for `quantity` bits or registers
fn data_len(function: FunctionCode, quantity: usize) -> usize {
    if function.is_bit_access() {
        quantity.div_ceil(8)
    } else {
        quantity * 2
    }
}

impl ModbusPdu {
    /// FC 01-04 request
    pub fn read(function: FunctionCode, address: u16, quantity: u16) -> Result<Self> {
        if !function.is_read() {
            return Err(CodecError::invalid_data(format!(
                "{} is not a read function",
                function.description()
            )));
        }
        let max = if function.is_bit_access() {
            MAX_READ_COILS
        } else {
            MAX_READ_REGISTERS
        };
        check_quantity(function, quantity as usize, max)?;
        Ok(Self::ReadRequest {
            function,
            address,
            quantity,
        })
    }

    /// FC 05
    pub fn write_single_coil(address: u16, value: bool) -> Self {
        Self::WriteSingle {
            function: FunctionCode::WriteSingleCoil,
            address,
            value: if value { COIL_ON } else { 0 },
        }
    }

    /// FC 06
    pub fn write_single_register(address: u16, value: u16) -> Self {
        Self::WriteSingle {
            function: FunctionCode::WriteSingleRegister,
            address,
            value,
        }
    }

    /// FC 15
    pub fn write_multiple_coils(address: u16, values: &[bool]) -> Result<Self> {
        let function = FunctionCode::WriteMultipleCoils;
        check_quantity(function, values.len(), MAX_WRITE_COILS)?;
        Ok(Self::WriteMultipleRequest {
            function,
            address,
            quantity: values.len() as u16,
            data: pack_coils(values),
        })
    }

    /// FC 16
    pub fn write_multiple_registers(address: u16, values: &[u16]) -> Result<Self> {
        let function = FunctionCode::WriteMultipleRegisters;
        check_quantity(function, values.len(), MAX_WRITE_REGISTERS)?;
        Ok(Self::WriteMultipleRequest {
            function,
            address,
            quantity: values.len() as u16,
            data: values.iter().flat_map(|v| v.to_be_bytes()).collect(),
        })
    }

    pub fn function(&self) -> FunctionCode {
        match self {
            Self::ReadRequest { function, .. }
            | Self::ReadResponse { function, .. }
            | Self::WriteSingle { function, .. }
            | Self::WriteMultipleRequest { function, .. }
            | Self::WriteMultipleResponse { function, .. }
            | Self::Exception { function, .. } => *function,
        }
    }

    pub fn is_exception(&self) -> bool {
        matches!(self, Self::Exception { .. })
    }

    fn body_bits(&self) -> usize {
        let bytes = match self {
            Self::ReadRequest { .. } | Self::WriteSingle { .. } => 4,
            Self::WriteMultipleResponse { .. } => 4,
            Self::ReadResponse { data, .. } => 1 + data.len(),
            Self::WriteMultipleRequest { data, .. } => 5 + data.len(),
            Self::Exception { .. } => 1,
        };
        bytes * 8
    }
}

impl Message for ModbusPdu {
    type Context = Direction;

    fn parse(buf: &mut ReadBuffer<'_>, direction: Direction) -> Result<Self> {
        let error = buf.read_bit()?;
        let function = FunctionCode::read(buf)?;

        if error {
            if direction == Direction::Request {
                return Err(CodecError::invalid_data("error flag set in a request"));
            }
            let code = ExceptionCode::read(buf)?;
            return Ok(Self::Exception { function, code });
        }

        let pdu = match (direction, function) {
            (Direction::Request, f) if f.is_read() => Self::ReadRequest {
                function,
                address: buf.read_u16(16)?,
                quantity: buf.read_u16(16)?,
            },
            (Direction::Response, f) if f.is_read() => {
                let byte_count = read_implicit(buf, 8)? as usize;
                Self::ReadResponse {
                    function,
                    data: buf.read_bytes(byte_count)?,
                }
            },
            (_, f) if f.is_write_single() => Self::WriteSingle {
                function,
                address: buf.read_u16(16)?,
                value: buf.read_u16(16)?,
            },
            (Direction::Request, _) => {
                let address = buf.read_u16(16)?;
                let quantity = buf.read_u16(16)?;
                let byte_count = read_implicit(buf, 8)? as usize;
                let expected = data_len(function, quantity as usize);
                if byte_count != expected {
                    return Err(CodecError::LengthMismatch {
                        expected,
                        actual: byte_count,
                    });
                }
                Self::WriteMultipleRequest {
                    function,
                    address,
                    quantity,
                    data: buf.read_bytes(byte_count)?,
                }
            },
            (Direction::Response, _) => Self::WriteMultipleResponse {
                function,
                address: buf.read_u16(16)?,
                quantity: buf.read_u16(16)?,
            },
        };
        Ok(pdu)
    }

    fn serialize(&self, buf: &mut WriteBuffer) -> Result<()> {
        buf.write_bit(self.is_exception())?;
        self.function().write(buf)?;

        match self {
            Self::ReadRequest {
                address, quantity, ..
            }
            | Self::WriteMultipleResponse {
                address, quantity, ..
            } => {
                buf.write_u16(16, *address)?;
                buf.write_u16(16, *quantity)
            },
            Self::ReadResponse { data, .. } => {
                write_implicit(buf, 8, data.len() as u64)?;
                buf.write_bytes(data)
            },
            Self::WriteSingle { address, value, .. } => {
                buf.write_u16(16, *address)?;
                buf.write_u16(16, *value)
            },
            Self::WriteMultipleRequest {
                address,
                quantity,
                data,
                ..
            } => {
                buf.write_u16(16, *address)?;
                buf.write_u16(16, *quantity)?;
                write_implicit(buf, 8, data.len() as u64)?;
                buf.write_bytes(data)
            },
            Self::Exception { code, .. } => code.write(buf),
        }
    }

    fn length_in_bits(&self) -> usize {
        8 + self.body_bits()
    }
}

/// Pack coil states LSB first, as FC 01/02/15 carry them
pub fn pack_coils(values: &[bool]) -> Vec<u8> {
    let mut packed = vec![0u8; values.len().div_ceil(8)];
    for (index, value) in values.iter().enumerate() {
        if *value {
            packed[index / 8] |= 1 << (index % 8);
        }
    }
    packed
}

/// Unpack the first `count` coil states
pub fn unpack_coils(data: &[u8], count: usize) -> Result<Vec<bool>> {
    if data.len() < count.div_ceil(8) {
        return Err(CodecError::LengthMismatch {
            expected: count.div_ceil(8),
            actual: data.len(),
        });
    }
    Ok((0..count)
        .map(|index| data[index / 8] & (1 << (index % 8)) != 0)
        .collect())
}
