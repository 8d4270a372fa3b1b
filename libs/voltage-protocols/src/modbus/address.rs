//! Modbus field addresses
//!
//! Grammar: `area:address[:TYPE][[count]]` with `area` one of `coil`,
//! `discrete-input`, `input-register` or `holding-register`, or the short
//! forms `0x`, `1x`, `3x`, `4x` written directly before the address
//! (`4x00010:REAL[2]`).
//!
//! Addresses are 1-based as on device documentation; the wire address is one
//! less. Bit areas hold `BOOL` only and default to it; register areas default
//! to `WORD` and take 16, 32 or 64-bit types spanning 1, 2 or 4 registers.

use std::any::Any;
use std::fmt;

use errors::{PlcError, Result};
use voltage_driver::{PlcField, PlcValueType};

use super::pdu::{FunctionCode, MAX_READ_COILS, MAX_READ_REGISTERS};

/// Modbus data model tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModbusArea {
    Coil,
    DiscreteInput,
    InputRegister,
    HoldingRegister,
}

impl ModbusArea {
    fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "coil" | "coils" => Some(Self::Coil),
            "discrete-input" | "discrete-inputs" => Some(Self::DiscreteInput),
            "input-register" | "input-registers" => Some(Self::InputRegister),
            "holding-register" | "holding-registers" => Some(Self::HoldingRegister),
            _ => None,
        }
    }

    fn from_short_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "0x" => Some(Self::Coil),
            "1x" => Some(Self::DiscreteInput),
            "3x" => Some(Self::InputRegister),
            "4x" => Some(Self::HoldingRegister),
            _ => None,
        }
    }

    pub fn is_bit(&self) -> bool {
        matches!(self, Self::Coil | Self::DiscreteInput)
    }

    /// Input tables are read-only
    pub fn is_writable(&self) -> bool {
        matches!(self, Self::Coil | Self::HoldingRegister)
    }

    pub fn read_function(&self) -> FunctionCode {
        match self {
            Self::Coil => FunctionCode::ReadCoils,
            Self::DiscreteInput => FunctionCode::ReadDiscreteInputs,
            Self::InputRegister => FunctionCode::ReadInputRegisters,
            Self::HoldingRegister => FunctionCode::ReadHoldingRegisters,
        }
    }
}

impl fmt::Display for ModbusArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Coil => "coil",
            Self::DiscreteInput => "discrete-input",
            Self::InputRegister => "input-register",
            Self::HoldingRegister => "holding-register",
        };
        write!(f, "{}", name)
    }
}

/// A parsed Modbus address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusField {
    address: String,
    pub area: ModbusArea,
    /// 0-based wire address
    pub start: u16,
    pub value_type: PlcValueType,
    /// Number of elements
    pub quantity: usize,
}

/// Registers per element for the types register areas accept
fn registers_per_element(value_type: PlcValueType) -> Option<usize> {
    match value_type {
        PlcValueType::Word | PlcValueType::Int | PlcValueType::Uint => Some(1),
        PlcValueType::Dword | PlcValueType::Dint | PlcValueType::Udint | PlcValueType::Real => {
            Some(2)
        },
        PlcValueType::Lword | PlcValueType::Lint | PlcValueType::Ulint | PlcValueType::Lreal => {
            Some(4)
        },
        _ => None,
    }
}

impl ModbusField {
    pub fn parse(address: &str) -> Result<Self> {
        let invalid = |reason: String| {
            PlcError::invalid_address(format!("Modbus address '{}': {}", address, reason))
        };

        let (body, quantity) = match address.strip_suffix(']') {
            Some(rest) => {
                let (body, count) = rest
                    .rsplit_once('[')
                    .ok_or_else(|| invalid("unbalanced ']'".to_string()))?;
                let quantity = count
                    .parse::<usize>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| invalid(format!("bad element count '{}'", count)))?;
                (body, quantity)
            },
            None => (address, 1),
        };

        let parts: Vec<&str> = body.split(':').collect();
        let short_area = parts[0].get(..2).and_then(ModbusArea::from_short_prefix);
        let (area, number, type_name) = match (short_area, parts.as_slice()) {
            (Some(area), [first, rest @ ..]) if rest.len() <= 1 => {
                (area, &first[2..], rest.first().copied())
            },
            (None, [area, number, rest @ ..]) if rest.len() <= 1 => {
                let area = ModbusArea::from_name(area)
                    .ok_or_else(|| invalid(format!("unknown area '{}'", area)))?;
                (area, *number, rest.first().copied())
            },
            _ => return Err(invalid("expected area:address[:TYPE][[count]]".to_string())),
        };

        let number = number
            .parse::<u32>()
            .ok()
            .filter(|n| (1..=65536).contains(n))
            .ok_or_else(|| invalid(format!("address '{}' outside 1..=65536", number)))?;

        let value_type = match type_name {
            Some(name) => name.parse::<PlcValueType>()?,
            None if area.is_bit() => PlcValueType::Bool,
            None => PlcValueType::Word,
        };
        if area.is_bit() && value_type != PlcValueType::Bool {
            return Err(invalid(format!("{} holds BOOL only, not {}", area, value_type)));
        }
        if !area.is_bit() && registers_per_element(value_type).is_none() {
            return Err(invalid(format!("{} cannot hold {}", area, value_type)));
        }

        let field = Self {
            address: address.to_string(),
            area,
            start: (number - 1) as u16,
            value_type,
            quantity,
        };

        let max = if area.is_bit() {
            MAX_READ_COILS
        } else {
            MAX_READ_REGISTERS
        };
        let wire_quantity = field.wire_quantity();
        if wire_quantity > max {
            return Err(invalid(format!(
                "{} {} exceed the limit of {}",
                wire_quantity,
                if area.is_bit() { "bits" } else { "registers" },
                max
            )));
        }
        if field.start as usize + wire_quantity > 65536 {
            return Err(invalid("range runs past the end of the table".to_string()));
        }
        Ok(field)
    }

    /// Registers per element (1 for bit areas)
    pub fn element_width(&self) -> usize {
        registers_per_element(self.value_type).unwrap_or(1)
    }

    /// Bits or registers covered on the wire
    pub fn wire_quantity(&self) -> usize {
        self.quantity * self.element_width()
    }
}

impl fmt::Display for ModbusField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}

impl PlcField for ModbusField {
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
