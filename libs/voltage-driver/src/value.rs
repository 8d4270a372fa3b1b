//! Typed PLC values
//!
//! IEC 61131-3 style elementary types plus lists. Drivers decode wire data
//! into [`PlcValue`] and encode written values from it.

use std::fmt;
use std::str::FromStr;

use errors::{PlcError, Result};
use serde::Serialize;

/// Elementary data type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlcValueType {
    Bool,
    Byte,
    Word,
    Dword,
    Lword,
    Sint,
    Int,
    Dint,
    Lint,
    Usint,
    Uint,
    Udint,
    Ulint,
    Real,
    Lreal,
    Char,
    String,
}

impl PlcValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bool => "BOOL",
            Self::Byte => "BYTE",
            Self::Word => "WORD",
            Self::Dword => "DWORD",
            Self::Lword => "LWORD",
            Self::Sint => "SINT",
            Self::Int => "INT",
            Self::Dint => "DINT",
            Self::Lint => "LINT",
            Self::Usint => "USINT",
            Self::Uint => "UINT",
            Self::Udint => "UDINT",
            Self::Ulint => "ULINT",
            Self::Real => "REAL",
            Self::Lreal => "LREAL",
            Self::Char => "CHAR",
            Self::String => "STRING",
        }
    }

    /// Wire size in bits; `None` for variable-length types
    pub fn size_in_bits(&self) -> Option<usize> {
        match self {
            Self::Bool => Some(1),
            Self::Byte | Self::Sint | Self::Usint | Self::Char => Some(8),
            Self::Word | Self::Int | Self::Uint => Some(16),
            Self::Dword | Self::Dint | Self::Udint | Self::Real => Some(32),
            Self::Lword | Self::Lint | Self::Ulint | Self::Lreal => Some(64),
            Self::String => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, Self::Bool | Self::Char | Self::String)
    }
}

impl FromStr for PlcValueType {
    type Err = PlcError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "BOOL" => Ok(Self::Bool),
            "BYTE" => Ok(Self::Byte),
            "WORD" => Ok(Self::Word),
            "DWORD" => Ok(Self::Dword),
            "LWORD" => Ok(Self::Lword),
            "SINT" => Ok(Self::Sint),
            "INT" => Ok(Self::Int),
            "DINT" | "INTEGER" => Ok(Self::Dint),
            "LINT" => Ok(Self::Lint),
            "USINT" => Ok(Self::Usint),
            "UINT" => Ok(Self::Uint),
            "UDINT" => Ok(Self::Udint),
            "ULINT" => Ok(Self::Ulint),
            "REAL" | "FLOAT" => Ok(Self::Real),
            "LREAL" | "DOUBLE" => Ok(Self::Lreal),
            "CHAR" => Ok(Self::Char),
            "STRING" => Ok(Self::String),
            _ => Err(PlcError::invalid_address(format!("Unknown data type: {}", s))),
        }
    }
}

impl fmt::Display for PlcValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A typed value read from or written to a PLC
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PlcValue {
    Null,
    Bool(bool),
    Byte(u8),
    Word(u16),
    Dword(u32),
    Lword(u64),
    Sint(i8),
    Int(i16),
    Dint(i32),
    Lint(i64),
    Usint(u8),
    Uint(u16),
    Udint(u32),
    Ulint(u64),
    Real(f32),
    Lreal(f64),
    Char(char),
    String(String),
    List(Vec<PlcValue>),
}

impl PlcValue {
    /// Element type; `None` for `Null` and mixed or empty lists
    pub fn value_type(&self) -> Option<PlcValueType> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(PlcValueType::Bool),
            Self::Byte(_) => Some(PlcValueType::Byte),
            Self::Word(_) => Some(PlcValueType::Word),
            Self::Dword(_) => Some(PlcValueType::Dword),
            Self::Lword(_) => Some(PlcValueType::Lword),
            Self::Sint(_) => Some(PlcValueType::Sint),
            Self::Int(_) => Some(PlcValueType::Int),
            Self::Dint(_) => Some(PlcValueType::Dint),
            Self::Lint(_) => Some(PlcValueType::Lint),
            Self::Usint(_) => Some(PlcValueType::Usint),
            Self::Uint(_) => Some(PlcValueType::Uint),
            Self::Udint(_) => Some(PlcValueType::Udint),
            Self::Ulint(_) => Some(PlcValueType::Ulint),
            Self::Real(_) => Some(PlcValueType::Real),
            Self::Lreal(_) => Some(PlcValueType::Lreal),
            Self::Char(_) => Some(PlcValueType::Char),
            Self::String(_) => Some(PlcValueType::String),
            Self::List(items) => {
                let first = items.first()?.value_type()?;
                items
                    .iter()
                    .all(|v| v.value_type() == Some(first))
                    .then_some(first)
            },
        }
    }

    /// Number of elements (1 for scalars, 0 for `Null`)
    pub fn len(&self) -> usize {
        match self {
            Self::Null => 0,
            Self::List(items) => items.len(),
            _ => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elements of a list, or the value itself
    pub fn elements(&self) -> Vec<&PlcValue> {
        match self {
            Self::List(items) => items.iter().collect(),
            Self::Null => Vec::new(),
            other => vec![other],
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            other => other.as_i64().map(|v| v != 0),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Byte(v) | Self::Usint(v) => Some(i64::from(*v)),
            Self::Word(v) | Self::Uint(v) => Some(i64::from(*v)),
            Self::Dword(v) | Self::Udint(v) => Some(i64::from(*v)),
            Self::Lword(v) | Self::Ulint(v) => i64::try_from(*v).ok(),
            Self::Sint(v) => Some(i64::from(*v)),
            Self::Int(v) => Some(i64::from(*v)),
            Self::Dint(v) => Some(i64::from(*v)),
            Self::Lint(v) => Some(*v),
            Self::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Lword(v) | Self::Ulint(v) => Some(*v),
            other => other.as_i64().and_then(|v| u64::try_from(v).ok()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Real(v) => Some(f64::from(*v)),
            Self::Lreal(v) => Some(*v),
            Self::Lword(v) | Self::Ulint(v) => Some(*v as f64),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Parse text into a value of `value_type`
    ///
    /// Comma separated text produces a list. Integers accept a `0x` prefix.
    pub fn from_text(value_type: PlcValueType, text: &str) -> Result<Self> {
        let text = text.trim();
        if value_type != PlcValueType::String && text.contains(',') {
            let items = text
                .split(',')
                .map(|part| Self::parse_scalar(value_type, part.trim()))
                .collect::<Result<Vec<_>>>()?;
            return Ok(Self::List(items));
        }
        Self::parse_scalar(value_type, text)
    }

    fn parse_scalar(value_type: PlcValueType, text: &str) -> Result<Self> {
        let invalid = || PlcError::parse(format!("'{}' is not a valid {}", text, value_type));
        let int = || parse_int(text).ok_or_else(invalid);

        let value = match value_type {
            PlcValueType::Bool => match text.to_lowercase().as_str() {
                "true" | "1" | "on" => Self::Bool(true),
                "false" | "0" | "off" => Self::Bool(false),
                _ => return Err(invalid()),
            },
            PlcValueType::Byte => Self::Byte(u8::try_from(int()?).map_err(|_| invalid())?),
            PlcValueType::Word => Self::Word(u16::try_from(int()?).map_err(|_| invalid())?),
            PlcValueType::Dword => Self::Dword(u32::try_from(int()?).map_err(|_| invalid())?),
            PlcValueType::Lword => Self::Lword(u64::try_from(int()?).map_err(|_| invalid())?),
            PlcValueType::Sint => Self::Sint(i8::try_from(int()?).map_err(|_| invalid())?),
            PlcValueType::Int => Self::Int(i16::try_from(int()?).map_err(|_| invalid())?),
            PlcValueType::Dint => Self::Dint(i32::try_from(int()?).map_err(|_| invalid())?),
            PlcValueType::Lint => Self::Lint(i64::try_from(int()?).map_err(|_| invalid())?),
            PlcValueType::Usint => Self::Usint(u8::try_from(int()?).map_err(|_| invalid())?),
            PlcValueType::Uint => Self::Uint(u16::try_from(int()?).map_err(|_| invalid())?),
            PlcValueType::Udint => Self::Udint(u32::try_from(int()?).map_err(|_| invalid())?),
            PlcValueType::Ulint => Self::Ulint(u64::try_from(int()?).map_err(|_| invalid())?),
            PlcValueType::Real => Self::Real(text.parse().map_err(|_| invalid())?),
            PlcValueType::Lreal => Self::Lreal(text.parse().map_err(|_| invalid())?),
            PlcValueType::Char => {
                let mut chars = text.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Self::Char(c),
                    _ => return Err(invalid()),
                }
            },
            PlcValueType::String => Self::String(text.to_string()),
        };
        Ok(value)
    }
}

fn parse_int(text: &str) -> Option<i128> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let magnitude = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => i128::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i128>().ok()?,
    };
    Some(if negative { -magnitude } else { magnitude })
}

impl fmt::Display for PlcValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(v) => write!(f, "{}", v),
            Self::Byte(v) | Self::Usint(v) => write!(f, "{}", v),
            Self::Word(v) | Self::Uint(v) => write!(f, "{}", v),
            Self::Dword(v) | Self::Udint(v) => write!(f, "{}", v),
            Self::Lword(v) | Self::Ulint(v) => write!(f, "{}", v),
            Self::Sint(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Dint(v) => write!(f, "{}", v),
            Self::Lint(v) => write!(f, "{}", v),
            Self::Real(v) => write!(f, "{}", v),
            Self::Lreal(v) => write!(f, "{}", v),
            Self::Char(v) => write!(f, "'{}'", v),
            Self::String(v) => write!(f, "\"{}\"", v),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            },
        }
    }
}
