//! Text encodings for string fields

use serde::{Deserialize, Serialize};

use crate::error::{CodecError, Result};

/// Encoding of a string field's bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TextEncoding {
    #[default]
    Utf8,
    Ascii,
    Utf16Be,
    Utf16Le,
}

impl TextEncoding {
    /// Parse names as they appear in field grammars ("UTF-8", "UTF-16LE", ...)
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        let normalized = s.to_uppercase().replace(['-', '_'], "");
        match normalized.as_str() {
            "UTF8" => Some(Self::Utf8),
            "ASCII" | "USASCII" => Some(Self::Ascii),
            "UTF16" | "UTF16BE" => Some(Self::Utf16Be),
            "UTF16LE" => Some(Self::Utf16Le),
            _ => None,
        }
    }

    /// Size of one code unit in bytes
    pub fn unit_size(&self) -> usize {
        match self {
            Self::Utf8 | Self::Ascii => 1,
            Self::Utf16Be | Self::Utf16Le => 2,
        }
    }

    pub fn encode(&self, text: &str) -> Result<Vec<u8>> {
        match self {
            Self::Utf8 => Ok(text.as_bytes().to_vec()),
            Self::Ascii => {
                if !text.is_ascii() {
                    return Err(CodecError::invalid_encoding(format!(
                        "non-ASCII characters in '{}'",
                        text
                    )));
                }
                Ok(text.as_bytes().to_vec())
            },
            Self::Utf16Be => Ok(text.encode_utf16().flat_map(u16::to_be_bytes).collect()),
            Self::Utf16Le => Ok(text.encode_utf16().flat_map(u16::to_le_bytes).collect()),
        }
    }

    /// Decode bytes, dropping trailing NUL padding
    pub fn decode(&self, bytes: &[u8]) -> Result<String> {
        let text = match self {
            Self::Utf8 => String::from_utf8(bytes.to_vec())
                .map_err(|e| CodecError::invalid_encoding(e.to_string()))?,
            Self::Ascii => {
                if !bytes.is_ascii() {
                    return Err(CodecError::invalid_encoding("non-ASCII byte in string"));
                }
                bytes.iter().map(|b| *b as char).collect()
            },
            Self::Utf16Be | Self::Utf16Le => {
                if bytes.len() % 2 != 0 {
                    return Err(CodecError::invalid_encoding(format!(
                        "odd byte length {} for UTF-16",
                        bytes.len()
                    )));
                }
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| match self {
                        Self::Utf16Le => u16::from_le_bytes([pair[0], pair[1]]),
                        _ => u16::from_be_bytes([pair[0], pair[1]]),
                    })
                    .collect();
                String::from_utf16(&units)
                    .map_err(|e| CodecError::invalid_encoding(e.to_string()))?
            },
        };
        Ok(text.trim_end_matches('\0').to_string())
    }
}

impl std::fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Utf8 => "UTF-8",
            Self::Ascii => "ASCII",
            Self::Utf16Be => "UTF-16BE",
            Self::Utf16Le => "UTF-16LE",
        };
        write!(f, "{}", name)
    }
}
