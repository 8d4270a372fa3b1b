//! Connection string parsing
//!
//! Format: `protocol[:transport]://connect-info[?key=value&key=value]`
//!
//! Examples:
//! - `modbus-tcp://192.168.1.10:502?unit_id=3`
//! - `modbus-rtu:dummy://line-1`
//! - `simulated://local`

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use errors::PlcError;

/// A parsed connection string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    raw: String,
    protocol_code: String,
    transport_code: Option<String>,
    connect_info: String,
    parameters: BTreeMap<String, String>,
}

impl ConnectionString {
    pub fn protocol_code(&self) -> &str {
        &self.protocol_code
    }

    /// Transport given explicitly in the string, if any
    pub fn transport_code(&self) -> Option<&str> {
        self.transport_code.as_deref()
    }

    /// Transport-specific target, e.g. `host:port`
    pub fn connect_info(&self) -> &str {
        &self.connect_info
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Fill in the transport when the string did not name one
    pub(crate) fn with_default_transport(mut self, transport: &str) -> Self {
        if self.transport_code.is_none() {
            self.transport_code = Some(transport.to_string());
        }
        self
    }
}

fn invalid(raw: &str, reason: &str) -> PlcError {
    PlcError::InvalidConnectionString(format!("'{}': {}", raw, reason))
}

fn is_code(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

impl FromStr for ConnectionString {
    type Err = PlcError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.is_empty() {
            return Err(invalid(raw, "empty connection string"));
        }

        let (scheme, rest) = raw
            .split_once("://")
            .ok_or_else(|| invalid(raw, "missing '://'"))?;

        let (protocol_code, transport_code) = match scheme.split_once(':') {
            Some((protocol, transport)) => (protocol, Some(transport)),
            None => (scheme, None),
        };
        if !is_code(protocol_code) {
            return Err(invalid(raw, "missing or malformed protocol code"));
        }
        if let Some(transport) = transport_code {
            if !is_code(transport) {
                return Err(invalid(raw, "malformed transport code"));
            }
        }

        let (connect_info, query) = match rest.split_once('?') {
            Some((info, query)) => (info, Some(query)),
            None => (rest, None),
        };
        if connect_info.is_empty() {
            return Err(invalid(raw, "missing transport connect information"));
        }

        let mut parameters = BTreeMap::new();
        if let Some(query) = query {
            if query.contains('?') {
                return Err(invalid(raw, "more than one '?'"));
            }
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (key, value) = pair
                    .split_once('=')
                    .ok_or_else(|| invalid(raw, "parameter without '='"))?;
                if key.is_empty() {
                    return Err(invalid(raw, "parameter with empty key"));
                }
                parameters.insert(key.to_string(), value.to_string());
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            protocol_code: protocol_code.to_string(),
            transport_code: transport_code.map(str::to_string),
            connect_info: connect_info.to_string(),
            parameters,
        })
    }
}

impl fmt::Display for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use errors::ReturnCode;

    #[test]
    fn test_full_form() {
        let cs: ConnectionString = "modbus-tcp:tcp://10.0.0.5:502?unit_id=3&request_timeout_ms=250"
            .parse()
            .unwrap();
        assert_eq!(cs.protocol_code(), "modbus-tcp");
        assert_eq!(cs.transport_code(), Some("tcp"));
        assert_eq!(cs.connect_info(), "10.0.0.5:502");
        assert_eq!(cs.parameter("unit_id"), Some("3"));
        assert_eq!(cs.parameters().len(), 2);
    }

    #[test]
    fn test_default_transport() {
        let cs: ConnectionString = "simulated://local".parse().unwrap();
        assert_eq!(cs.transport_code(), None);
        assert!(cs.parameters().is_empty());

        let cs = cs.with_default_transport("dummy");
        assert_eq!(cs.transport_code(), Some("dummy"));

        let explicit: ConnectionString = "simulated:tcp://local".parse().unwrap();
        assert_eq!(
            explicit.with_default_transport("dummy").transport_code(),
            Some("tcp")
        );
    }

    #[test]
    fn test_invalid_strings() {
        for raw in [
            "",
            "modbus-tcp",
            "://host",
            "modbus-tcp:://host",
            "modbus-tcp://",
            "modbus-tcp://host?a=1?b=2",
            "modbus-tcp://host?novalue",
            "modbus-tcp://host?=1",
            "mod bus://host",
        ] {
            let err = raw.parse::<ConnectionString>().unwrap_err();
            assert_eq!(err.code(), ReturnCode::InvalidConnectionString, "{}", raw);
        }
    }

    #[test]
    fn test_display_keeps_raw() {
        let raw = "modbus-rtu:dummy://line-1?checksum_policy=warn";
        let cs: ConnectionString = raw.parse().unwrap();
        assert_eq!(cs.to_string(), raw);
        assert_eq!(cs.as_str(), raw);
    }
}
