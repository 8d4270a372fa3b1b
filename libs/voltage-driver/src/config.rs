//! Per-connection configuration
//!
//! Resolved once when a connection is created:
//! defaults → optional config file → `PLC_*` environment → connection string
//! parameters.

use std::path::Path;
use std::time::Duration;

use errors::{PlcError, Result};
use serde::{Deserialize, Serialize};
use voltage_codec::{ByteOrder, ChecksumPolicy};

use crate::connection_string::ConnectionString;

/// Environment prefix for connection settings
pub const ENV_PREFIX: &str = "PLC_";

/// Settings shared by every driver and transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Time allowed for one read or write request
    pub request_timeout_ms: u64,
    /// Time allowed for opening the transport
    pub connect_timeout_ms: u64,
    /// Largest frame the driver will build or accept
    pub max_message_size: usize,
    /// Retries of a failed exchange before the request fails
    pub max_retries: u32,
    /// Slave / unit identifier for bus protocols
    pub unit_id: u8,
    /// Handling of received frames with a bad checksum
    pub checksum_policy: ChecksumPolicy,
    /// Byte order of multi-register values
    pub byte_order: ByteOrder,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5000,
            connect_timeout_ms: 5000,
            max_message_size: 260,
            max_retries: 3,
            unit_id: 1,
            checksum_policy: ChecksumPolicy::Reject,
            byte_order: ByteOrder::BigEndian,
        }
    }
}

impl ConnectionConfig {
    /// Resolve the configuration for one connection
    pub fn resolve(connection_string: &ConnectionString, file: Option<&Path>) -> Result<Self> {
        let config: Self = common::load_layered(
            &Self::default(),
            file,
            ENV_PREFIX,
            connection_string.parameters(),
        )?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_ms == 0 {
            return Err(PlcError::config("request_timeout_ms must be greater than 0"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(PlcError::config("connect_timeout_ms must be greater than 0"));
        }
        if self.max_message_size < 8 {
            return Err(PlcError::config(format!(
                "max_message_size {} is too small",
                self.max_message_size
            )));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cs: ConnectionString = "simulated://local".parse().unwrap();
        let config = ConnectionConfig::resolve(&cs, None).unwrap();
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.checksum_policy, ChecksumPolicy::Reject);
    }

    #[test]
    fn test_parameters_override_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "unit_id = 9\nmax_retries = 1\nbyte_order = \"little_endian\"").unwrap();

        let cs: ConnectionString = "modbus-rtu:dummy://line?unit_id=4&checksum_policy=warn"
            .parse()
            .unwrap();
        let config = ConnectionConfig::resolve(&cs, Some(file.path())).unwrap();
        assert_eq!(config.unit_id, 4);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.byte_order, ByteOrder::LittleEndian);
        assert_eq!(config.checksum_policy, ChecksumPolicy::Warn);
    }

    #[test]
    fn test_invalid_values() {
        let cs: ConnectionString = "simulated://local?request_timeout_ms=0".parse().unwrap();
        let err = ConnectionConfig::resolve(&cs, None).unwrap_err();
        assert_eq!(err.code(), errors::ReturnCode::InvalidConfiguration);

        let cs: ConnectionString = "simulated://local?unit_id=300".parse().unwrap();
        assert!(ConnectionConfig::resolve(&cs, None).is_err());
    }
}
