//! Driver and transport registry
//!
//! [`PlcSystem`] maps protocol codes to driver factories and transport codes
//! to transport factories, and turns a connection string into a
//! [`Connection`] with its connect task queued.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use errors::{PlcError, Result};
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::connection::{Connection, ConnectionCore};
use crate::connection_string::ConnectionString;
use crate::driver::DriverFactory;
use crate::execution::ConnectExecution;
use crate::transport::{TransportFactory, TransportTarget};

/// Registry of drivers and transports
#[derive(Default)]
pub struct PlcSystem {
    drivers: DashMap<String, Arc<dyn DriverFactory>>,
    transports: DashMap<String, Arc<dyn TransportFactory>>,
    config_file: Option<PathBuf>,
}

impl std::fmt::Debug for PlcSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlcSystem")
            .field("drivers", &self.driver_codes())
            .field("transports", &self.transport_codes())
            .field("config_file", &self.config_file)
            .finish()
    }
}

impl PlcSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Config file layered under the connection string parameters
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    pub fn config_file(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }

    pub fn register_driver(&self, factory: Arc<dyn DriverFactory>) {
        let code = factory.code().to_string();
        debug!("Registering driver {} ({})", code, factory.name());
        if self.drivers.insert(code.clone(), factory).is_some() {
            warn!("Driver '{}' registered twice, replacing", code);
        }
    }

    pub fn register_transport(&self, factory: Arc<dyn TransportFactory>) {
        let code = factory.code().to_string();
        debug!("Registering transport {} ({})", code, factory.name());
        if self.transports.insert(code.clone(), factory).is_some() {
            warn!("Transport '{}' registered twice, replacing", code);
        }
    }

    /// Registered protocol codes, sorted
    pub fn driver_codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.drivers.iter().map(|e| e.key().clone()).collect();
        codes.sort();
        codes
    }

    /// Registered transport codes, sorted
    pub fn transport_codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.transports.iter().map(|e| e.key().clone()).collect();
        codes.sort();
        codes
    }

    fn driver(&self, code: &str) -> Result<Arc<dyn DriverFactory>> {
        if self.drivers.is_empty() {
            return Err(PlcError::NoDriverAvailable);
        }
        self.drivers
            .get(code)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| PlcError::UnknownDriver(code.to_string()))
    }

    fn transport(&self, code: &str) -> Result<Arc<dyn TransportFactory>> {
        if self.transports.is_empty() {
            return Err(PlcError::NoTransportAvailable);
        }
        self.transports
            .get(code)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| PlcError::UnknownTransport(code.to_string()))
    }

    /// Resolve driver, transport and configuration; nothing is queued yet
    pub fn create_connection(&self, connection_string: &str) -> Result<Connection> {
        let parsed: ConnectionString = connection_string.parse()?;

        let driver_factory = self.driver(parsed.protocol_code())?;
        let parsed = match driver_factory.default_transport() {
            Some(default) => parsed.with_default_transport(default),
            None => parsed,
        };
        let transport_code = parsed
            .transport_code()
            .ok_or(PlcError::UnspecifiedTransport)?
            .to_string();
        let transport_factory = self.transport(&transport_code)?;

        let config = ConnectionConfig::resolve(&parsed, self.config_file.as_deref())?;
        let transport = transport_factory.create(&TransportTarget {
            connect_info: parsed.connect_info(),
            default_port: driver_factory.default_port(),
            config: &config,
        })?;
        let driver = driver_factory.create(&parsed, &config)?;

        info!(
            "Created connection {} (driver {}, transport {})",
            parsed,
            driver_factory.name(),
            transport_factory.name()
        );
        Ok(Connection::new(ConnectionCore::new(parsed, config, transport), driver))
    }

    /// Create a connection and queue its connect task
    ///
    /// The connection is connected once the returned execution finishes
    /// successfully; drive it with [`Connection::poll_once`] or a
    /// [`crate::Scheduler`].
    pub fn connect(&self, connection_string: &str) -> Result<(Connection, ConnectExecution)> {
        let mut connection = self.create_connection(connection_string)?;
        let connecting = connection.connect()?;
        Ok((connection, connecting))
    }
}
