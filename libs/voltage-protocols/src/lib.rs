//! VoltageEMS Protocol Implementations
//!
//! Protocol drivers for the VoltageEMS PLC driver engine. Protocols are
//! feature-gated for selective compilation.
//!
//! # Features
//!
//! - `simulated` - In-process data source for testing (`simulated://`)
//! - `modbus` - Modbus TCP and RTU (`modbus-tcp://`, `modbus-rtu:tcp://`)
//!
//! # Architecture
//!
//! Every protocol implements `Driver` and `DriverFactory` from
//! `voltage-driver`. [`register_all`] adds the compiled-in drivers and the
//! standard transports to a `PlcSystem`.

use std::sync::Arc;

use voltage_driver::transport::TcpTransportFactory;
use voltage_driver::PlcSystem;

#[cfg(feature = "modbus")]
pub mod modbus;

#[cfg(feature = "simulated")]
pub mod simulated;

/// Register every compiled-in driver plus the `tcp` and `dummy` transports
pub fn register_all(system: &PlcSystem) {
    #[cfg(feature = "simulated")]
    system.register_driver(Arc::new(simulated::SimulatedDriverFactory::default()));

    #[cfg(feature = "modbus")]
    {
        system.register_driver(Arc::new(modbus::ModbusTcpDriverFactory));
        system.register_driver(Arc::new(modbus::ModbusRtuDriverFactory));
    }

    system.register_transport(Arc::new(TcpTransportFactory));
    system.register_transport(Arc::new(
        voltage_driver::transport::MockTransportFactory::default(),
    ));
}
