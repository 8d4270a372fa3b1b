//! `VoltageEMS` basic library
//!
//! Provides functions shared by the PLC driver crates and tools:
//! - logging initialization and runtime level changes
//! - layered configuration loading
//! - hex helpers for frame dumps

pub mod config_loader;
pub mod hex;
pub mod logging;

pub use config_loader::{get_config_value, load_config_from_file, load_layered};
