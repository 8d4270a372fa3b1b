//! plcprobe - read and write PLC addresses from the command line
//!
//! Opens one connection through the driver registry, runs a single read or
//! write request on it and prints the per-item results.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use common::logging::{self, LogConfig};
use tracing::{debug, warn, Level};
use voltage_driver::{
    Connection, Execution, PlcField, PlcSystem, PlcValue, ReadResponse, ResponseCode, Scheduler,
    WriteResponse,
};

#[derive(Parser)]
#[command(name = "plcprobe")]
#[command(about = "Read and write PLC addresses")]
#[command(long_about = "Read and write PLC addresses

Examples:
  plcprobe read simulated://local RANDOM/temp:REAL
  plcprobe read modbus-tcp://10.0.0.5?unit_id=2 pressure=4x100:REAL 3x1[4]
  plcprobe write modbus-tcp://10.0.0.5 4x10:INT=-40 coil:3=true
  plcprobe drivers

Items may be named with `name=address`; the address is used otherwise.")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Connection settings file layered under connection string parameters
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    /// Log level (falls back to PLC_LOG_LEVEL, then "warn")
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Directory for daily log files
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Time allowed for connecting plus the request, in milliseconds
    #[arg(short, long, global = true, default_value_t = 10_000)]
    timeout_ms: u64,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Read one or more addresses
    Read {
        /// Connection string, e.g. modbus-tcp://10.0.0.5
        connection: String,

        /// Addresses as `address` or `name=address`
        #[arg(required = true)]
        items: Vec<String>,
    },

    /// Write one or more values
    Write {
        /// Connection string, e.g. modbus-tcp://10.0.0.5
        connection: String,

        /// Assignments as `address=value`; lists are comma separated
        #[arg(required = true)]
        items: Vec<String>,
    },

    /// List registered drivers and transports
    Drivers,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let level =
        common::get_config_value(cli.log_level.clone(), "PLC_LOG_LEVEL", "warn".to_string());
    let log_config = LogConfig {
        service_name: "plcprobe".to_string(),
        log_dir: cli.log_dir.clone(),
        console_level: level.parse().unwrap_or(Level::WARN),
        ansi: !cli.no_color,
        ..Default::default()
    };
    if let Err(e) = logging::init_with_config(log_config) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::FAILURE
        },
    }
}

/// Returns whether every item succeeded
fn run(cli: Cli) -> Result<bool> {
    let mut system = PlcSystem::new();
    if let Some(path) = &cli.config {
        system = system.with_config_file(path);
    }
    voltage_protocols::register_all(&system);
    let timeout = Duration::from_millis(cli.timeout_ms);

    match &cli.command {
        Commands::Drivers => {
            println!("{}", "Drivers:".bold());
            for code in system.driver_codes() {
                println!("  {}", code);
            }
            println!("{}", "Transports:".bold());
            for code in system.transport_codes() {
                println!("  {}", code);
            }
            Ok(true)
        },
        Commands::Read { connection, items } => {
            let mut connection = open(&system, connection, timeout)?;
            let response = read(&mut connection, items, timeout);
            close(connection, timeout);
            let response = response?;
            print_read(&response, cli.json)?;
            Ok(response.items().iter().all(|item| item.code.is_ok()))
        },
        Commands::Write { connection, items } => {
            let mut connection = open(&system, connection, timeout)?;
            let response = write(&mut connection, items, timeout);
            close(connection, timeout);
            let response = response?;
            print_write(&response, cli.json)?;
            Ok(response.all_ok())
        },
    }
}

// ============================================================================
// Connection handling
// ============================================================================

fn wait<T>(connection: &mut Connection, execution: &Execution<T>, timeout: Duration) -> Result<T> {
    let mut scheduler = Scheduler::new();
    let passes = scheduler.run_until_finished(connection, execution, timeout)?;
    debug!("Task {} finished after {} passes", execution.task_id(), passes);
    execution
        .take_result()
        .ok_or_else(|| anyhow!("task {} finished without a result", execution.task_id()))?
        .map_err(Into::into)
}

fn open(system: &PlcSystem, connection_string: &str, timeout: Duration) -> Result<Connection> {
    let (mut connection, connecting) = system
        .connect(connection_string)
        .with_context(|| format!("cannot create connection '{}'", connection_string))?;
    wait(&mut connection, &connecting, timeout)
        .with_context(|| format!("cannot connect to '{}'", connection_string))?;
    Ok(connection)
}

fn close(mut connection: Connection, timeout: Duration) {
    let result = connection
        .disconnect()
        .map_err(anyhow::Error::from)
        .and_then(|disconnecting| wait(&mut connection, &disconnecting, timeout));
    if let Err(e) = result {
        warn!("Disconnect from {} failed: {:#}", connection.connection_string(), e);
    }
    debug!("Transport stats: {:?}", connection.transport_stats());
}

// ============================================================================
// Requests
// ============================================================================

/// Split `name=address` (read) into its parts; a bare address names itself
fn named_address(item: &str) -> (&str, &str) {
    item.split_once('=').unwrap_or((item, item))
}

/// Split `address=value` (write)
fn assignment(item: &str) -> Result<(&str, &str)> {
    item.split_once('=')
        .ok_or_else(|| anyhow!("'{}' is not of the form address=value", item))
}

fn read(connection: &mut Connection, items: &[String], timeout: Duration) -> Result<ReadResponse> {
    let items: Vec<(&str, &str)> = items.iter().map(|item| named_address(item)).collect();
    let request = connection.create_read_request(&items)?;
    let reading = connection.execute_read(request)?;
    wait(connection, &reading, timeout)
}

/// Parse the value of `address=value` as the address's data type
fn typed_assignment<'a>(connection: &Connection, item: &'a str) -> Result<(&'a str, PlcValue)> {
    let (address, text) = assignment(item)?;
    let field = connection.parse_address(address)?;
    let value = PlcValue::from_text(field.value_type(), text)
        .with_context(|| format!("bad value for {}", address))?;
    Ok((address, value))
}

fn write(connection: &mut Connection, items: &[String], timeout: Duration) -> Result<WriteResponse> {
    let items = items
        .iter()
        .map(|item| {
            typed_assignment(connection, item).map(|(address, value)| (address, address, value))
        })
        .collect::<Result<Vec<_>>>()?;
    let request = connection.create_write_request(&items)?;
    let writing = connection.execute_write(request)?;
    wait(connection, &writing, timeout)
}

// ============================================================================
// Output
// ============================================================================

fn code_label(code: ResponseCode) -> ColoredString {
    if code.is_ok() {
        code.to_string().green()
    } else {
        code.to_string().red()
    }
}

fn print_read(response: &ReadResponse, json: bool) -> Result<()> {
    if json {
        let items: Vec<_> = response
            .items()
            .iter()
            .map(|item| {
                serde_json::json!({
                    "name": item.name,
                    "code": item.code.to_string(),
                    "value": item.value,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }
    let width = response.items().iter().map(|i| i.name.len()).max().unwrap_or(0);
    for item in response.items() {
        println!(
            "{:width$}  {:<16}  {}",
            item.name.cyan(),
            code_label(item.code),
            item.value,
            width = width
        );
    }
    Ok(())
}

fn print_write(response: &WriteResponse, json: bool) -> Result<()> {
    if json {
        let items: Vec<_> = response
            .items()
            .iter()
            .map(|item| serde_json::json!({ "name": item.name, "code": item.code.to_string() }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }
    let width = response.items().iter().map(|i| i.name.len()).max().unwrap_or(0);
    for item in response.items() {
        println!("{:width$}  {}", item.name.cyan(), code_label(item.code), width = width);
    }
    Ok(())
}
