//! Unified logging module for VoltageEMS PLC tools
//!
//! Console output (stderr) in the bracketed `timestamp [LEVEL] crate: message`
//! format, an optional daily rolling log file, and a reloadable filter so the
//! level can be changed at runtime.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{
        self,
        format::{FmtSpan, Writer},
        FmtContext, FormatEvent, FormatFields,
    },
    layer::SubscriberExt,
    registry::LookupSpan,
    reload,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Bracketed level tag and its ANSI color
fn level_tag(level: Level) -> (&'static str, &'static str) {
    match level {
        Level::TRACE => ("[TRACE]", "\x1b[35m"),
        Level::DEBUG => ("[DEBUG]", "\x1b[34m"),
        Level::INFO => ("[INFO]", "\x1b[32m"),
        Level::WARN => ("[WARN]", "\x1b[33m"),
        Level::ERROR => ("[ERROR]", "\x1b[31m"),
    }
}

/// Crate part of an event target: `voltage_driver::connection` -> `voltage_driver`
fn crate_of(target: &str) -> &str {
    target.split("::").next().unwrap_or(target)
}

/// Event formatter producing `timestamp [LEVEL] crate: message`
///
/// Example: `2025-12-02T00:50:44.809512Z [INFO] voltage_driver: Connected modbus-tcp://10.0.0.5`
struct PlcLineFormat;

impl<S, N> FormatEvent<S, N> for PlcLineFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let meta = event.metadata();
        let (tag, color) = level_tag(*meta.level());
        let stamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ");

        if writer.has_ansi_escapes() {
            write!(writer, "{} {}{}\x1b[0m ", stamp, color, tag)?;
            write!(writer, "\x1b[2m{}:\x1b[0m ", crate_of(meta.target()))?;
        } else {
            write!(writer, "{} {} {}: ", stamp, tag, crate_of(meta.target()))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

// Keeps the non-blocking file writer alive for the life of the process
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

// Dynamic log level reload support
type EnvFilterReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;
static LOG_FILTER_HANDLE: OnceLock<EnvFilterReloadHandle> = OnceLock::new();
static CURRENT_LOG_LEVEL: OnceLock<Mutex<String>> = OnceLock::new();

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log file name prefix
    pub service_name: String,
    /// Directory for daily log files; console only when `None`
    pub log_dir: Option<PathBuf>,
    /// Level used when `RUST_LOG` is not set
    pub console_level: Level,
    /// Enable JSON format for the file layer
    pub enable_json: bool,
    /// Enable ANSI colors on the console
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "plc".to_string(),
            log_dir: None,
            console_level: Level::INFO,
            enable_json: false,
            ansi: true,
        }
    }
}

/// Filter directive in effect at startup: `RUST_LOG` wins over `console_level`
fn startup_directive(config: &LogConfig) -> String {
    match std::env::var("RUST_LOG") {
        Ok(directive) if !directive.trim().is_empty() => directive,
        _ => config.console_level.as_str().to_lowercase(),
    }
}

/// Daily rolling `<service_name>.log.<date>` files under `dir`
fn file_layer<S>(
    config: &LogConfig,
    dir: &Path,
) -> Result<Box<dyn Layer<S> + Send + Sync>, Box<dyn std::error::Error>>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    std::fs::create_dir_all(dir)?;
    let appender = tracing_appender::rolling::daily(dir, format!("{}.log", config.service_name));
    let (writer, guard) = tracing_appender::non_blocking(appender);
    FILE_GUARD
        .set(guard)
        .map_err(|_| "file logging already initialized")?;

    let layer = if config.enable_json {
        fmt::layer()
            .json()
            .with_writer(writer)
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .event_format(PlcLineFormat)
            .boxed()
    };
    Ok(layer)
}

fn remember_directive(directive: &str) {
    let current = CURRENT_LOG_LEVEL.get_or_init(|| Mutex::new(String::new()));
    if let Ok(mut guard) = current.lock() {
        *guard = directive.to_string();
    }
}

/// Install the global subscriber
///
/// Fails when the filter directive is invalid or a subscriber is already
/// installed.
pub fn init_with_config(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let directive = startup_directive(&config);
    let (filter, handle) = reload::Layer::new(EnvFilter::try_new(&directive)?);

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(config.ansi)
        .event_format(PlcLineFormat)
        .boxed();
    let file = config
        .log_dir
        .as_deref()
        .map(|dir| file_layer(&config, dir))
        .transpose()?;

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()?;

    let _ = LOG_FILTER_HANDLE.set(handle);
    remember_directive(&directive);
    tracing::debug!(
        "Logging {} at '{}' (file: {:?})",
        config.service_name,
        directive,
        config.log_dir
    );
    Ok(())
}

/// Replace the active filter, e.g. `"debug"` or `"warn,voltage_protocols=trace"`
pub fn set_log_level(level: &str) -> Result<(), String> {
    let handle = LOG_FILTER_HANDLE
        .get()
        .ok_or("Logging not initialized with reload support")?;

    let new_filter =
        EnvFilter::try_new(level).map_err(|e| format!("Invalid log level '{}': {}", level, e))?;

    handle
        .reload(new_filter)
        .map_err(|e| format!("Failed to reload log filter: {}", e))?;

    remember_directive(level);
    tracing::info!("Log level changed to: {}", level);
    Ok(())
}

/// Get current log filter level
pub fn get_log_level() -> String {
    CURRENT_LOG_LEVEL
        .get()
        .and_then(|m| m.lock().ok())
        .map(|guard| guard.clone())
        .unwrap_or_else(|| "unknown".to_string())
}
