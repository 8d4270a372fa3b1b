//! Configuration loading helper functions
//!
//! Layered loading with figment: serialized defaults, an optional config
//! file, `PREFIX_*` environment variables, then explicit key/value overrides
//! (for example the query parameters of a connection string). Later layers
//! win.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;

use errors::{PlcError, Result};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    value::{Dict, Value},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Load configuration from defaults, an optional file, env and overrides
///
/// # Arguments
/// * `defaults` - Base values, usually `T::default()`
/// * `file` - Optional YAML/TOML/JSON file, picked by extension
/// * `env_prefix` - Environment prefix such as `"PLC_"`; keys are lowercased
/// * `overrides` - Explicit string values; numbers and booleans are inferred
pub fn load_layered<T>(
    defaults: &T,
    file: Option<&Path>,
    env_prefix: &str,
    overrides: &BTreeMap<String, String>,
) -> Result<T>
where
    T: Serialize + for<'de> Deserialize<'de>,
{
    let mut figment = Figment::from(Serialized::defaults(defaults));

    if let Some(path) = file {
        figment = merge_file(figment, path)?;
    }

    figment = figment
        .merge(Env::prefixed(env_prefix))
        .merge(Serialized::defaults(overrides_to_dict(overrides)));

    figment
        .extract()
        .map_err(|e| PlcError::config(format!("Failed to load configuration: {}", e)))
}

/// Load configuration from a specific file
pub fn load_config_from_file<T, P>(path: P) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
    P: AsRef<Path>,
{
    merge_file(Figment::new(), path.as_ref())?
        .extract()
        .map_err(|e| PlcError::config(format!("Failed to load configuration from file: {}", e)))
}

fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
    if !path.exists() {
        return Err(PlcError::config(format!(
            "Config file not found: {}",
            path.display()
        )));
    }
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or_else(|| PlcError::config("Config file must have an extension"))?;

    debug!("Loading config file {}", path.display());
    match extension {
        "toml" => Ok(figment.merge(Toml::file(path))),
        "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
        "json" => Ok(figment.merge(Json::file(path))),
        _ => Err(PlcError::config(format!(
            "Unsupported config file format: {}",
            extension
        ))),
    }
}

/// Turn string overrides into typed figment values
fn overrides_to_dict(overrides: &BTreeMap<String, String>) -> Dict {
    overrides
        .iter()
        .map(|(key, raw)| (key.to_lowercase(), infer_value(raw)))
        .collect()
}

fn infer_value(raw: &str) -> Value {
    if let Ok(v) = raw.parse::<u64>() {
        return Value::from(v);
    }
    if let Ok(v) = raw.parse::<i64>() {
        return Value::from(v);
    }
    if let Ok(v) = raw.parse::<f64>() {
        return Value::from(v);
    }
    match raw.to_lowercase().as_str() {
        "true" => Value::from(true),
        "false" => Value::from(false),
        _ => Value::from(raw.to_string()),
    }
}

/// Get configuration value with priority: explicit > ENV > Default
///
/// # Arguments
/// * `explicit` - Value given on the command line or in a connection string
/// * `env_var` - Environment variable name to check
/// * `default` - Default value to use as fallback
pub fn get_config_value<T>(explicit: Option<T>, env_var: &str, default: T) -> T
where
    T: FromStr,
    T::Err: Display,
{
    if let Some(val) = explicit {
        debug!("Using explicit {}", env_var);
        return val;
    }

    if let Ok(env_str) = std::env::var(env_var) {
        match env_str.parse::<T>() {
            Ok(val) => {
                debug!("Using {} from environment: {}", env_var, env_str);
                return val;
            },
            Err(e) => {
                warn!("Failed to parse {} from environment: {}", env_var, e);
            },
        }
    }

    default
}
