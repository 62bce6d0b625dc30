//! # Configuration Utilities
//!
//! Shared configuration loading used by both the server and client binaries.
//! Every configuration struct in the crate derives `Default` and fills missing
//! TOML keys with the same defaults, so an empty file is a valid configuration.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

/// Load a TOML configuration file and deserialize it into the specified type.
///
/// # Arguments
/// - `path`: Path to the TOML configuration file
///
/// # Returns
/// - `Ok(T)`: Successfully loaded and parsed configuration
/// - `Err`: File I/O or parsing error
///
/// # Example
/// ```ignore
/// let config: ServerConfig = load_config("config/server.toml")?;
/// ```
pub fn load_config<T>(path: impl AsRef<Path>) -> Result<T>
where
    T: DeserializeOwned,
{
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    parse_config(&content).with_context(|| format!("invalid config file {}", path.display()))
}

/// Parse TOML text into a configuration value.
pub fn parse_config<T>(content: &str) -> Result<T>
where
    T: DeserializeOwned,
{
    let config: T = toml::from_str(content)?;
    Ok(config)
}

/// Load `path` if given, otherwise fall back to `T::default()`.
pub fn load_or_default<T>(path: Option<&str>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    match path {
        Some(path) => load_config(path),
        None => Ok(T::default()),
    }
}
