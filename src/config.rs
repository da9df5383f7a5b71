//! Engine configuration.
//!
//! Supports TOML config files, environment variable overrides, and defaults.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Tunables shared by the store, history, presence and grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Maximum entries kept on each of the undo and redo stacks (default: 100)
    pub history_capacity: usize,
    /// Remote cursors idle longer than this are evicted, in ms (default: 15000)
    pub presence_timeout_ms: u64,
    /// How often the presence sweep runs, in ms (default: 5000)
    pub sweep_interval_ms: u64,
    /// Extra rows rendered above and below the viewport (default: 5)
    pub overscan: usize,
    /// Grid row height in pixels (default: 40)
    pub row_height: f64,
    /// Prefix for persisted keys (default: "livegrid")
    pub storage_prefix: String,
    /// Rows inserted per chunk by bulk import (default: 5000)
    pub bulk_chunk_size: usize,
    /// Messages buffered per receiver on the broadcast bus (default: 256)
    pub bus_capacity: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            history_capacity: 100,
            presence_timeout_ms: 15_000,
            sweep_interval_ms: 5_000,
            overscan: 5,
            row_height: 40.0,
            storage_prefix: "livegrid".to_string(),
            bulk_chunk_size: 5_000,
            bus_capacity: 256,
        }
    }
}

impl GridConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string. Missing fields keep defaults.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: GridConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let toml = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), toml)?;
        Ok(())
    }

    /// Applies environment variable overrides.
    /// Variables are prefixed with `LIVEGRID_`, e.g. `LIVEGRID_OVERSCAN=10`.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Same as [`GridConfig::apply_env_overrides`] with an explicit lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_with(&lookup, "LIVEGRID_HISTORY_CAPACITY", &mut self.history_capacity)?;
        override_with(&lookup, "LIVEGRID_PRESENCE_TIMEOUT_MS", &mut self.presence_timeout_ms)?;
        override_with(&lookup, "LIVEGRID_SWEEP_INTERVAL_MS", &mut self.sweep_interval_ms)?;
        override_with(&lookup, "LIVEGRID_OVERSCAN", &mut self.overscan)?;
        override_with(&lookup, "LIVEGRID_ROW_HEIGHT", &mut self.row_height)?;
        override_with(&lookup, "LIVEGRID_STORAGE_PREFIX", &mut self.storage_prefix)?;
        override_with(&lookup, "LIVEGRID_BULK_CHUNK_SIZE", &mut self.bulk_chunk_size)?;
        override_with(&lookup, "LIVEGRID_BUS_CAPACITY", &mut self.bus_capacity)?;
        self.validate()
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.row_height.is_nan() || self.row_height <= 0.0 {
            return Err(invalid("row_height", self.row_height));
        }
        if self.bulk_chunk_size == 0 {
            return Err(invalid("bulk_chunk_size", self.bulk_chunk_size));
        }
        if self.bus_capacity == 0 {
            return Err(invalid("bus_capacity", self.bus_capacity));
        }
        if self.storage_prefix.trim().is_empty() {
            return Err(invalid("storage_prefix", &self.storage_prefix));
        }
        Ok(())
    }

    pub fn presence_timeout(&self) -> Duration {
        Duration::from_millis(self.presence_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

fn override_with<T, F>(lookup: &F, key: &str, field: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup(key) {
        *field = val.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: val.clone(),
        })?;
    }
    Ok(())
}

fn invalid(key: &str, value: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}
