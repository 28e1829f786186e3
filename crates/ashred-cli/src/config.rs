//! Configuration for the ashred CLI.
//!
//! Nothing is read from disk unless `--config` names a file; command-line
//! flags override whatever the file says.

use ashred_core::config::{RandomSourceSpec, ShredConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// ashred configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Pipeline configuration
    #[serde(default)]
    pub shred: ShredConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Command-line values that take precedence over the file
#[derive(Debug, Default)]
pub struct Overrides {
    pub slots: Option<usize>,
    pub buffer_size: Option<usize>,
    pub random_source: Option<RandomSourceSpec>,
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Apply command-line overrides
    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(slots) = overrides.slots {
            self.shred.slot_count = slots;
        }
        if let Some(buffer_size) = overrides.buffer_size {
            self.shred.buffer_capacity = buffer_size;
        }
        if let Some(random_source) = overrides.random_source {
            self.shred.random_source = random_source;
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.shred.validate()?;

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }
}

/// Parse a byte size such as `4096`, `64K`, `1M` or `1MiB`.
///
/// # Errors
///
/// Returns a message if the number or the suffix is not understood.
pub fn parse_size(s: &str) -> Result<usize, String> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, suffix) = s.split_at(split);

    let value: usize = digits
        .parse()
        .map_err(|_| format!("invalid size: {s}"))?;

    let multiplier: usize = match suffix.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => 1024,
        "m" | "mb" | "mib" => 1024 * 1024,
        "g" | "gb" | "gib" => 1024 * 1024 * 1024,
        other => return Err(format!("unknown size suffix: {other}")),
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size too large: {s}"))
}
