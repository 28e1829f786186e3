//! Pipeline configuration.

use crate::error::{Result, ShredError};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Default number of buffer slots
pub const DEFAULT_SLOT_COUNT: usize = 8;

/// Default per-slot buffer capacity (128 KiB)
pub const DEFAULT_BUFFER_CAPACITY: usize = 128 * 1024;

/// Largest accepted slot count (io_uring queue depth limit)
pub const MAX_SLOT_COUNT: usize = 4096;

/// Largest accepted per-slot buffer capacity (1 GiB)
pub const MAX_BUFFER_CAPACITY: usize = 1 << 30;

/// Default random device
pub const DEFAULT_RANDOM_DEVICE: &str = "/dev/urandom";

/// Where slot buffers are filled from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RandomSourceSpec {
    /// A readable device or file, e.g. `/dev/urandom`
    Device(PathBuf),
    /// The OS CSPRNG through `getrandom`
    Os,
}

impl Default for RandomSourceSpec {
    fn default() -> Self {
        Self::Device(PathBuf::from(DEFAULT_RANDOM_DEVICE))
    }
}

impl FromStr for RandomSourceSpec {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "os" => Self::Os,
            path => Self::Device(PathBuf::from(path)),
        })
    }
}

impl From<String> for RandomSourceSpec {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(spec) => spec,
            Err(never) => match never {},
        }
    }
}

impl From<RandomSourceSpec> for String {
    fn from(spec: RandomSourceSpec) -> Self {
        spec.to_string()
    }
}

impl fmt::Display for RandomSourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device(path) => write!(f, "{}", path.display()),
            Self::Os => f.write_str("os"),
        }
    }
}

/// Shred pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShredConfig {
    /// Number of buffer slots, which is also the bound on in-flight writes
    #[serde(default = "default_slot_count")]
    pub slot_count: usize,
    /// Capacity of each slot buffer in bytes
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// Random source
    #[serde(default)]
    pub random_source: RandomSourceSpec,
}

fn default_slot_count() -> usize {
    DEFAULT_SLOT_COUNT
}

fn default_buffer_capacity() -> usize {
    DEFAULT_BUFFER_CAPACITY
}

impl Default for ShredConfig {
    fn default() -> Self {
        Self {
            slot_count: DEFAULT_SLOT_COUNT,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            random_source: RandomSourceSpec::default(),
        }
    }
}

impl ShredConfig {
    /// Check pool geometry.
    ///
    /// # Errors
    ///
    /// Returns [`ShredError::InvalidConfig`] if either the slot count or the
    /// buffer capacity is zero or above its maximum.
    pub fn validate(&self) -> Result<()> {
        if self.slot_count == 0 {
            return Err(ShredError::InvalidConfig(
                "slot_count must be at least 1".to_string(),
            ));
        }

        if self.slot_count > MAX_SLOT_COUNT {
            return Err(ShredError::InvalidConfig(format!(
                "slot_count {} exceeds maximum {MAX_SLOT_COUNT}",
                self.slot_count
            )));
        }

        if self.buffer_capacity == 0 {
            return Err(ShredError::InvalidConfig(
                "buffer_capacity must be at least 1 byte".to_string(),
            ));
        }

        if self.buffer_capacity > MAX_BUFFER_CAPACITY {
            return Err(ShredError::InvalidConfig(format!(
                "buffer_capacity {} exceeds maximum {MAX_BUFFER_CAPACITY}",
                self.buffer_capacity
            )));
        }

        Ok(())
    }

    /// Upper bound on memory held by the slot pool.
    #[must_use]
    pub fn pool_bytes(&self) -> usize {
        self.slot_count.saturating_mul(self.buffer_capacity)
    }
}
