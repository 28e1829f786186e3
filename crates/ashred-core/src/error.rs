//! Error types for the shred pipeline.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Shred errors
///
/// Every variant is fatal for the run that produced it; nothing is retried.
#[derive(Debug, Error)]
pub enum ShredError {
    /// Target could not be opened for writing
    #[error("cannot open {}: {source}", path.display())]
    Open {
        /// Target path
        path: PathBuf,
        /// Underlying cause
        #[source]
        source: io::Error,
    },

    /// Target length could not be determined
    #[error("cannot determine target size: {0}")]
    Resolution(#[source] io::Error),

    /// Random source could not be opened or read
    #[error("random source failed: {0}")]
    RandomSource(#[source] io::Error),

    /// A dispatched write failed, either on submission or on completion
    #[error("write at offset {offset} failed: {source}")]
    Write {
        /// Destination offset of the failed range
        offset: u64,
        /// Underlying cause
        #[source]
        source: io::Error,
    },

    /// Final durability flush failed
    #[error("failed to flush writes: {0}")]
    Flush(#[source] io::Error),

    /// Waiting for any outstanding write to complete failed
    #[error("suspend failed: {0}")]
    Suspend(#[source] io::Error),

    /// The overlapped I/O backend could not be set up for the target
    #[error("cannot set up overlapped I/O: {0}")]
    Backend(#[source] io::Error),

    /// Pool geometry rejected before anything was opened
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ShredError {
    /// The underlying system error code, if the failure came from the OS.
    #[must_use]
    pub fn raw_os_error(&self) -> Option<i32> {
        self.io_source().and_then(io::Error::raw_os_error)
    }

    /// The underlying I/O error, if any.
    #[must_use]
    pub fn io_source(&self) -> Option<&io::Error> {
        match self {
            Self::Open { source, .. } | Self::Write { source, .. } => Some(source),
            Self::Resolution(source)
            | Self::RandomSource(source)
            | Self::Flush(source)
            | Self::Suspend(source)
            | Self::Backend(source) => Some(source),
            Self::InvalidConfig(_) => None,
        }
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, ShredError>;
