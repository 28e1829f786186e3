//! One-call entry points: open, size, prime, overwrite, flush.

use crate::config::ShredConfig;
use crate::error::{Result, ShredError};
use crate::pipeline::{PipelineStats, Progress};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::time::Duration;

/// Outcome of a successful shred
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShredReport {
    /// Resolved target length
    pub target_len: u64,
    /// Pipeline counters
    pub stats: PipelineStats,
    /// Wall time from priming to the end of the flush
    pub elapsed: Duration,
}

impl ShredReport {
    /// Bytes confirmed written
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.stats.bytes_written
    }

    /// Bytes per second over the whole run
    #[must_use]
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.stats.bytes_written as f64 / secs
        } else {
            0.0
        }
    }
}

/// Open `path` write-only and overwrite all of it.
///
/// # Errors
///
/// Returns [`ShredError::Open`] if the target cannot be opened, otherwise
/// whatever [`shred_file`] reports.
pub fn shred_path<P: AsRef<Path>>(
    path: P,
    config: &ShredConfig,
    observer: impl FnMut(Progress),
) -> Result<ShredReport> {
    let path = path.as_ref();
    config.validate()?;

    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|source| ShredError::Open {
            path: path.to_path_buf(),
            source,
        })?;

    tracing::info!(path = %path.display(), "shredding");
    shred_file(&file, config, observer)
}

/// Overwrite all of an already open target.
///
/// The file is borrowed and left open.
///
/// # Errors
///
/// - [`ShredError::RandomSource`] if the random source cannot be opened or read
/// - [`ShredError::Resolution`] if the target length cannot be determined
/// - [`ShredError::Backend`] if io_uring cannot be set up
/// - any error of [`Session::run`](crate::pipeline::Session::run)
#[cfg(target_os = "linux")]
pub fn shred_file(
    file: &File,
    config: &ShredConfig,
    observer: impl FnMut(Progress),
) -> Result<ShredReport> {
    use crate::pipeline::Session;
    use crate::random::open_source;
    use crate::size::resolve_size;
    use crate::slot::SlotPool;
    use crate::uring::UringTarget;
    use std::time::Instant;

    let start = Instant::now();

    let mut random = open_source(&config.random_source)?;
    let pool = SlotPool::prime(config, &mut random)?;
    let target_len = resolve_size(file)?;

    tracing::info!(
        bytes = target_len,
        slots = pool.len(),
        capacity = pool.capacity(),
        random = %config.random_source,
        "target resolved"
    );

    let mut target = UringTarget::new(file, pool.len()).map_err(ShredError::Backend)?;
    let stats = Session::new(&mut target, random, pool, target_len)
        .with_progress(observer)
        .run()?;

    Ok(ShredReport {
        target_len,
        stats,
        elapsed: start.elapsed(),
    })
}

/// Overwrite all of an already open target.
///
/// # Errors
///
/// Always returns [`ShredError::Backend`]: overlapped writes need io_uring.
#[cfg(not(target_os = "linux"))]
pub fn shred_file(
    _file: &File,
    _config: &ShredConfig,
    _observer: impl FnMut(Progress),
) -> Result<ShredReport> {
    Err(ShredError::Backend(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "overlapped writes require io_uring (Linux)",
    )))
}
