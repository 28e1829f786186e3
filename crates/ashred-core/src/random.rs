//! Random byte sources used to fill slot buffers.
//!
//! The pipeline reads from its source synchronously and only into buffers
//! that have no write outstanding.

use crate::config::RandomSourceSpec;
use crate::error::{Result, ShredError};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// A blocking source of random bytes.
pub trait RandomSource {
    /// Fill all of `buf` with random bytes.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the source cannot supply
    /// `buf.len()` bytes.
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<()>;
}

impl<R: RandomSource + ?Sized> RandomSource for &mut R {
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<()> {
        (**self).fill(buf)
    }
}

impl<R: RandomSource + ?Sized> RandomSource for Box<R> {
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<()> {
        (**self).fill(buf)
    }
}

/// Random device opened read-only, e.g. `/dev/urandom`.
///
/// Closed when dropped.
#[derive(Debug)]
pub struct DeviceRandom {
    file: File,
}

impl DeviceRandom {
    /// Open a random device.
    ///
    /// # Errors
    ///
    /// Returns [`ShredError::RandomSource`] if the device cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path).map_err(ShredError::RandomSource)?;
        Ok(Self { file })
    }
}

impl RandomSource for DeviceRandom {
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.file.read_exact(buf)
    }
}

/// The operating system CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<()> {
        getrandom::fill(buf).map_err(|err| match err.raw_os_error() {
            Some(code) => io::Error::from_raw_os_error(code),
            None => io::Error::other(err.to_string()),
        })
    }
}

/// Open the source named by `spec`.
///
/// # Errors
///
/// Returns [`ShredError::RandomSource`] if a device source cannot be opened.
pub fn open_source(spec: &RandomSourceSpec) -> Result<Box<dyn RandomSource>> {
    match spec {
        RandomSourceSpec::Device(path) => Ok(Box::new(DeviceRandom::open(path)?)),
        RandomSourceSpec::Os => Ok(Box::new(OsRandom)),
    }
}
