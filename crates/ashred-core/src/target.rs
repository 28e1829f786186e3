//! Overlapped write targets.
//!
//! A target accepts positioned writes that complete asynchronously. Each
//! write is tagged with a token (the slot index) so the pipeline can ask
//! about one specific write without caring about completion order.

use std::io;

/// Completion state of one write, as seen by a non-blocking check.
#[derive(Debug)]
pub enum WriteStatus {
    /// Still in flight
    InFlight,
    /// Finished successfully after transferring this many bytes
    Complete(usize),
    /// Finished with an error
    Failed(io::Error),
}

impl WriteStatus {
    /// Build a status from a kernel-style result: a byte count, or a
    /// negated errno.
    #[must_use]
    pub fn from_result(result: i32) -> Self {
        match usize::try_from(result) {
            Ok(bytes) => Self::Complete(bytes),
            Err(_) => Self::Failed(io::Error::from_raw_os_error(-result)),
        }
    }

    /// Whether the write has finished, successfully or not
    #[must_use]
    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::InFlight)
    }
}

/// A destination that accepts overlapped writes.
///
/// All calls come from a single control thread; concurrency exists only
/// between outstanding operations.
pub trait OverlappedTarget {
    /// Queue a write of `buf` to `offset`, tagged with `token`.
    ///
    /// Queued writes are handed to the device by the next [`submit`].
    /// At most one write per token may be outstanding.
    ///
    /// [`submit`]: OverlappedTarget::submit
    ///
    /// # Safety
    ///
    /// The memory behind `buf` must stay allocated and unmodified until the
    /// completion for `token` has been observed through [`status`], or until
    /// [`quiesce`] has returned successfully.
    ///
    /// [`status`]: OverlappedTarget::status
    /// [`quiesce`]: OverlappedTarget::quiesce
    unsafe fn start_write(&mut self, token: usize, offset: u64, buf: &[u8]) -> io::Result<()>;

    /// Hand all queued writes to the device.
    ///
    /// Returns the number of writes submitted.
    fn submit(&mut self) -> io::Result<usize>;

    /// Check, without blocking, whether the write tagged `token` finished.
    ///
    /// A finished status is reported once; the token is free for reuse
    /// afterwards.
    fn status(&mut self, token: usize) -> WriteStatus;

    /// Block until at least one outstanding write has finished.
    ///
    /// Returns immediately if a finished write has not been claimed through
    /// [`status`] yet.
    ///
    /// [`status`]: OverlappedTarget::status
    fn suspend(&mut self) -> io::Result<()>;

    /// Number of writes started and not yet claimed.
    fn in_flight(&self) -> usize;

    /// Flush completed writes to stable storage.
    fn sync(&mut self) -> io::Result<()>;

    /// Wait for every outstanding write to finish, discarding results.
    ///
    /// Used when a run aborts and the buffers behind those writes are about
    /// to be released.
    fn quiesce(&mut self) -> io::Result<()>;
}
