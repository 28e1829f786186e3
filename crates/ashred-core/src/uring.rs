//! io_uring-backed overlapped target (Linux-only).
//!
//! [`IoUringEngine`] is a thin wrapper over a ring that only issues positioned
//! writes. [`UringTarget`] adapts it to [`OverlappedTarget`], keeping one
//! completion slot per token so the pipeline can check writes individually
//! even though the completion queue delivers them in any order.

use crate::target::{OverlappedTarget, WriteStatus};
use io_uring::{IoUring, Probe, opcode, types};
use std::fs::File;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

/// Completion event from io_uring
#[derive(Debug, Clone, Copy)]
pub struct Completion {
    /// Token the write was tagged with
    pub user_data: u64,
    /// Bytes written or negative error code
    pub result: i32,
}

/// io_uring write engine
pub struct IoUringEngine {
    ring: IoUring,
    pending: usize,
}

impl IoUringEngine {
    /// Create a new io_uring instance with specified queue depth
    ///
    /// # Arguments
    /// * `queue_depth` - Number of submission queue entries (rounded up to a power of 2 by the kernel)
    ///
    /// # Examples
    /// ```no_run
    /// # #[cfg(target_os = "linux")]
    /// # {
    /// use ashred_core::uring::IoUringEngine;
    ///
    /// let engine = IoUringEngine::new(8).unwrap();
    /// # }
    /// ```
    pub fn new(queue_depth: u32) -> io::Result<Self> {
        let ring = IoUring::new(queue_depth)?;

        let mut probe = Probe::new();
        ring.submitter().register_probe(&mut probe)?;

        if !probe.is_supported(opcode::Write::CODE) {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "io_uring write is not supported by this kernel",
            ));
        }

        Ok(Self { ring, pending: 0 })
    }

    /// Queue an async write request
    ///
    /// # Safety
    /// The caller must ensure the buffer remains valid until the completion event.
    pub unsafe fn write(
        &mut self,
        fd: RawFd,
        offset: u64,
        buf: *const u8,
        len: u32,
        user_data: u64,
    ) -> io::Result<()> {
        let write_op = opcode::Write::new(types::Fd(fd), buf, len)
            .offset(offset)
            .build()
            .user_data(user_data);

        // SAFETY: The entry only references `buf`, which the caller keeps alive
        // until the matching completion is reaped.
        unsafe {
            self.ring.submission().push(&write_op).map_err(|_| {
                io::Error::new(io::ErrorKind::WouldBlock, "submission queue is full")
            })?;
        }

        self.pending += 1;
        Ok(())
    }

    /// Submit all queued operations to the kernel
    pub fn submit(&mut self) -> io::Result<usize> {
        self.ring.submit()
    }

    /// Submit queued operations and wait for at least `min_complete`
    /// completions, retrying if interrupted by a signal.
    pub fn wait(&mut self, min_complete: usize) -> io::Result<()> {
        loop {
            match self.ring.submit_and_wait(min_complete) {
                Ok(_) => return Ok(()),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// Drain every completion currently in the queue without blocking.
    pub fn reap(&mut self, mut on_completion: impl FnMut(Completion)) -> usize {
        let mut reaped = 0;
        for cqe in self.ring.completion() {
            on_completion(Completion {
                user_data: cqe.user_data(),
                result: cqe.result(),
            });
            reaped += 1;
        }
        self.pending = self.pending.saturating_sub(reaped);
        reaped
    }

    /// Number of operations queued or in the kernel and not yet reaped
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Get the queue depth of this engine
    pub fn queue_depth(&self) -> u32 {
        self.ring.params().sq_entries()
    }
}

/// Overlapped target writing to a borrowed file through io_uring.
///
/// The file is not closed when the target is dropped.
pub struct UringTarget<'f> {
    engine: IoUringEngine,
    file: &'f File,
    fd: RawFd,
    outcomes: Vec<Option<i32>>,
    unclaimed: usize,
    in_flight: usize,
}

impl<'f> UringTarget<'f> {
    /// Build a target accepting tokens `0..tokens`.
    ///
    /// The ring is sized so that every token can have a write queued at once.
    pub fn new(file: &'f File, tokens: usize) -> io::Result<Self> {
        let depth = u32::try_from(tokens.max(1).next_power_of_two())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many tokens"))?;
        let engine = IoUringEngine::new(depth)?;

        tracing::debug!(depth = engine.queue_depth(), "io_uring target ready");

        Ok(Self {
            engine,
            file,
            fd: file.as_raw_fd(),
            outcomes: vec![None; tokens],
            unclaimed: 0,
            in_flight: 0,
        })
    }

    fn reap(&mut self) {
        let outcomes = &mut self.outcomes;
        let unclaimed = &mut self.unclaimed;
        self.engine.reap(|comp| {
            if let Some(outcome) = outcomes.get_mut(comp.user_data as usize) {
                *outcome = Some(comp.result);
                *unclaimed += 1;
            }
        });
    }
}

impl OverlappedTarget for UringTarget<'_> {
    unsafe fn start_write(&mut self, token: usize, offset: u64, buf: &[u8]) -> io::Result<()> {
        if token >= self.outcomes.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("token {token} out of range"),
            ));
        }

        let len = u32::try_from(buf.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "write too large"))?;

        // SAFETY: Forwarded caller contract: `buf` stays valid and untouched
        // until the completion for `token` is claimed or quiesce returns.
        unsafe {
            self.engine
                .write(self.fd, offset, buf.as_ptr(), len, token as u64)?;
        }

        self.in_flight += 1;
        Ok(())
    }

    fn submit(&mut self) -> io::Result<usize> {
        self.engine.submit()
    }

    fn status(&mut self, token: usize) -> WriteStatus {
        self.reap();

        match self.outcomes.get_mut(token).and_then(Option::take) {
            Some(result) => {
                self.unclaimed -= 1;
                self.in_flight -= 1;
                WriteStatus::from_result(result)
            }
            None => WriteStatus::InFlight,
        }
    }

    fn suspend(&mut self) -> io::Result<()> {
        self.reap();
        if self.unclaimed > 0 {
            return Ok(());
        }

        if self.engine.pending() == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "no outstanding writes to wait for",
            ));
        }

        self.engine.wait(1)?;
        self.reap();
        Ok(())
    }

    fn in_flight(&self) -> usize {
        self.in_flight
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file.sync_all()
    }

    fn quiesce(&mut self) -> io::Result<()> {
        while self.engine.pending() > 0 {
            let outstanding = self.engine.pending();
            self.engine.wait(outstanding)?;
            self.reap();
        }

        self.outcomes.iter_mut().for_each(|outcome| *outcome = None);
        self.unclaimed = 0;
        self.in_flight = 0;
        Ok(())
    }
}
