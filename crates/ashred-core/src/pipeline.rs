//! The overwrite pipeline.
//!
//! A [`Session`] drives one full pass over a target. Each slot cycles
//! `ReadingRandom -> WritingTarget -> ReadingRandom` until the cursor reaches
//! the target length, after which slots retire as their last write is
//! confirmed.
//!
//! ```text
//!            dispatch (cursor advances)
//!   ReadingRandom ───────────────────────▶ WritingTarget{offset,len}
//!         ▲                                        │
//!         │ refill from random source              │ completion claimed
//!         └──────────── bytes remain ◀─────────────┤
//!                                                  │ nothing left
//!                                                  ▼
//!                                                Done
//! ```
//!
//! One round is: dispatch every ready slot, sweep every writing slot for a
//! finished write, and block on "any write finished" if neither step made
//! progress. After the cursor reaches the end the remaining writes are
//! drained, then the target is flushed.

use crate::error::{Result, ShredError};
use crate::random::RandomSource;
use crate::slot::{SlotPool, SlotRole};
use crate::target::{OverlappedTarget, WriteStatus};
use std::io;

/// Counters for one completed run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Bytes confirmed written
    pub bytes_written: u64,
    /// Writes confirmed complete
    pub writes: u64,
    /// Dispatch rounds executed
    pub rounds: u64,
    /// Times the pipeline blocked waiting for a completion
    pub suspensions: u64,
}

/// Progress snapshot passed to an observer after each confirmed write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Bytes confirmed so far
    pub confirmed: u64,
    /// Target length
    pub total: u64,
}

type Observer<'a> = Box<dyn FnMut(Progress) + 'a>;

/// One overwrite pass over one target.
///
/// The session owns the slot pool and the random source; the target is
/// borrowed and never closed here. Dropping a session that still has writes
/// in flight waits for them before the buffers are released.
pub struct Session<'a, T: OverlappedTarget + ?Sized, R: RandomSource> {
    target: &'a mut T,
    random: R,
    pool: SlotPool,
    len: u64,
    cursor: u64,
    stats: PipelineStats,
    observer: Option<Observer<'a>>,
}

impl<'a, T: OverlappedTarget + ?Sized, R: RandomSource> Session<'a, T, R> {
    /// Create a session that will overwrite `len` bytes of `target`.
    ///
    /// `pool` must be primed, and `target` must accept tokens
    /// `0..pool.len()`.
    pub fn new(target: &'a mut T, random: R, pool: SlotPool, len: u64) -> Self {
        Self {
            target,
            random,
            pool,
            len,
            cursor: 0,
            stats: PipelineStats::default(),
            observer: None,
        }
    }

    /// Call `observer` after every confirmed write.
    #[must_use]
    pub fn with_progress(mut self, observer: impl FnMut(Progress) + 'a) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Next unassigned destination offset
    #[must_use]
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Overwrite the whole target and flush it.
    ///
    /// Returns the run counters; `bytes_written` equals the target length.
    ///
    /// # Errors
    ///
    /// - [`ShredError::Write`] if a write fails to submit, fails on
    ///   completion, or completes short
    /// - [`ShredError::RandomSource`] if refilling a buffer fails
    /// - [`ShredError::Suspend`] if waiting for a completion fails
    /// - [`ShredError::Flush`] if the final flush fails
    pub fn run(mut self) -> Result<PipelineStats> {
        while self.cursor < self.len {
            self.stats.rounds += 1;

            let dispatched = self.dispatch()?;
            let completed = self.sweep()?;

            if dispatched == 0 && completed == 0 {
                self.suspend()?;
            }
        }

        self.drain()?;

        self.target.sync().map_err(ShredError::Flush)?;

        tracing::debug!(
            bytes = self.stats.bytes_written,
            writes = self.stats.writes,
            rounds = self.stats.rounds,
            suspensions = self.stats.suspensions,
            "overwrite complete"
        );

        Ok(self.stats)
    }

    /// Assign the next range to every ready slot and submit the batch.
    fn dispatch(&mut self) -> Result<usize> {
        let mut first_offset = None;
        let mut dispatched = 0;

        for token in 0..self.pool.len() {
            if self.cursor >= self.len {
                break;
            }

            let slot = self.pool.slot_mut(token);
            if slot.role() != SlotRole::ReadingRandom {
                continue;
            }

            let offset = self.cursor;
            let len = usize::try_from(self.len - offset)
                .map_or(slot.capacity(), |remaining| remaining.min(slot.capacity()));

            // SAFETY: The slot is marked WritingTarget right below and its
            // buffer is neither refilled nor freed until the completion for
            // `token` is claimed in `finish`, or `Drop` has quiesced the target.
            unsafe { self.target.start_write(token, offset, slot.payload(len)) }
                .map_err(|source| ShredError::Write { offset, source })?;

            slot.set_role(SlotRole::WritingTarget { offset, len });
            self.cursor += len as u64;
            dispatched += 1;
            first_offset.get_or_insert(offset);

            tracing::trace!(token, offset, len, "write dispatched");
        }

        if let Some(offset) = first_offset {
            self.target
                .submit()
                .map_err(|source| ShredError::Write { offset, source })?;
        }

        Ok(dispatched)
    }

    /// Claim every finished write without blocking.
    fn sweep(&mut self) -> Result<usize> {
        let mut completed = 0;

        for token in 0..self.pool.len() {
            let SlotRole::WritingTarget { offset, len } = self.pool.slot_mut(token).role() else {
                continue;
            };

            match self.target.status(token) {
                WriteStatus::InFlight => continue,
                status => {
                    self.finish(token, offset, len, status)?;
                    completed += 1;
                }
            }
        }

        Ok(completed)
    }

    /// Wait until every dispatched write has been confirmed.
    fn drain(&mut self) -> Result<()> {
        while self.pool.writing() > 0 {
            if self.sweep()? == 0 {
                self.suspend()?;
            }
        }
        Ok(())
    }

    fn suspend(&mut self) -> Result<()> {
        self.stats.suspensions += 1;
        self.target.suspend().map_err(ShredError::Suspend)
    }

    /// Account for a finished write and recycle or retire its slot.
    fn finish(&mut self, token: usize, offset: u64, len: usize, status: WriteStatus) -> Result<()> {
        let slot = self.pool.slot_mut(token);

        // The write is claimed, so the buffer is ours again either way
        slot.set_role(SlotRole::Done);

        let written = match status {
            WriteStatus::Complete(written) if written == len => written,
            WriteStatus::Complete(written) => {
                return Err(ShredError::Write {
                    offset,
                    source: io::Error::new(
                        io::ErrorKind::WriteZero,
                        format!("short write: {written} of {len} bytes"),
                    ),
                });
            }
            WriteStatus::Failed(source) => return Err(ShredError::Write { offset, source }),
            WriteStatus::InFlight => unreachable!("finish called for a write still in flight"),
        };

        self.stats.bytes_written += written as u64;
        self.stats.writes += 1;

        tracing::trace!(token, offset, written, "write confirmed");

        if self.cursor < self.len {
            slot.refill(&mut self.random)?;
        }

        if let Some(observer) = self.observer.as_mut() {
            observer(Progress {
                confirmed: self.stats.bytes_written,
                total: self.len,
            });
        }

        Ok(())
    }
}

impl<T: OverlappedTarget + ?Sized, R: RandomSource> Drop for Session<'_, T, R> {
    fn drop(&mut self) {
        let outstanding = self.pool.writing();
        if outstanding == 0 {
            return;
        }

        tracing::warn!(outstanding, "run aborted with writes in flight, waiting for them");

        if let Err(err) = self.target.quiesce() {
            tracing::error!(%err, outstanding, "could not wait out in-flight writes, leaking buffers");
            self.pool.leak();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShredConfig;
    use crate::sim::{CompletionOrder, SimOptions, SimRandom, SimTarget};

    fn run_sim(
        len: u64,
        slots: usize,
        capacity: usize,
        options: SimOptions,
    ) -> (Result<PipelineStats>, SimTarget) {
        let mut target = SimTarget::new(len, options);
        let mut random = SimRandom::new(target.ledger());
        let config = ShredConfig {
            slot_count: slots,
            buffer_capacity: capacity,
            ..Default::default()
        };
        let pool = SlotPool::prime(&config, &mut random).unwrap();
        let result = Session::new(&mut target, random, pool, len).run();
        (result, target)
    }

    #[test]
    fn test_two_slots_ten_bytes() {
        let (result, target) = run_sim(10, 2, 4, SimOptions::default());
        let stats = result.unwrap();

        let ledger = target.ledger();
        let ledger = ledger.borrow();
        assert_eq!(ledger.dispatched, vec![0..4, 4..8, 8..10]);
        assert_eq!(stats.bytes_written, 10);
        assert_eq!(stats.writes, 3);
        assert_eq!(ledger.flushes, 1);
        assert!(ledger.image.iter().all(|&b| b != 0));
    }

    #[test]
    fn test_empty_target() {
        let (result, target) = run_sim(0, 4, 16, SimOptions::default());
        let stats = result.unwrap();

        assert_eq!(stats.bytes_written, 0);
        assert_eq!(stats.rounds, 0);
        let ledger = target.ledger();
        assert!(ledger.borrow().dispatched.is_empty());
        assert_eq!(ledger.borrow().flushes, 1);
    }

    #[test]
    fn test_target_smaller_than_buffer() {
        let (result, target) = run_sim(5, 4, 16, SimOptions::default());
        assert_eq!(result.unwrap().bytes_written, 5);
        assert_eq!(target.ledger().borrow().dispatched, vec![0..5]);
    }

    #[test]
    fn test_exact_multiple_of_capacity() {
        let (result, target) = run_sim(32, 2, 8, SimOptions::default());
        assert_eq!(result.unwrap().bytes_written, 32);

        let ledger = target.ledger();
        let ledger = ledger.borrow();
        assert_eq!(ledger.dispatched.len(), 4);
        assert_eq!(ledger.dispatched.last(), Some(&(24..32)));
    }

    #[test]
    fn test_slow_device_suspends() {
        let options = SimOptions {
            latency: usize::MAX,
            order: CompletionOrder::Lifo,
            ..Default::default()
        };
        let (result, target) = run_sim(100, 3, 7, options);
        let stats = result.unwrap();

        assert_eq!(stats.bytes_written, 100);
        assert!(stats.suspensions > 0);

        let ledger = target.ledger();
        let ledger = ledger.borrow();
        assert_eq!(ledger.max_in_flight, 3);
        assert_eq!(ledger.overlap_violations, 0);
        assert_eq!(ledger.refill_conflicts, 0);
        assert_eq!(ledger.corrupted_writes, 0);
    }

    #[test]
    fn test_completion_error_aborts() {
        let options = SimOptions {
            fail_completion: Some(2),
            ..Default::default()
        };
        let (result, target) = run_sim(64, 2, 4, options);

        match result {
            Err(ShredError::Write { source, .. }) => {
                assert_eq!(source.raw_os_error(), Some(libc::EIO));
            }
            other => panic!("expected write error, got {other:?}"),
        }

        let ledger = target.ledger();
        let ledger = ledger.borrow();
        assert_eq!(ledger.dispatched_at_failure, Some(ledger.dispatched.len()));
        assert_eq!(ledger.flushes, 0);
        assert_eq!(target.in_flight(), 0);
    }

    #[test]
    fn test_short_write_is_an_error() {
        let options = SimOptions {
            short_completion: Some(1),
            ..Default::default()
        };
        let (result, _target) = run_sim(16, 1, 8, options);

        match result {
            Err(ShredError::Write { offset, source }) => {
                assert_eq!(offset, 0);
                assert_eq!(source.kind(), io::ErrorKind::WriteZero);
            }
            other => panic!("expected short write error, got {other:?}"),
        }
    }

    #[test]
    fn test_flush_failure() {
        let options = SimOptions {
            fail_flush: true,
            ..Default::default()
        };
        let (result, target) = run_sim(40, 4, 8, options);

        assert!(matches!(result, Err(ShredError::Flush(_))));
        assert_eq!(target.ledger().borrow().completions.iter().sum::<usize>(), 40);
    }

    #[test]
    fn test_suspend_failure() {
        let options = SimOptions {
            latency: usize::MAX,
            fail_suspend: true,
            ..Default::default()
        };
        let (result, target) = run_sim(40, 2, 8, options);

        assert!(matches!(result, Err(ShredError::Suspend(_))));
        // Dropping the session quiesced the abandoned writes
        assert_eq!(target.in_flight(), 0);
    }

    #[test]
    fn test_refill_failure() {
        let mut target = SimTarget::new(64, SimOptions::default());
        let mut random = SimRandom::new(target.ledger()).fail_on_fill(3);
        let config = ShredConfig {
            slot_count: 2,
            buffer_capacity: 8,
            ..Default::default()
        };
        let pool = SlotPool::prime(&config, &mut random).unwrap();
        let result = Session::new(&mut target, random, pool, 64).run();

        assert!(matches!(result, Err(ShredError::RandomSource(_))));
    }

    #[test]
    fn test_progress_is_monotonic() {
        let mut target = SimTarget::new(50, SimOptions::default());
        let mut random = SimRandom::new(target.ledger());
        let config = ShredConfig {
            slot_count: 3,
            buffer_capacity: 6,
            ..Default::default()
        };
        let pool = SlotPool::prime(&config, &mut random).unwrap();

        let mut seen = Vec::new();
        let stats = Session::new(&mut target, random, pool, 50)
            .with_progress(|p| seen.push(p))
            .run()
            .unwrap();

        assert_eq!(stats.bytes_written, 50);
        assert!(seen.windows(2).all(|w| w[0].confirmed < w[1].confirmed));
        assert_eq!(
            seen.last(),
            Some(&Progress {
                confirmed: 50,
                total: 50
            })
        );
    }
}
