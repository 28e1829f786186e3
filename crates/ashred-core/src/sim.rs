//! Simulated overlapped target for tests.
//!
//! [`SimTarget`] keeps writes pending until they are polled enough times or
//! picked by a suspend, can fail a chosen completion, and records everything
//! it sees in a [`Ledger`] shared with [`SimRandom`]. Data is copied out of
//! the slot buffer only when a write completes, the way a device may read it
//! late, so a buffer refilled too early shows up as a corrupted write.

use crate::random::RandomSource;
use crate::target::{OverlappedTarget, WriteStatus};
use std::cell::RefCell;
use std::io;
use std::ops::Range;
use std::rc::Rc;

/// Which pending write a suspend completes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionOrder {
    /// Oldest submitted write first
    #[default]
    Fifo,
    /// Newest submitted write first
    Lifo,
    /// Pseudo-random pick from this seed
    Shuffled(u64),
}

/// Behaviour knobs for [`SimTarget`]
#[derive(Debug, Clone, Default)]
pub struct SimOptions {
    /// Order in which suspend completes writes
    pub order: CompletionOrder,
    /// Status polls a write sits through before completing on its own;
    /// `usize::MAX` means only a suspend completes it
    pub latency: usize,
    /// Fail the k-th completion (1-based) with `EIO`
    pub fail_completion: Option<usize>,
    /// Make the k-th completion (1-based) report one byte fewer
    pub short_completion: Option<usize>,
    /// Fail the final flush with `EIO`
    pub fail_flush: bool,
    /// Fail every suspend with `EIO`
    pub fail_suspend: bool,
}

/// What the simulated target observed
#[derive(Debug, Default)]
pub struct Ledger {
    /// Every dispatched range, in dispatch order
    pub dispatched: Vec<Range<u64>>,
    /// Byte counts of successful completions, in completion order
    pub completions: Vec<usize>,
    /// Dispatches whose range overlapped a write still in flight
    pub overlap_violations: usize,
    /// Dispatches reaching past the target length
    pub out_of_range: usize,
    /// Writes whose buffer changed between dispatch and completion
    pub corrupted_writes: usize,
    /// Random fills performed
    pub refills: usize,
    /// Random fills into a buffer that had a write in flight
    pub refill_conflicts: usize,
    /// Highest number of simultaneously outstanding writes
    pub max_in_flight: usize,
    /// Number of dispatches when the injected failure fired
    pub dispatched_at_failure: Option<usize>,
    /// Flushes requested
    pub flushes: usize,
    /// Target contents as completed writes left them
    pub image: Vec<u8>,
    in_flight: Vec<Range<usize>>,
}

/// Ledger shared between a [`SimTarget`] and its [`SimRandom`]
pub type SharedLedger = Rc<RefCell<Ledger>>;

#[derive(Debug)]
struct PendingOp {
    token: usize,
    offset: u64,
    len: usize,
    buf: *const u8,
    checksum: u64,
    submitted: bool,
    ready: bool,
    polls: usize,
    seq: u64,
}

fn checksum(buf: &[u8]) -> u64 {
    buf.iter()
        .enumerate()
        .fold(0u64, |acc, (i, &b)| acc.wrapping_mul(31).wrapping_add(b as u64 ^ i as u64))
}

/// In-memory overlapped target
#[derive(Debug)]
pub struct SimTarget {
    len: u64,
    options: SimOptions,
    ops: Vec<PendingOp>,
    ledger: SharedLedger,
    completed: usize,
    next_seq: u64,
    rng: u64,
}

impl SimTarget {
    /// Simulate a target of `len` bytes. The image is held in memory.
    pub fn new(len: u64, options: SimOptions) -> Self {
        let ledger = Ledger {
            image: vec![0u8; len as usize],
            ..Default::default()
        };
        let rng = match options.order {
            CompletionOrder::Shuffled(seed) => seed | 1,
            _ => 1,
        };

        Self {
            len,
            options,
            ops: Vec::new(),
            ledger: Rc::new(RefCell::new(ledger)),
            completed: 0,
            next_seq: 0,
            rng,
        }
    }

    /// Handle to the ledger
    pub fn ledger(&self) -> SharedLedger {
        Rc::clone(&self.ledger)
    }

    fn next_random(&mut self) -> u64 {
        // xorshift64
        self.rng ^= self.rng << 13;
        self.rng ^= self.rng >> 7;
        self.rng ^= self.rng << 17;
        self.rng
    }

    fn complete(&mut self, index: usize) -> WriteStatus {
        let op = self.ops.remove(index);
        self.completed += 1;

        let mut ledger = self.ledger.borrow_mut();
        let addr = op.buf as usize;
        if let Some(pos) = ledger.in_flight.iter().position(|r| r.start == addr) {
            ledger.in_flight.remove(pos);
        }

        if self.options.fail_completion == Some(self.completed) {
            ledger.dispatched_at_failure = Some(ledger.dispatched.len());
            return WriteStatus::Failed(io::Error::from_raw_os_error(libc::EIO));
        }

        // SAFETY: The OverlappedTarget contract keeps the buffer alive and
        // unmodified until this completion is claimed.
        let data = unsafe { std::slice::from_raw_parts(op.buf, op.len) };
        if checksum(data) != op.checksum {
            ledger.corrupted_writes += 1;
        }

        let start = op.offset as usize;
        let end = (start + op.len).min(ledger.image.len());
        if start < end {
            ledger.image[start..end].copy_from_slice(&data[..end - start]);
        }

        if self.options.short_completion == Some(self.completed) {
            return WriteStatus::Complete(op.len.saturating_sub(1));
        }

        ledger.completions.push(op.len);
        WriteStatus::Complete(op.len)
    }
}

impl OverlappedTarget for SimTarget {
    unsafe fn start_write(&mut self, token: usize, offset: u64, buf: &[u8]) -> io::Result<()> {
        if self.ops.iter().any(|op| op.token == token) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("token {token} already has a write outstanding"),
            ));
        }

        let range = offset..offset + buf.len() as u64;
        {
            let mut ledger = self.ledger.borrow_mut();
            if self
                .ops
                .iter()
                .any(|op| op.offset < range.end && range.start < op.offset + op.len as u64)
            {
                ledger.overlap_violations += 1;
            }
            if range.end > self.len {
                ledger.out_of_range += 1;
            }
            ledger.dispatched.push(range);
            let addr = buf.as_ptr() as usize;
            ledger.in_flight.push(addr..addr + buf.len());
            ledger.max_in_flight = ledger.max_in_flight.max(self.ops.len() + 1);
        }

        self.ops.push(PendingOp {
            token,
            offset,
            len: buf.len(),
            buf: buf.as_ptr(),
            checksum: checksum(buf),
            submitted: false,
            ready: false,
            polls: 0,
            seq: self.next_seq,
        });
        self.next_seq += 1;
        Ok(())
    }

    fn submit(&mut self) -> io::Result<usize> {
        let mut submitted = 0;
        for op in self.ops.iter_mut().filter(|op| !op.submitted) {
            op.submitted = true;
            submitted += 1;
        }
        Ok(submitted)
    }

    fn status(&mut self, token: usize) -> WriteStatus {
        let latency = self.options.latency;
        let Some(index) = self.ops.iter().position(|op| op.token == token) else {
            return WriteStatus::InFlight;
        };

        let op = &mut self.ops[index];
        if !op.submitted {
            return WriteStatus::InFlight;
        }

        op.polls += 1;
        if op.ready || op.polls > latency {
            self.complete(index)
        } else {
            WriteStatus::InFlight
        }
    }

    fn suspend(&mut self) -> io::Result<()> {
        if self.options.fail_suspend {
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }

        if self.ops.iter().any(|op| op.ready) {
            return Ok(());
        }

        let candidates: Vec<usize> = (0..self.ops.len())
            .filter(|&i| self.ops[i].submitted)
            .collect();
        if candidates.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "no outstanding writes to wait for",
            ));
        }

        let pick = match self.options.order {
            CompletionOrder::Fifo => candidates.iter().copied().min_by_key(|&i| self.ops[i].seq),
            CompletionOrder::Lifo => candidates.iter().copied().max_by_key(|&i| self.ops[i].seq),
            CompletionOrder::Shuffled(_) => {
                let n = self.next_random() as usize % candidates.len();
                candidates.get(n).copied()
            }
        };

        if let Some(index) = pick {
            self.ops[index].ready = true;
        }
        Ok(())
    }

    fn in_flight(&self) -> usize {
        self.ops.len()
    }

    fn sync(&mut self) -> io::Result<()> {
        self.ledger.borrow_mut().flushes += 1;
        if self.options.fail_flush {
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }
        Ok(())
    }

    fn quiesce(&mut self) -> io::Result<()> {
        self.ops.clear();
        self.ledger.borrow_mut().in_flight.clear();
        Ok(())
    }
}

/// Deterministic random source that checks it never fills a buffer with a
/// write in flight.
///
/// Bytes are never zero, so an untouched image byte stands out.
#[derive(Debug)]
pub struct SimRandom {
    ledger: SharedLedger,
    next: u8,
    fills: usize,
    fail_on_fill: Option<usize>,
}

impl SimRandom {
    /// Source reporting into `ledger`
    pub fn new(ledger: SharedLedger) -> Self {
        Self {
            ledger,
            next: 1,
            fills: 0,
            fail_on_fill: None,
        }
    }

    /// Fail the n-th fill (1-based), counting the priming fills
    #[must_use]
    pub fn fail_on_fill(mut self, n: usize) -> Self {
        self.fail_on_fill = Some(n);
        self
    }
}

impl RandomSource for SimRandom {
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.fills += 1;
        if self.fail_on_fill == Some(self.fills) {
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }

        {
            let mut ledger = self.ledger.borrow_mut();
            let addr = buf.as_ptr() as usize;
            let mine = addr..addr + buf.len();
            if ledger
                .in_flight
                .iter()
                .any(|r| r.start < mine.end && mine.start < r.end)
            {
                ledger.refill_conflicts += 1;
            }
            ledger.refills += 1;
        }

        for b in buf.iter_mut() {
            *b = self.next;
            self.next = if self.next == u8::MAX { 1 } else { self.next + 1 };
        }
        Ok(())
    }
}
