//! Buffer slots and the fixed pool that owns them.

use crate::config::ShredConfig;
use crate::error::{Result, ShredError};
use crate::random::RandomSource;

/// What a slot is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotRole {
    /// Buffer holds fresh random bytes and may be dispatched
    ReadingRandom,
    /// Buffer is referenced by an outstanding write of `len` bytes at `offset`
    WritingTarget {
        /// Destination offset
        offset: u64,
        /// Bytes dispatched
        len: usize,
    },
    /// Last write confirmed and nothing left to assign
    Done,
}

/// One fixed-capacity buffer plus its role.
#[derive(Debug)]
pub struct Slot {
    buf: Box<[u8]>,
    role: SlotRole,
}

impl Slot {
    fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            role: SlotRole::ReadingRandom,
        }
    }

    /// Current role
    #[must_use]
    pub fn role(&self) -> SlotRole {
        self.role
    }

    /// Buffer capacity in bytes
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Whether a write referencing this buffer may be outstanding
    #[must_use]
    pub fn is_writing(&self) -> bool {
        matches!(self.role, SlotRole::WritingTarget { .. })
    }

    /// The first `len` bytes of the buffer, for dispatch.
    pub(crate) fn payload(&self, len: usize) -> &[u8] {
        &self.buf[..len]
    }

    pub(crate) fn set_role(&mut self, role: SlotRole) {
        self.role = role;
    }

    /// Refill the whole buffer from `random` and mark it ready for dispatch.
    ///
    /// Must not be called while a write referencing the buffer is outstanding.
    pub(crate) fn refill<R: RandomSource + ?Sized>(&mut self, random: &mut R) -> Result<()> {
        debug_assert!(!self.is_writing(), "refill of a buffer with a write in flight");
        random.fill(&mut self.buf).map_err(ShredError::RandomSource)?;
        self.role = SlotRole::ReadingRandom;
        Ok(())
    }
}

/// Fixed pool of slots, indexed by token.
///
/// The slot count never changes after priming, and buffers are never
/// reallocated, so the address handed to an in-flight write stays put.
#[derive(Debug)]
pub struct SlotPool {
    slots: Vec<Slot>,
    capacity: usize,
}

impl SlotPool {
    /// Allocate `config.slot_count` buffers and fill each from `random`.
    ///
    /// Every slot starts as [`SlotRole::ReadingRandom`] with data ready, so
    /// the first dispatch round never waits on the random source.
    ///
    /// # Errors
    ///
    /// Returns [`ShredError::InvalidConfig`] for bad geometry and
    /// [`ShredError::RandomSource`] if any initial fill fails.
    pub fn prime<R: RandomSource + ?Sized>(config: &ShredConfig, random: &mut R) -> Result<Self> {
        config.validate()?;

        let mut slots = Vec::with_capacity(config.slot_count);
        for _ in 0..config.slot_count {
            let mut slot = Slot::new(config.buffer_capacity);
            slot.refill(random)?;
            slots.push(slot);
        }

        tracing::debug!(
            slots = config.slot_count,
            capacity = config.buffer_capacity,
            "slot pool primed"
        );

        Ok(Self {
            slots,
            capacity: config.buffer_capacity,
        })
    }

    /// Number of slots
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Always false; a primed pool has at least one slot
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Per-slot buffer capacity
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slot by token
    #[must_use]
    pub fn get(&self, token: usize) -> Option<&Slot> {
        self.slots.get(token)
    }

    pub(crate) fn slot_mut(&mut self, token: usize) -> &mut Slot {
        &mut self.slots[token]
    }

    /// Iterate slots in token order
    pub fn iter(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter()
    }

    /// Number of slots whose buffer is referenced by an outstanding write
    #[must_use]
    pub fn writing(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_writing()).count()
    }

    /// Give up the buffers without freeing them.
    ///
    /// Used when outstanding writes could not be waited out, so the kernel
    /// may still read from these addresses.
    pub(crate) fn leak(&mut self) {
        for slot in self.slots.drain(..) {
            std::mem::forget(slot.buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    /// Fills with a running counter and counts calls
    struct Counter {
        next: u8,
        fills: usize,
        fail_after: Option<usize>,
    }

    impl RandomSource for Counter {
        fn fill(&mut self, buf: &mut [u8]) -> io::Result<()> {
            if self.fail_after == Some(self.fills) {
                return Err(io::Error::from_raw_os_error(libc::EIO));
            }
            for b in buf.iter_mut() {
                *b = self.next;
                self.next = self.next.wrapping_add(1);
            }
            self.fills += 1;
            Ok(())
        }
    }

    fn config(slot_count: usize, buffer_capacity: usize) -> ShredConfig {
        ShredConfig {
            slot_count,
            buffer_capacity,
            ..Default::default()
        }
    }

    #[test]
    fn test_prime_fills_every_slot() {
        let mut random = Counter {
            next: 1,
            fills: 0,
            fail_after: None,
        };
        let pool = SlotPool::prime(&config(3, 4), &mut random).unwrap();

        assert_eq!(pool.len(), 3);
        assert_eq!(pool.capacity(), 4);
        assert_eq!(random.fills, 3);
        assert!(pool.iter().all(|slot| slot.role() == SlotRole::ReadingRandom));
        assert_eq!(pool.get(0).unwrap().payload(4), &[1, 2, 3, 4]);
        assert_eq!(pool.get(2).unwrap().payload(4), &[9, 10, 11, 12]);
        assert_eq!(pool.writing(), 0);
    }

    #[test]
    fn test_prime_fails_on_random_error() {
        let mut random = Counter {
            next: 0,
            fills: 0,
            fail_after: Some(1),
        };
        let result = SlotPool::prime(&config(4, 16), &mut random);
        assert!(matches!(result, Err(ShredError::RandomSource(_))));
    }

    #[test]
    fn test_prime_rejects_empty_pool() {
        let mut random = Counter {
            next: 0,
            fills: 0,
            fail_after: None,
        };
        let result = SlotPool::prime(&config(0, 16), &mut random);
        assert!(matches!(result, Err(ShredError::InvalidConfig(_))));
        assert_eq!(random.fills, 0);
    }
}
