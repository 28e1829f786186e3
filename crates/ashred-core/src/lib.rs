//! # ashred core
//!
//! Overwrites a file or raw block device with random data using overlapped
//! writes.
//!
//! This crate provides:
//! - A fixed pool of buffer slots primed from a strong random source
//! - The shred pipeline: dispatch, completion sweep, stall wait, drain, flush
//! - An io_uring write target (Linux)
//! - Target size resolution for regular files and device special files
//! - A simulated target with fault injection (`sim` feature, and in tests)
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐ fill  ┌──────────────────────────┐ write ┌──────────────┐
//! │ RandomSource │──────▶│ SlotPool (N × capacity)  │──────▶│ Overlapped-  │
//! │ /dev/urandom │       │ ReadingRandom/WritingTgt │◀──────│ Target       │
//! └──────────────┘       └──────────────────────────┘ done  │ (io_uring)   │
//!                                    ▲                      └──────────────┘
//!                                    │ drives
//!                              ┌───────────┐
//!                              │  Session  │  cursor, confirmed total
//!                              └───────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod config;
pub mod error;
pub mod pipeline;
pub mod random;
pub mod shred;
pub mod size;
pub mod slot;
pub mod target;

#[cfg(target_os = "linux")]
pub mod uring;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use config::{DEFAULT_BUFFER_CAPACITY, DEFAULT_SLOT_COUNT, RandomSourceSpec, ShredConfig};
pub use error::{Result, ShredError};
pub use pipeline::{PipelineStats, Progress, Session};
pub use random::{DeviceRandom, OsRandom, RandomSource};
pub use shred::{ShredReport, shred_file, shred_path};
pub use size::resolve_size;
pub use slot::{Slot, SlotPool, SlotRole};
pub use target::{OverlappedTarget, WriteStatus};
