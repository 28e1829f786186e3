//! Property-based tests for the shred pipeline
//!
//! Uses proptest over the simulated target to verify range assignment,
//! accounting, buffer ownership and failure behaviour across pool shapes,
//! target lengths and completion orders.

use ashred_core::ShredError;
use ashred_core::sim::{CompletionOrder, SimOptions};
use ashred_integration_tests::run_sim;
use proptest::prelude::*;

fn order_strategy() -> impl Strategy<Value = CompletionOrder> {
    prop_oneof![
        Just(CompletionOrder::Fifo),
        Just(CompletionOrder::Lifo),
        any::<u64>().prop_map(CompletionOrder::Shuffled),
    ]
}

fn latency_strategy() -> impl Strategy<Value = usize> {
    prop_oneof![0usize..4, Just(usize::MAX)]
}

fn write_count(len: u64, capacity: usize) -> usize {
    len.div_ceil(capacity as u64) as usize
}

// ============================================================================
// Range Assignment Properties
// ============================================================================

mod assignment_properties {
    use super::*;

    proptest! {
        /// Ranges tile [0, L) in cursor order, each at most one buffer long
        #[test]
        fn ranges_tile_target(
            len in 0u64..3000,
            slots in 1usize..7,
            capacity in 1usize..96,
            order in order_strategy(),
            latency in latency_strategy(),
        ) {
            let run = run_sim(len, slots, capacity, SimOptions { order, latency, ..Default::default() });
            prop_assert!(run.result.is_ok(), "run failed: {:?}", run.result);

            let ledger = run.ledger.borrow();
            let mut expected_start = 0u64;
            for range in &ledger.dispatched {
                prop_assert_eq!(range.start, expected_start);
                prop_assert!(range.end > range.start, "zero-length dispatch");
                prop_assert!(range.end - range.start <= capacity as u64);
                expected_start = range.end;
            }
            prop_assert_eq!(expected_start, len);
            prop_assert_eq!(ledger.dispatched.len(), write_count(len, capacity));
            prop_assert_eq!(ledger.out_of_range, 0);
        }

        /// The final range is L mod C long, or C when C divides L
        #[test]
        fn last_range_is_truncated(
            len in 1u64..5000,
            slots in 1usize..5,
            capacity in 1usize..128,
        ) {
            let run = run_sim(len, slots, capacity, SimOptions::default());
            prop_assert!(run.result.is_ok());

            let ledger = run.ledger.borrow();
            let last = ledger.dispatched.last().cloned().unwrap();
            let remainder = len % capacity as u64;
            let expected = if remainder == 0 { capacity as u64 } else { remainder };
            prop_assert_eq!(last.end - last.start, expected);
        }

        /// Concurrently outstanding writes never overlap and never exceed the pool
        #[test]
        fn in_flight_writes_are_disjoint(
            len in 0u64..3000,
            slots in 1usize..9,
            capacity in 1usize..64,
            order in order_strategy(),
        ) {
            let run = run_sim(len, slots, capacity, SimOptions {
                order,
                latency: usize::MAX,
                ..Default::default()
            });
            prop_assert!(run.result.is_ok());

            let ledger = run.ledger.borrow();
            prop_assert_eq!(ledger.overlap_violations, 0);
            prop_assert!(ledger.max_in_flight <= slots);
        }
    }
}

// ============================================================================
// Accounting and Buffer Ownership Properties
// ============================================================================

mod accounting_properties {
    use super::*;

    proptest! {
        /// Confirmed total equals L and the sum of individual completions
        #[test]
        fn confirmed_total_matches(
            len in 0u64..3000,
            slots in 1usize..7,
            capacity in 1usize..96,
            order in order_strategy(),
            latency in latency_strategy(),
        ) {
            let run = run_sim(len, slots, capacity, SimOptions { order, latency, ..Default::default() });
            let stats = run.result.unwrap();
            let ledger = run.ledger.borrow();

            prop_assert_eq!(stats.bytes_written, len);
            prop_assert_eq!(ledger.completions.iter().sum::<usize>() as u64, len);
            prop_assert_eq!(stats.writes as usize, ledger.completions.len());
            prop_assert_eq!(ledger.flushes, 1);
        }

        /// No buffer is refilled or altered while its write is outstanding,
        /// and every byte of the target ends up overwritten
        #[test]
        fn buffers_untouched_while_writing(
            len in 0u64..2000,
            slots in 1usize..6,
            capacity in 1usize..48,
            order in order_strategy(),
            latency in latency_strategy(),
        ) {
            let run = run_sim(len, slots, capacity, SimOptions { order, latency, ..Default::default() });
            prop_assert!(run.result.is_ok());

            let ledger = run.ledger.borrow();
            prop_assert_eq!(ledger.refill_conflicts, 0);
            prop_assert_eq!(ledger.corrupted_writes, 0);
            prop_assert!(ledger.image.iter().all(|&b| b != 0));
        }
    }
}

// ============================================================================
// Failure Properties
// ============================================================================

mod failure_properties {
    use super::*;

    proptest! {
        /// A failing k-th completion aborts the run with no later dispatch,
        /// for early, middle and late k
        #[test]
        fn completion_failure_stops_dispatch(
            len in 1u64..2000,
            slots in 1usize..6,
            capacity in 1usize..64,
            position in 0.0f64..1.0,
            order in order_strategy(),
            latency in latency_strategy(),
        ) {
            let writes = write_count(len, capacity);
            let k = 1 + ((writes - 1) as f64 * position) as usize;

            let run = run_sim(len, slots, capacity, SimOptions {
                order,
                latency,
                fail_completion: Some(k),
                ..Default::default()
            });

            prop_assert!(
                matches!(run.result, Err(ShredError::Write { .. })),
                "expected write error, got {:?}", run.result
            );

            let ledger = run.ledger.borrow();
            prop_assert_eq!(ledger.dispatched_at_failure, Some(ledger.dispatched.len()));
            prop_assert_eq!(ledger.flushes, 0);
            prop_assert_eq!(run.in_flight_after, 0);
        }

        /// A failing flush is reported even though every range completed
        #[test]
        fn flush_failure_is_reported(
            len in 0u64..2000,
            slots in 1usize..6,
            capacity in 1usize..64,
        ) {
            let run = run_sim(len, slots, capacity, SimOptions {
                fail_flush: true,
                ..Default::default()
            });

            prop_assert!(matches!(run.result, Err(ShredError::Flush(_))));
            let ledger = run.ledger.borrow();
            prop_assert_eq!(ledger.completions.iter().sum::<usize>() as u64, len);
        }
    }
}
