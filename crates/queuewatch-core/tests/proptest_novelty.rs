//! Property-based tests for the novelty tracker and message ids.
//!
//! Covers numeric ordering, emission ordering and watermark monotonicity.

use proptest::prelude::*;

use queuewatch_core::message_id::{DEFAULT_ID_PREFIX, MessageId};
use queuewatch_core::novelty::{Candidate, NoveltyTracker};

// =============================================================================
// Strategies
// =============================================================================

fn arb_id() -> impl Strategy<Value = u64> {
    0u64..10_000_000_000_000_000_000u64
}

fn arb_batch() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(arb_id(), 0..20)
}

fn candidates(ids: &[u64]) -> Vec<Candidate<()>> {
    ids.iter()
        .map(|id| Candidate::new(format!("{DEFAULT_ID_PREFIX}{id}"), ()))
        .collect()
}

// =============================================================================
// MessageId ordering
// =============================================================================

proptest! {
    #[test]
    fn message_id_order_matches_numeric_order(a in arb_id(), b in arb_id()) {
        let left = MessageId::from(a);
        let right = MessageId::from(b);
        prop_assert_eq!(left.cmp(&right), a.cmp(&b));
    }

    #[test]
    fn message_id_parses_its_external_form(id in arb_id()) {
        let external = format!("{DEFAULT_ID_PREFIX}{id}");
        let parsed = MessageId::parse_external(&external, DEFAULT_ID_PREFIX);
        prop_assert_eq!(parsed, Some(MessageId::from(id)));
    }

    #[test]
    fn leading_zeros_do_not_change_identity(id in arb_id(), zeros in 1usize..4) {
        let padded = format!("{}{id}", "0".repeat(zeros));
        prop_assert_eq!(MessageId::parse(&padded), Some(MessageId::from(id)));
    }
}

// =============================================================================
// Tracker invariants
// =============================================================================

proptest! {
    #[test]
    fn emitted_ids_are_sorted_unique_and_above_watermark(
        seed in arb_batch(),
        batches in prop::collection::vec(arb_batch(), 1..6),
    ) {
        let mut tracker = NoveltyTracker::default();
        tracker.initialize(candidates(&seed).iter().map(|c| c.external_id.as_str()));

        for batch in batches {
            let before = tracker.watermark().cloned();
            let fresh = tracker.poll(candidates(&batch));

            for pair in fresh.windows(2) {
                prop_assert!(pair[0].id < pair[1].id);
            }
            if let Some(mark) = &before {
                for message in &fresh {
                    prop_assert!(message.id > *mark);
                }
            }
            // Watermark never decreases.
            if let (Some(old), Some(new)) = (&before, tracker.watermark()) {
                prop_assert!(new >= old);
            }
        }
    }

    #[test]
    fn repolling_the_same_batch_emits_nothing(batch in arb_batch()) {
        let mut tracker = NoveltyTracker::default();
        let first = tracker.poll(candidates(&batch));
        let mut expected: Vec<u64> = batch.clone();
        expected.sort_unstable();
        expected.dedup();
        prop_assert_eq!(first.len(), expected.len());
        prop_assert!(tracker.poll(candidates(&batch)).is_empty());
    }

    #[test]
    fn initialized_messages_are_never_emitted(batch in arb_batch()) {
        let mut tracker = NoveltyTracker::default();
        let seeded = candidates(&batch);
        let marked = tracker.initialize(seeded.iter().map(|c| c.external_id.as_str()));
        prop_assert_eq!(marked, batch.len());
        prop_assert!(tracker.poll(seeded).is_empty());
    }

    #[test]
    fn malformed_ids_are_skipped(junk in "[a-z]{1,12}", id in arb_id()) {
        let mut tracker = NoveltyTracker::default();
        let batch = vec![
            Candidate::new(junk, ()),
            Candidate::new(format!("{DEFAULT_ID_PREFIX}{id}"), ()),
        ];
        let fresh = tracker.poll(batch);
        prop_assert_eq!(fresh.len(), 1);
        prop_assert_eq!(tracker.stats().skipped_malformed, 1);
    }
}
