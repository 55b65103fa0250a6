//! Property-based tests for ledger replay
//!
//! Tests for:
//! - Status monotonicity: pending -> signed -> broadcast, never backwards
//! - Contribution set semantics: one contribution per participant
//! - Threshold: a message only becomes signed with enough contributions
//! - Broadcast immutability: nothing after broadcast changes the message

use super::entry::LedgerEntry;
use super::message::{replay, Message, MessageStatus};
use chrono::Utc;
use proptest::prelude::*;
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Clone)]
enum Op {
    Contribute(u8),
    ReachThreshold(u16),
    Broadcast,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..6).prop_map(Op::Contribute),
        1 => (1u16..5).prop_map(Op::ReachThreshold),
        1 => Just(Op::Broadcast),
    ]
}

fn replay_all(entries: &[LedgerEntry]) -> Vec<Message> {
    replay(entries.iter().enumerate().map(|(i, e)| (i + 1, e))).unwrap()
}

/// Build a well-formed ledger for one message the way daemons would:
/// threshold markers only once enough contributions exist, broadcast only
/// after signed.
fn build_entries(ops: &[Op]) -> Vec<LedgerEntry> {
    let mut entries = vec![LedgerEntry::Submitted {
        submission_id: Uuid::new_v4(),
        content: "evacuate sector 4".to_string(),
        submitted_at: Utc::now(),
    }];

    for op in ops {
        let current = replay_all(&entries).remove(0);
        match op {
            Op::Contribute(p) => entries.push(LedgerEntry::Contributed {
                message_id: 1,
                participant_id: p.to_string(),
                contributed_at: Utc::now(),
            }),
            Op::ReachThreshold(t) => {
                if current.meets_threshold(*t) {
                    entries.push(LedgerEntry::ThresholdReached {
                        message_id: 1,
                        threshold: *t,
                        reached_at: Utc::now(),
                    });
                }
            }
            Op::Broadcast => {
                if current.status != MessageStatus::Pending {
                    entries.push(LedgerEntry::Broadcast {
                        message_id: 1,
                        signature: "00".to_string(),
                        broadcast_at: Utc::now(),
                    });
                }
            }
        }
    }

    entries
}

proptest! {
    /// Property: status never regresses across any prefix of the log
    #[test]
    fn status_is_monotonic(ops in prop::collection::vec(op_strategy(), 0..40)) {
        let entries = build_entries(&ops);

        let mut previous = MessageStatus::Pending;
        for end in 1..=entries.len() {
            let status = replay_all(&entries[..end])[0].status;
            prop_assert!(status >= previous, "status regressed: {:?} -> {:?}", previous, status);
            previous = status;
        }
    }

    /// Property: no participant appears twice in a message's contributions
    #[test]
    fn contributions_have_set_semantics(ops in prop::collection::vec(op_strategy(), 0..40)) {
        let entries = build_entries(&ops);
        let message = replay_all(&entries).remove(0);

        let unique: HashSet<_> = message.contributors().into_iter().collect();
        prop_assert_eq!(unique.len(), message.contribution_count());
    }

    /// Property: a signed message carries at least the threshold it was
    /// signed at
    #[test]
    fn signed_implies_threshold_met(ops in prop::collection::vec(op_strategy(), 0..40)) {
        let entries = build_entries(&ops);
        let message = replay_all(&entries).remove(0);

        if message.status >= MessageStatus::Signed {
            let threshold = message.signed_threshold.unwrap();
            prop_assert!(message.meets_threshold(threshold));
        } else {
            prop_assert!(message.signed_threshold.is_none());
        }
    }

    /// Property: entries appended after broadcast leave the message unchanged
    #[test]
    fn broadcast_is_immutable(
        ops in prop::collection::vec(op_strategy(), 0..20),
        late in prop::collection::vec(0u8..10, 1..10),
    ) {
        let mut entries = build_entries(&ops);
        let message = replay_all(&entries).remove(0);
        prop_assume!(message.status == MessageStatus::Broadcast);

        for p in late {
            entries.push(LedgerEntry::Contributed {
                message_id: 1,
                participant_id: format!("late-{}", p),
                contributed_at: Utc::now(),
            });
            entries.push(LedgerEntry::ThresholdReached {
                message_id: 1,
                threshold: 1,
                reached_at: Utc::now(),
            });
        }

        let after = replay_all(&entries).remove(0);
        prop_assert_eq!(after, message);
    }
}

proptest! {
    /// Property: a wrapping window is the complement of the open same-day
    /// interval between its end and start
    #[test]
    fn wrapping_window_is_complement(
        start_min in 0u32..1440,
        end_min in 0u32..1440,
        now_min in 0u32..1440,
    ) {
        use crate::window::is_active;
        use chrono::NaiveTime;

        prop_assume!(start_min > end_min);
        let at = |m: u32| NaiveTime::from_hms_opt(m / 60, m % 60, 0).unwrap();
        let (start, end, now) = (at(start_min), at(end_min), at(now_min));

        let strictly_between = end < now && now < start;
        prop_assert_eq!(is_active(now, start, end), !strictly_between);
    }
}
