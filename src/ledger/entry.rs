//! Ledger entries.
//!
//! The ledger is an append-only sequence of these records, one per line.
//! Message state is never written in place; it is rebuilt by replaying the
//! entries in order (see `replay`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message identifier: the 1-based ordinal of the message's `Submitted` entry.
pub type MessageId = u64;

/// Opaque participant (share-holder) identifier.
pub type ParticipantId = String;

/// One line of the shared ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerEntry {
    /// A new signing request.
    Submitted {
        submission_id: Uuid,
        content: String,
        submitted_at: DateTime<Utc>,
    },

    /// A participant agreed to sign a message.
    Contributed {
        message_id: MessageId,
        participant_id: ParticipantId,
        contributed_at: DateTime<Utc>,
    },

    /// Some daemon observed `threshold` contributions (`pending -> signed`).
    ThresholdReached {
        message_id: MessageId,
        threshold: u16,
        reached_at: DateTime<Utc>,
    },

    /// An aggregator announced it is finalizing a message.
    AggregationClaimed {
        message_id: MessageId,
        claim_id: Uuid,
        participant_id: ParticipantId,
        claimed_at: DateTime<Utc>,
    },

    /// An aggregator gave up its claim (failure, retryable).
    ClaimReleased {
        message_id: MessageId,
        claim_id: Uuid,
        released_at: DateTime<Utc>,
    },

    /// Aggregate signature produced and verified (`signed -> broadcast`).
    Broadcast {
        message_id: MessageId,
        signature: String,
        broadcast_at: DateTime<Utc>,
    },
}

impl LedgerEntry {
    /// The message this entry refers to, `None` for submissions.
    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            LedgerEntry::Submitted { .. } => None,
            LedgerEntry::Contributed { message_id, .. }
            | LedgerEntry::ThresholdReached { message_id, .. }
            | LedgerEntry::AggregationClaimed { message_id, .. }
            | LedgerEntry::ClaimReleased { message_id, .. }
            | LedgerEntry::Broadcast { message_id, .. } => Some(*message_id),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LedgerEntry::Submitted { .. } => "submitted",
            LedgerEntry::Contributed { .. } => "contributed",
            LedgerEntry::ThresholdReached { .. } => "threshold_reached",
            LedgerEntry::AggregationClaimed { .. } => "aggregation_claimed",
            LedgerEntry::ClaimReleased { .. } => "claim_released",
            LedgerEntry::Broadcast { .. } => "broadcast",
        }
    }
}
