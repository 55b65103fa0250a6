//! Shared message ledger.
//!
//! The ledger is the only coordination medium between participant daemons.
//! It is an append-only log of [`LedgerEntry`] records; message status and
//! collected contributions are derived by replaying the log. Daemons never
//! rewrite the log, so one participant's contribution can never overwrite
//! another's.

pub mod entry;
pub mod file;
pub mod memory;
pub mod message;
pub mod traits;

#[cfg(test)]
mod proptests;

pub use entry::{LedgerEntry, MessageId, ParticipantId};
pub use file::JsonlLedgerStore;
pub use memory::MemoryLedgerStore;
pub use message::{replay, AggregationClaim, Message, MessageStatus, SigningContribution};
pub use traits::{LedgerStore, NumberedEntry};

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger errors.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ledger corrupt at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("Failed to encode ledger entry: {0}")]
    Encode(String),

    #[error("Ledger entry is {size} bytes, limit is {limit}")]
    EntryTooLarge { size: usize, limit: usize },

    #[error("Message {0} not found")]
    NotFound(MessageId),

    #[error("Cannot replace ledger: expected message id {expected}, found {found}")]
    NonContiguousIds { expected: MessageId, found: MessageId },
}

impl LedgerError {
    /// Corruption affects every daemon sharing the ledger.
    pub fn is_corruption(&self) -> bool {
        matches!(self, LedgerError::Corrupt { .. })
    }
}

/// Result of a contribution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContributionOutcome {
    /// Appended; `contributions` includes the new one.
    Recorded { contributions: usize },
    /// This participant already contributed.
    AlreadyContributed,
    /// Enough contributions exist; nothing appended.
    ThresholdAlreadyMet { contributions: usize },
    /// Message is no longer pending.
    NotPending(MessageStatus),
}

/// Message-level view over a [`LedgerStore`].
pub struct MessageLedger<S> {
    store: Arc<S>,
}

impl<S> Clone for MessageLedger<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: LedgerStore> MessageLedger<S> {
    pub fn new(store: S) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Full snapshot, read at call time.
    pub async fn list_all(&self) -> LedgerResult<Vec<Message>> {
        let entries = self.store.read_entries().await?;
        replay(entries.iter().map(|n| (n.line, &n.entry)))
    }

    pub async fn get_by_id(&self, id: MessageId) -> LedgerResult<Option<Message>> {
        let messages = self.list_all().await?;
        Ok(messages.into_iter().find(|m| m.id == id))
    }

    async fn require(&self, id: MessageId) -> LedgerResult<Message> {
        self.get_by_id(id).await?.ok_or(LedgerError::NotFound(id))
    }

    /// Submit a new pending message. Its id is one more than the largest
    /// existing id (1 for an empty ledger).
    pub async fn append(&self, content: impl Into<String>) -> LedgerResult<Message> {
        let submission_id = Uuid::new_v4();
        self.store
            .append_entry(&LedgerEntry::Submitted {
                submission_id,
                content: content.into(),
                submitted_at: Utc::now(),
            })
            .await?;

        // Concurrent submitters may land first; find ours by submission id.
        self.list_all()
            .await?
            .into_iter()
            .find(|m| m.submission_id == submission_id)
            .ok_or_else(|| {
                LedgerError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "submitted entry not visible after append",
                ))
            })
    }

    /// Overwrite the ledger with `messages`, keeping their ids.
    ///
    /// Ids must be exactly `1..=n` in order, since ids are positional.
    /// Aggregation claims are not carried over.
    pub async fn replace_all(&self, messages: &[Message]) -> LedgerResult<()> {
        let mut entries = Vec::new();
        for (index, message) in messages.iter().enumerate() {
            let expected = index as MessageId + 1;
            if message.id != expected {
                return Err(LedgerError::NonContiguousIds {
                    expected,
                    found: message.id,
                });
            }
            entries.extend(message.to_entries());
        }

        self.store.replace_entries(&entries).await
    }

    /// Record `participant_id`'s agreement to sign message `id`.
    ///
    /// Re-reads the ledger first; re-contributing is a no-op.
    pub async fn contribute(
        &self,
        id: MessageId,
        participant_id: &str,
        threshold: u16,
        now: DateTime<Utc>,
    ) -> LedgerResult<ContributionOutcome> {
        let message = self.require(id).await?;

        if message.status != MessageStatus::Pending {
            return Ok(ContributionOutcome::NotPending(message.status));
        }
        if message.has_contribution_from(participant_id) {
            return Ok(ContributionOutcome::AlreadyContributed);
        }
        if message.meets_threshold(threshold) {
            return Ok(ContributionOutcome::ThresholdAlreadyMet {
                contributions: message.contribution_count(),
            });
        }

        self.store
            .append_entry(&LedgerEntry::Contributed {
                message_id: id,
                participant_id: participant_id.to_string(),
                contributed_at: now,
            })
            .await?;

        Ok(ContributionOutcome::Recorded {
            contributions: message.contribution_count() + 1,
        })
    }

    /// Flip `pending -> signed` if the message has at least `threshold`
    /// contributions. Returns whether an entry was appended.
    pub async fn mark_signed(&self, id: MessageId, threshold: u16) -> LedgerResult<bool> {
        let message = self.require(id).await?;
        if message.status != MessageStatus::Pending || !message.meets_threshold(threshold) {
            return Ok(false);
        }

        self.store
            .append_entry(&LedgerEntry::ThresholdReached {
                message_id: id,
                threshold,
                reached_at: Utc::now(),
            })
            .await?;
        Ok(true)
    }

    /// Announce an aggregation attempt. Returns the new claim id.
    pub async fn claim_aggregation(
        &self,
        id: MessageId,
        participant_id: &str,
        now: DateTime<Utc>,
    ) -> LedgerResult<Uuid> {
        let claim_id = Uuid::new_v4();
        self.store
            .append_entry(&LedgerEntry::AggregationClaimed {
                message_id: id,
                claim_id,
                participant_id: participant_id.to_string(),
                claimed_at: now,
            })
            .await?;
        Ok(claim_id)
    }

    pub async fn release_claim(&self, id: MessageId, claim_id: Uuid) -> LedgerResult<()> {
        self.store
            .append_entry(&LedgerEntry::ClaimReleased {
                message_id: id,
                claim_id,
                released_at: Utc::now(),
            })
            .await
    }

    /// Flip `signed -> broadcast`.
    pub async fn mark_broadcast(&self, id: MessageId, signature: &str) -> LedgerResult<()> {
        self.store
            .append_entry(&LedgerEntry::Broadcast {
                message_id: id,
                signature: signature.to_string(),
                broadcast_at: Utc::now(),
            })
            .await
    }
}
