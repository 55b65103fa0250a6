//! Message state and ledger replay.

use super::entry::{LedgerEntry, MessageId, ParticipantId};
use super::LedgerError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Signing status. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Signed,
    Broadcast,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Signed => "signed",
            MessageStatus::Broadcast => "broadcast",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MessageStatus::Pending),
            "signed" => Ok(MessageStatus::Signed),
            "broadcast" => Ok(MessageStatus::Broadcast),
            other => Err(format!(
                "Unknown status '{}' (expected pending, signed or broadcast)",
                other
            )),
        }
    }
}

/// A participant's recorded agreement to sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningContribution {
    pub participant_id: ParticipantId,
    pub contributed_at: DateTime<Utc>,
}

/// An unreleased aggregation claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationClaim {
    pub claim_id: Uuid,
    pub participant_id: ParticipantId,
    pub claimed_at: DateTime<Utc>,
}

impl AggregationClaim {
    pub fn is_live(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.claimed_at + ttl >= now
    }
}

/// One signing request, as reconstructed from the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub submission_id: Uuid,
    pub content: String,
    pub submitted_at: DateTime<Utc>,
    pub status: MessageStatus,
    /// Arrival order; at most one entry per participant.
    pub contributions: Vec<SigningContribution>,
    /// Threshold recorded when the message became `signed`.
    pub signed_threshold: Option<u16>,
    pub signed_at: Option<DateTime<Utc>>,
    pub broadcast_at: Option<DateTime<Utc>>,
    /// Hex aggregate signature, set once `broadcast`.
    pub signature: Option<String>,
    /// Claims in log order, released ones removed.
    pub claims: Vec<AggregationClaim>,
}

impl Message {
    pub fn contribution_count(&self) -> usize {
        self.contributions.len()
    }

    pub fn has_contribution_from(&self, participant_id: &str) -> bool {
        self.contributions
            .iter()
            .any(|c| c.participant_id == participant_id)
    }

    pub fn contributors(&self) -> Vec<ParticipantId> {
        self.contributions
            .iter()
            .map(|c| c.participant_id.clone())
            .collect()
    }

    pub fn meets_threshold(&self, threshold: u16) -> bool {
        self.contributions.len() >= usize::from(threshold)
    }

    /// First claim in log order that is still live at `now`.
    pub fn winning_claim(&self, now: DateTime<Utc>, ttl: Duration) -> Option<&AggregationClaim> {
        self.claims.iter().find(|claim| claim.is_live(now, ttl))
    }

    fn apply(&mut self, entry: &LedgerEntry, line: usize) -> Result<(), LedgerError> {
        // Broadcast is terminal: nothing after it mutates the message.
        if self.status == MessageStatus::Broadcast {
            return Ok(());
        }

        match entry {
            LedgerEntry::Submitted { .. } => {}
            LedgerEntry::Contributed {
                participant_id,
                contributed_at,
                ..
            } => {
                if !self.has_contribution_from(participant_id) {
                    self.contributions.push(SigningContribution {
                        participant_id: participant_id.clone(),
                        contributed_at: *contributed_at,
                    });
                }
            }
            LedgerEntry::ThresholdReached {
                threshold,
                reached_at,
                ..
            } => {
                if self.status == MessageStatus::Pending {
                    self.status = MessageStatus::Signed;
                    self.signed_threshold = Some(*threshold);
                    self.signed_at = Some(*reached_at);
                }
            }
            LedgerEntry::AggregationClaimed {
                claim_id,
                participant_id,
                claimed_at,
                ..
            } => {
                self.claims.push(AggregationClaim {
                    claim_id: *claim_id,
                    participant_id: participant_id.clone(),
                    claimed_at: *claimed_at,
                });
            }
            LedgerEntry::ClaimReleased { claim_id, .. } => {
                self.claims.retain(|claim| claim.claim_id != *claim_id);
            }
            LedgerEntry::Broadcast {
                signature,
                broadcast_at,
                ..
            } => {
                if self.status == MessageStatus::Pending {
                    return Err(LedgerError::Corrupt {
                        line,
                        reason: format!("message {} broadcast before reaching threshold", self.id),
                    });
                }
                self.status = MessageStatus::Broadcast;
                self.signature = Some(signature.clone());
                self.broadcast_at = Some(*broadcast_at);
                self.claims.clear();
            }
        }

        Ok(())
    }

    /// Entries that rebuild this message on replay (claims are dropped).
    pub fn to_entries(&self) -> Vec<LedgerEntry> {
        let mut entries = vec![LedgerEntry::Submitted {
            submission_id: self.submission_id,
            content: self.content.clone(),
            submitted_at: self.submitted_at,
        }];

        entries.extend(self.contributions.iter().map(|c| LedgerEntry::Contributed {
            message_id: self.id,
            participant_id: c.participant_id.clone(),
            contributed_at: c.contributed_at,
        }));

        if self.status >= MessageStatus::Signed {
            let threshold = self
                .signed_threshold
                .unwrap_or_else(|| u16::try_from(self.contributions.len()).unwrap_or(u16::MAX));
            entries.push(LedgerEntry::ThresholdReached {
                message_id: self.id,
                threshold,
                reached_at: self.signed_at.unwrap_or(self.submitted_at),
            });
        }

        if self.status == MessageStatus::Broadcast {
            entries.push(LedgerEntry::Broadcast {
                message_id: self.id,
                signature: self.signature.clone().unwrap_or_default(),
                broadcast_at: self
                    .broadcast_at
                    .or(self.signed_at)
                    .unwrap_or(self.submitted_at),
            });
        }

        entries
    }
}

/// Fold ledger entries into messages, ordered by id.
///
/// `lines` are the 1-based line numbers of the entries, used in corruption
/// reports.
pub fn replay<'a, I>(entries: I) -> Result<Vec<Message>, LedgerError>
where
    I: IntoIterator<Item = (usize, &'a LedgerEntry)>,
{
    let mut messages: Vec<Message> = Vec::new();

    for (line, entry) in entries {
        match entry {
            LedgerEntry::Submitted {
                submission_id,
                content,
                submitted_at,
            } => {
                let id = messages.len() as MessageId + 1;
                messages.push(Message {
                    id,
                    submission_id: *submission_id,
                    content: content.clone(),
                    submitted_at: *submitted_at,
                    status: MessageStatus::Pending,
                    contributions: Vec::new(),
                    signed_threshold: None,
                    signed_at: None,
                    broadcast_at: None,
                    signature: None,
                    claims: Vec::new(),
                });
            }
            other => {
                let id = other.message_id().unwrap_or_default();
                let message = id
                    .checked_sub(1)
                    .and_then(|index| messages.get_mut(index as usize))
                    .ok_or_else(|| LedgerError::Corrupt {
                        line,
                        reason: format!("{} entry for unknown message {}", other.kind(), id),
                    })?;
                message.apply(other, line)?;
            }
        }
    }

    Ok(messages)
}
