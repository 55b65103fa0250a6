//! Threshold aggregation.
//!
//! Turns a `signed` message into a verified aggregate signature, records it,
//! flips the message to `broadcast` and hands it to the publisher.
//!
//! ## Claims
//!
//! Any daemon may notice a signed message, so several can race to
//! aggregate it. Each attempt appends an `aggregation_claimed` entry and
//! proceeds only while its claim is the first live claim in log order.
//! Failed attempts release their claim so the message stays retryable.
//!
//! Key material is resolved before claiming. A contributor share or group
//! key that cannot be loaded fails the attempt without touching the ledger.

use crate::crypto::{CryptoError, GroupKey, KeyShare, ThresholdScheme};
use crate::ledger::{
    LedgerError, LedgerStore, Message, MessageId, MessageLedger, MessageStatus,
};
use crate::publish::{EventId, Publisher};
use crate::shares::{ShareError, ShareStore};
use crate::signatures::{SignatureLog, SignatureLogError, SignedRecord};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

pub type AggregationResult<T> = Result<T, AggregationError>;

#[derive(Debug, thiserror::Error)]
pub enum AggregationError {
    #[error("Message {message_id} has {have} contributions, threshold is {need}")]
    ThresholdNotMet {
        message_id: MessageId,
        have: usize,
        need: u16,
    },

    #[error("Share for contributor {participant} is unavailable: {source}")]
    MissingShare {
        participant: String,
        #[source]
        source: ShareError,
    },

    #[error("Group key unavailable: {0}")]
    GroupKeyUnavailable(#[source] ShareError),

    #[error("Signing failed: {0}")]
    Signing(#[from] CryptoError),

    #[error("Aggregate signature for message {message_id} failed verification")]
    VerificationFailed { message_id: MessageId },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Failed to record signature: {0}")]
    SignatureLog(#[from] SignatureLogError),
}

/// Result of a finalize call that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregationOutcome {
    /// Signed, recorded and marked broadcast. `event_id` is `None` when
    /// there is no publisher or publishing failed.
    Broadcast {
        record: SignedRecord,
        event_id: Option<EventId>,
    },
    /// Nothing to do; the message was finalized before.
    AlreadyBroadcast,
    /// Another aggregator holds the first live claim.
    ClaimedElsewhere { holder: Option<String> },
}

/// Contributor shares and group key for one aggregation attempt.
struct KeyMaterial {
    shares: Vec<KeyShare>,
    group: GroupKey,
}

pub struct ThresholdAggregator<S> {
    ledger: MessageLedger<S>,
    shares: ShareStore,
    scheme: Arc<dyn ThresholdScheme>,
    signatures: SignatureLog,
    publisher: Option<Arc<dyn Publisher>>,
    claim_ttl: chrono::Duration,
}

impl<S: LedgerStore> ThresholdAggregator<S> {
    pub fn new(
        ledger: MessageLedger<S>,
        shares: ShareStore,
        scheme: Arc<dyn ThresholdScheme>,
        signatures: SignatureLog,
    ) -> Self {
        Self {
            ledger,
            shares,
            scheme,
            signatures,
            publisher: None,
            claim_ttl: chrono::Duration::minutes(5),
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_claim_ttl(mut self, ttl: Duration) -> Self {
        // Absurd TTLs saturate at a year.
        self.claim_ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::weeks(52));
        self
    }

    pub fn signatures(&self) -> &SignatureLog {
        &self.signatures
    }

    pub async fn finalize(
        &self,
        id: MessageId,
        threshold: u16,
        claimant: &str,
    ) -> AggregationResult<AggregationOutcome> {
        self.finalize_at(id, threshold, claimant, Utc::now()).await
    }

    /// Aggregate message `id` on behalf of `claimant`.
    ///
    /// Idempotent: a message already broadcast yields
    /// [`AggregationOutcome::AlreadyBroadcast`] and writes nothing.
    pub async fn finalize_at(
        &self,
        id: MessageId,
        threshold: u16,
        claimant: &str,
        now: DateTime<Utc>,
    ) -> AggregationResult<AggregationOutcome> {
        let message = self.require(id).await?;

        match message.status {
            MessageStatus::Broadcast => {
                info!(message_id = id, "Message already broadcast, skipping aggregation");
                return Ok(AggregationOutcome::AlreadyBroadcast);
            }
            MessageStatus::Pending | MessageStatus::Signed => {
                if !message.meets_threshold(threshold) {
                    return Err(AggregationError::ThresholdNotMet {
                        message_id: id,
                        have: message.contribution_count(),
                        need: threshold,
                    });
                }
            }
        }

        if message.status == MessageStatus::Pending {
            self.ledger.mark_signed(id, threshold).await?;
        }

        let material = self.prepare(&message, threshold).await?;

        let claim_id = self.ledger.claim_aggregation(id, claimant, now).await?;
        let message = self.require(id).await?;
        if message.status == MessageStatus::Broadcast {
            return Ok(AggregationOutcome::AlreadyBroadcast);
        }

        let winner = message.winning_claim(now, self.claim_ttl);
        if winner.map(|claim| claim.claim_id) != Some(claim_id) {
            let holder = winner.map(|claim| claim.participant_id.clone());
            info!(
                message_id = id,
                participant = claimant,
                holder = holder.as_deref().unwrap_or("unknown"),
                "Aggregation already claimed by another participant"
            );
            self.release(id, claim_id).await;
            return Ok(AggregationOutcome::ClaimedElsewhere { holder });
        }

        match self.aggregate(&message, threshold, &material).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.release(id, claim_id).await;
                Err(e)
            }
        }
    }

    /// Load everything signing needs and check it against `threshold`.
    async fn prepare(&self, message: &Message, threshold: u16) -> AggregationResult<KeyMaterial> {
        let shares = self.resolve_shares(message).await?;
        if let Some(share) = shares.iter().find(|s| s.min_signers() != threshold) {
            warn!(
                message_id = message.id,
                participant = %share.participant_id,
                share_threshold = share.min_signers(),
                requested = threshold,
                "Share was generated for a different threshold"
            );
            return Err(CryptoError::ThresholdMismatch {
                participant: share.participant_id.clone(),
                share_threshold: share.min_signers(),
                requested: threshold,
            }
            .into());
        }
        let group = self
            .shares
            .load_group_key()
            .await
            .map_err(AggregationError::GroupKeyUnavailable)?;
        Ok(KeyMaterial { shares, group })
    }

    async fn aggregate(
        &self,
        message: &Message,
        threshold: u16,
        material: &KeyMaterial,
    ) -> AggregationResult<AggregationOutcome> {
        let id = message.id;
        let KeyMaterial { shares, group } = material;

        let content = message.content.as_bytes();
        let signature = self.scheme.sign(content, shares, threshold, group)?;

        if !self
            .scheme
            .verify(content, &signature, &group.verifying_key())
        {
            error!(
                message_id = id,
                signers = ?message.contributors(),
                "VERIFICATION FAILURE: aggregate signature rejected, message left signed"
            );
            return Err(AggregationError::VerificationFailed { message_id: id });
        }

        // Another aggregator may have finished while we were signing.
        if self.require(id).await?.status == MessageStatus::Broadcast {
            return Ok(AggregationOutcome::AlreadyBroadcast);
        }

        let record = SignedRecord {
            message_id: id,
            content: message.content.clone(),
            signature: signature.to_hex(),
            produced_at: Utc::now(),
        };
        self.signatures.persist(&record).await?;
        self.ledger.mark_broadcast(id, &record.signature).await?;
        info!(
            message_id = id,
            signers = message.contribution_count(),
            "Message signed and marked broadcast"
        );

        let event_id = match &self.publisher {
            Some(publisher) => match publisher.publish(&record.content, &record.signature).await {
                Ok(event_id) => {
                    info!(message_id = id, event_id = %event_id, "Published signed message");
                    Some(event_id)
                }
                Err(e) => {
                    warn!(
                        message_id = id,
                        error = %e,
                        "Publish failed; message stays broadcast"
                    );
                    None
                }
            },
            None => None,
        };

        Ok(AggregationOutcome::Broadcast { record, event_id })
    }

    /// Every recorded contributor's share. A missing one is an error rather
    /// than a smaller signer set.
    async fn resolve_shares(&self, message: &Message) -> AggregationResult<Vec<KeyShare>> {
        let mut shares = Vec::with_capacity(message.contribution_count());
        for participant in message.contributors() {
            let share = self.shares.load_share(&participant).await.map_err(|source| {
                warn!(
                    message_id = message.id,
                    participant = %participant,
                    error = %source,
                    "Contributor share unavailable"
                );
                AggregationError::MissingShare {
                    participant: participant.clone(),
                    source,
                }
            })?;
            shares.push(share);
        }
        Ok(shares)
    }

    async fn require(&self, id: MessageId) -> AggregationResult<Message> {
        self.ledger
            .get_by_id(id)
            .await?
            .ok_or(AggregationError::Ledger(LedgerError::NotFound(id)))
    }

    async fn release(&self, id: MessageId, claim_id: Uuid) {
        if let Err(e) = self.ledger.release_claim(id, claim_id).await {
            warn!(message_id = id, error = %e, "Failed to release aggregation claim");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{AggregateSignature, CryptoResult, FrostScheme, GeneratedKeys, GroupVerifyingKey};
    use crate::ledger::{LedgerEntry, MemoryLedgerStore};
    use crate::publish::MemoryPublisher;
    use tempfile::TempDir;

    /// Signs correctly, then flips a bit in the signature.
    struct TamperingScheme(FrostScheme);

    impl ThresholdScheme for TamperingScheme {
        fn generate_keys(&self, n: u16, t: u16) -> CryptoResult<GeneratedKeys> {
            self.0.generate_keys(n, t)
        }

        fn sign(
            &self,
            message: &[u8],
            shares: &[KeyShare],
            threshold: u16,
            group: &GroupKey,
        ) -> CryptoResult<AggregateSignature> {
            let mut signature = self.0.sign(message, shares, threshold, group)?;
            signature.0[0] ^= 0x01;
            Ok(signature)
        }

        fn verify(
            &self,
            message: &[u8],
            signature: &AggregateSignature,
            key: &GroupVerifyingKey,
        ) -> bool {
            self.0.verify(message, signature, key)
        }
    }

    struct Fixture {
        _dir: TempDir,
        store: MemoryLedgerStore,
        ledger: MessageLedger<MemoryLedgerStore>,
        shares: ShareStore,
        keys: GeneratedKeys,
    }

    impl Fixture {
        async fn new(n: u16, t: u16) -> Self {
            let dir = TempDir::new().unwrap();
            let shares = ShareStore::new(dir.path().join("keys"));
            let keys = FrostScheme::new().generate_keys(n, t).unwrap();
            shares.install(&keys, false).await.unwrap();
            let store = MemoryLedgerStore::new();
            Self {
                _dir: dir,
                ledger: MessageLedger::new(store.clone()),
                store,
                shares,
                keys,
            }
        }

        fn aggregator(&self) -> ThresholdAggregator<MemoryLedgerStore> {
            self.aggregator_with(Arc::new(FrostScheme::new()))
        }

        fn aggregator_with(
            &self,
            scheme: Arc<dyn ThresholdScheme>,
        ) -> ThresholdAggregator<MemoryLedgerStore> {
            ThresholdAggregator::new(
                self.ledger.clone(),
                self.shares.clone(),
                scheme,
                SignatureLog::in_dir(self.shares.keys_dir()),
            )
        }

        async fn signed_message(&self, content: &str, signers: &[&str], t: u16) -> MessageId {
            let message = self.ledger.append(content).await.unwrap();
            for signer in signers {
                self.ledger
                    .contribute(message.id, signer, t, Utc::now())
                    .await
                    .unwrap();
            }
            self.ledger.mark_signed(message.id, t).await.unwrap();
            message.id
        }
    }

    #[tokio::test]
    async fn test_finalize_signs_records_and_broadcasts() {
        let fx = Fixture::new(5, 3).await;
        let id = fx.signed_message("evacuate sector 4", &["1", "3", "5"], 3).await;
        let publisher = MemoryPublisher::new();
        let aggregator = fx.aggregator().with_publisher(Arc::new(publisher.clone()));

        let outcome = aggregator.finalize(id, 3, "1").await.unwrap();

        let AggregationOutcome::Broadcast { record, event_id } = outcome else {
            panic!("expected broadcast");
        };
        assert!(event_id.is_some());
        let signature = AggregateSignature::from_hex(&record.signature).unwrap();
        assert!(FrostScheme::new().verify(
            b"evacuate sector 4",
            &signature,
            &fx.keys.group_key.verifying_key()
        ));

        let message = fx.ledger.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(message.status, MessageStatus::Broadcast);
        assert_eq!(message.signature.as_deref(), Some(record.signature.as_str()));
        assert_eq!(aggregator.signatures().latest().await.unwrap(), Some(record));
        assert_eq!(publisher.events().len(), 1);
    }

    #[tokio::test]
    async fn test_finalize_twice_is_noop() {
        let fx = Fixture::new(3, 2).await;
        let id = fx.signed_message("m", &["1", "2"], 2).await;
        let aggregator = fx.aggregator();

        aggregator.finalize(id, 2, "1").await.unwrap();
        let again = aggregator.finalize(id, 2, "2").await.unwrap();

        assert_eq!(again, AggregationOutcome::AlreadyBroadcast);
        assert_eq!(aggregator.signatures().records().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_below_threshold_never_aggregates() {
        let fx = Fixture::new(5, 3).await;
        let message = fx.ledger.append("m").await.unwrap();
        fx.ledger.contribute(message.id, "1", 3, Utc::now()).await.unwrap();
        fx.ledger.contribute(message.id, "2", 3, Utc::now()).await.unwrap();

        let err = fx.aggregator().finalize(message.id, 3, "1").await.unwrap_err();

        assert!(matches!(
            err,
            AggregationError::ThresholdNotMet { have: 2, need: 3, .. }
        ));
        let message = fx.ledger.get_by_id(message.id).await.unwrap().unwrap();
        assert_eq!(message.status, MessageStatus::Pending);
    }

    #[tokio::test]
    async fn test_pending_message_at_threshold_is_marked_signed_first() {
        let fx = Fixture::new(3, 2).await;
        let message = fx.ledger.append("m").await.unwrap();
        fx.ledger.contribute(message.id, "1", 2, Utc::now()).await.unwrap();
        fx.ledger.contribute(message.id, "2", 2, Utc::now()).await.unwrap();

        let outcome = fx.aggregator().finalize(message.id, 2, "cli").await.unwrap();

        assert!(matches!(outcome, AggregationOutcome::Broadcast { .. }));
        let kinds: Vec<_> = fx.store.entries().iter().map(|e| e.kind()).collect();
        assert!(kinds.contains(&"threshold_reached"));
    }

    #[tokio::test]
    async fn test_missing_share_fails_before_claiming() {
        let fx = Fixture::new(3, 2).await;
        let id = fx.signed_message("m", &["1", "2"], 2).await;
        tokio::fs::remove_file(fx.shares.share_path("2")).await.unwrap();
        let before = fx.store.entries().len();

        let err = fx.aggregator().finalize(id, 2, "1").await.unwrap_err();

        assert!(matches!(err, AggregationError::MissingShare { ref participant, .. } if participant == "2"));
        let message = fx.ledger.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(message.status, MessageStatus::Signed);
        assert!(message.claims.is_empty());
        assert_eq!(fx.store.entries().len(), before);
    }

    #[tokio::test]
    async fn test_missing_group_key_fails_before_claiming() {
        let fx = Fixture::new(3, 2).await;
        let id = fx.signed_message("m", &["1", "2"], 2).await;
        tokio::fs::remove_file(fx.shares.group_key_path()).await.unwrap();
        let before = fx.store.entries().len();

        let err = fx.aggregator().finalize(id, 2, "1").await.unwrap_err();

        assert!(matches!(err, AggregationError::GroupKeyUnavailable(_)));
        assert_eq!(fx.store.entries().len(), before);
    }

    #[tokio::test]
    async fn test_verification_failure_leaves_message_signed() {
        let fx = Fixture::new(3, 2).await;
        let id = fx.signed_message("m", &["1", "2"], 2).await;
        let aggregator = fx.aggregator_with(Arc::new(TamperingScheme(FrostScheme::new())));

        let err = aggregator.finalize(id, 2, "1").await.unwrap_err();

        assert!(matches!(err, AggregationError::VerificationFailed { message_id } if message_id == id));
        let message = fx.ledger.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(message.status, MessageStatus::Signed);
        assert!(aggregator.signatures().records().await.unwrap().is_empty());

        // Retryable once the fault is fixed.
        let outcome = fx.aggregator().finalize(id, 2, "1").await.unwrap();
        assert!(matches!(outcome, AggregationOutcome::Broadcast { .. }));
    }

    #[tokio::test]
    async fn test_live_claim_from_other_participant_blocks() {
        let fx = Fixture::new(3, 2).await;
        let id = fx.signed_message("m", &["1", "2"], 2).await;
        let now = Utc::now();
        fx.ledger.claim_aggregation(id, "2", now).await.unwrap();

        let outcome = fx.aggregator().finalize_at(id, 2, "1", now).await.unwrap();

        assert_eq!(
            outcome,
            AggregationOutcome::ClaimedElsewhere {
                holder: Some("2".to_string())
            }
        );
        let message = fx.ledger.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(message.status, MessageStatus::Signed);
        assert_eq!(message.claims.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_claim_is_ignored() {
        let fx = Fixture::new(3, 2).await;
        let id = fx.signed_message("m", &["1", "2"], 2).await;
        let now = Utc::now();
        fx.ledger
            .claim_aggregation(id, "2", now - chrono::Duration::minutes(10))
            .await
            .unwrap();

        let outcome = fx
            .aggregator()
            .with_claim_ttl(Duration::from_secs(60))
            .finalize_at(id, 2, "1", now)
            .await
            .unwrap();

        assert!(matches!(outcome, AggregationOutcome::Broadcast { .. }));
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_roll_back() {
        let fx = Fixture::new(3, 2).await;
        let id = fx.signed_message("m", &["1", "2"], 2).await;
        let aggregator = fx
            .aggregator()
            .with_publisher(Arc::new(MemoryPublisher::failing()));

        let outcome = aggregator.finalize(id, 2, "1").await.unwrap();

        assert!(matches!(
            outcome,
            AggregationOutcome::Broadcast { event_id: None, .. }
        ));
        let message = fx.ledger.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(message.status, MessageStatus::Broadcast);
    }

    #[tokio::test]
    async fn test_unknown_message() {
        let fx = Fixture::new(3, 2).await;
        let err = fx.aggregator().finalize(42, 2, "1").await.unwrap_err();
        assert!(matches!(err, AggregationError::Ledger(LedgerError::NotFound(42))));
    }

    #[tokio::test]
    async fn test_threshold_mismatch_surfaces_as_signing_error() {
        let fx = Fixture::new(3, 2).await;
        let id = fx.signed_message("m", &["1", "2", "3"], 3).await;

        let err = fx.aggregator().finalize(id, 3, "1").await.unwrap_err();

        assert!(matches!(
            err,
            AggregationError::Signing(CryptoError::ThresholdMismatch { share_threshold: 2, requested: 3, .. })
        ));
        let claimed = fx
            .store
            .entries()
            .iter()
            .any(|e| matches!(e, LedgerEntry::AggregationClaimed { .. }));
        assert!(!claimed);
    }
}
