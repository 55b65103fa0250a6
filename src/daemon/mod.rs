//! Participant signing daemon.
//!
//! One daemon per participant. Each tick it checks its signing window,
//! loads its share, snapshots the ledger and contributes to every pending
//! message that still needs it. Daemons never talk to each other; the ledger
//! is the only shared state.
//!
//! ## Tick
//!
//! ```text
//! window closed? ──yes──► report, sleep
//!       │no
//! load share ──fail──► stop | retry (share_failure)
//!       │
//! snapshot ledger
//!       │
//! for each pending message:
//!   already at threshold ─► mark signed
//!   already contributed  ─► skip
//!   otherwise            ─► contribute, mark signed if now at threshold
//!       │
//! aggregation enabled? ─► finalize every signed message not backing off
//! ```

pub mod backoff;
pub mod state;

pub use backoff::AggregationBackoff;
pub use state::{DaemonExit, DaemonState, TickReport};

use crate::aggregator::{AggregationError, AggregationOutcome, ThresholdAggregator};
use crate::config::{ParticipantConfig, ShareFailurePolicy};
use crate::crypto::{FrostScheme, KeyShare};
use crate::ledger::{
    ContributionOutcome, JsonlLedgerStore, LedgerError, LedgerStore, Message, MessageLedger,
    MessageStatus,
};
use crate::publish::OutboxPublisher;
use crate::shares::{ShareError, ShareStore};
use crate::signatures::SignatureLog;
use crate::window::ActiveWindow;
use chrono::{DateTime, Local, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub type DaemonResult<T> = Result<T, DaemonError>;

/// Faults that stop a daemon.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("Configuration fault: {0}")]
    Configuration(String),

    #[error("Share unavailable for participant {participant}: {source}")]
    ShareUnavailable {
        participant: String,
        #[source]
        source: ShareError,
    },

    #[error("Ledger corrupt: {0}")]
    LedgerCorrupt(#[source] LedgerError),
}

impl DaemonError {
    /// Faults every daemon sharing the ledger would hit.
    pub fn is_shared(&self) -> bool {
        matches!(self, DaemonError::LedgerCorrupt(_))
    }
}

pub struct SigningDaemon<S> {
    config: ParticipantConfig,
    window: ActiveWindow,
    poll_interval: Duration,
    ledger: MessageLedger<S>,
    aggregator: Option<ThresholdAggregator<S>>,
    backoff: AggregationBackoff,
    state: DaemonState,
}

impl SigningDaemon<JsonlLedgerStore> {
    /// Daemon over the file ledger, key directory and outbox named in
    /// `config`.
    pub fn from_config(config: ParticipantConfig) -> DaemonResult<Self> {
        let ledger = MessageLedger::new(JsonlLedgerStore::new(&config.storage.ledger));
        let mut daemon = Self::new(config, ledger.clone())?;

        if daemon.config.aggregation.enabled {
            let claim_ttl = daemon
                .config
                .claim_ttl()
                .map_err(|e| DaemonError::Configuration(e.to_string()))?;
            let keys_dir = &daemon.config.storage.keys_dir;
            let aggregator = ThresholdAggregator::new(
                ledger,
                ShareStore::new(keys_dir),
                Arc::new(FrostScheme::new()),
                SignatureLog::in_dir(keys_dir),
            )
            .with_publisher(Arc::new(OutboxPublisher::new(&daemon.config.storage.outbox)))
            .with_claim_ttl(claim_ttl);
            daemon = daemon.with_aggregator(aggregator);
        }

        Ok(daemon)
    }
}

impl<S: LedgerStore> SigningDaemon<S> {
    pub fn new(config: ParticipantConfig, ledger: MessageLedger<S>) -> DaemonResult<Self> {
        config
            .validate()
            .map_err(|e| DaemonError::Configuration(e.to_string()))?;
        let poll_interval = config
            .poll_interval()
            .map_err(|e| DaemonError::Configuration(e.to_string()))?;

        Ok(Self {
            window: config.active_window(),
            poll_interval,
            config,
            ledger,
            aggregator: None,
            backoff: AggregationBackoff::new(poll_interval),
            state: DaemonState::Idle,
        })
    }

    /// Finalize signed messages from this daemon.
    pub fn with_aggregator(mut self, aggregator: ThresholdAggregator<S>) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    pub fn participant_id(&self) -> &str {
        &self.config.participant_id
    }

    pub fn state(&self) -> DaemonState {
        self.state
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn set_state(&mut self, state: DaemonState) {
        if self.state != state {
            debug!(
                participant = %self.config.participant_id,
                from = %self.state,
                to = %state,
                "Daemon state change"
            );
            self.state = state;
        }
    }

    /// Poll until shutdown is signalled, a fatal fault occurs, or (with
    /// `exit_when_idle`) no work is left.
    ///
    /// Shutdown is only observed between ticks.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> DaemonResult<DaemonExit> {
        info!(
            participant = %self.config.participant_id,
            threshold = self.config.threshold,
            window = %self.window,
            poll_interval = ?self.poll_interval,
            "Signing daemon started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let report = match self.tick_at(Local::now()).await {
                Ok(report) => report,
                Err(e) => {
                    self.set_state(DaemonState::Terminated);
                    return Err(e);
                }
            };

            if report.did_work() {
                info!(
                    participant = %self.config.participant_id,
                    contributed = report.contributed.len(),
                    signed = report.marked_signed.len(),
                    finalized = report.finalized.len(),
                    "Tick complete"
                );
            }

            if report.exhausted && self.config.exit_when_idle {
                info!(
                    participant = %self.config.participant_id,
                    "No pending work left, exiting"
                );
                self.set_state(DaemonState::Terminated);
                return Ok(DaemonExit::Idle);
            }

            self.set_state(DaemonState::Sleeping);
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    // Sender gone: treat as shutdown.
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(participant = %self.config.participant_id, "Signing daemon shut down");
        self.set_state(DaemonState::Terminated);
        Ok(DaemonExit::Shutdown)
    }

    pub async fn tick(&mut self) -> DaemonResult<TickReport> {
        self.tick_at(Local::now()).await
    }

    /// One pass over the ledger at wall-clock time `now`.
    pub async fn tick_at(&mut self, now: DateTime<Local>) -> DaemonResult<TickReport> {
        let mut report = TickReport::default();
        self.set_state(DaemonState::Evaluating);

        if !self.window.contains(now.time()) {
            info!(
                participant = %self.config.participant_id,
                window = %self.window,
                now = %now.format("%H:%M"),
                "Outside signing window, not contributing"
            );
            report.window_closed = true;
            self.set_state(DaemonState::Idle);
            return Ok(report);
        }

        if self.load_share().await?.is_none() {
            report.share_unavailable = true;
            self.set_state(DaemonState::Idle);
            return Ok(report);
        }

        let now = now.with_timezone(&Utc);
        let pass = match self.contribute_pending(now, &mut report).await {
            Ok(()) => self.settle(now, &mut report).await,
            Err(e) => Err(e),
        };
        if let Err(e) = pass {
            self.ledger_fault(e)?;
            report.ledger_unavailable = true;
        }

        self.set_state(DaemonState::Idle);
        Ok(report)
    }

    /// Load and check this participant's share. `Ok(None)` means the share
    /// is unavailable and the policy is to retry.
    async fn load_share(&self) -> DaemonResult<Option<KeyShare>> {
        let participant = &self.config.participant_id;
        let share = match ShareStore::load_share_from(&self.config.share_path).await {
            Ok(share) => share,
            Err(source) => match self.config.share_failure {
                ShareFailurePolicy::Stop => {
                    error!(
                        participant = %participant,
                        path = %self.config.share_path.display(),
                        error = %source,
                        "Share unavailable, stopping daemon"
                    );
                    return Err(DaemonError::ShareUnavailable {
                        participant: participant.clone(),
                        source,
                    });
                }
                ShareFailurePolicy::Retry => {
                    warn!(
                        participant = %participant,
                        path = %self.config.share_path.display(),
                        error = %source,
                        "Share unavailable, will retry next tick"
                    );
                    return Ok(None);
                }
            },
        };

        if share.participant_id != *participant {
            return Err(DaemonError::Configuration(format!(
                "share at {} belongs to participant {}, not {}",
                self.config.share_path.display(),
                share.participant_id,
                participant
            )));
        }
        if share.threshold != self.config.threshold || share.min_signers() != self.config.threshold
        {
            return Err(DaemonError::Configuration(format!(
                "configured threshold {} does not match key generation threshold {}",
                self.config.threshold,
                share.min_signers()
            )));
        }

        Ok(Some(share))
    }

    async fn contribute_pending(
        &mut self,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<(), LedgerError> {
        let threshold = self.config.threshold;
        let snapshot = self.ledger.list_all().await?;

        for message in snapshot.iter().filter(|m| m.status == MessageStatus::Pending) {
            let id = message.id;

            if message.meets_threshold(threshold) {
                // Reached by other daemons; make sure the transition is recorded.
                if self.ledger.mark_signed(id, threshold).await? {
                    info!(message_id = id, threshold, "Threshold reached, message signed");
                    report.marked_signed.push(id);
                }
                continue;
            }
            if message.has_contribution_from(&self.config.participant_id) {
                continue;
            }

            self.set_state(DaemonState::Contributing);
            let outcome = self
                .ledger
                .contribute(id, &self.config.participant_id, threshold, now)
                .await?;
            match outcome {
                ContributionOutcome::Recorded { contributions } => {
                    info!(
                        participant = %self.config.participant_id,
                        message_id = id,
                        contributions,
                        threshold,
                        "Contributed signature share"
                    );
                    report.contributed.push(id);
                    if contributions >= usize::from(threshold)
                        && self.ledger.mark_signed(id, threshold).await?
                    {
                        info!(message_id = id, threshold, "Threshold reached, message signed");
                        report.marked_signed.push(id);
                    }
                }
                other => {
                    debug!(message_id = id, outcome = ?other, "Contribution not needed");
                }
            }
            self.set_state(DaemonState::Evaluating);
        }

        Ok(())
    }

    /// Re-read the ledger after contributing: record any threshold crossed
    /// by concurrent contributors, then finalize signed messages if this
    /// daemon aggregates.
    async fn settle(&mut self, now: DateTime<Utc>, report: &mut TickReport) -> Result<(), LedgerError> {
        let threshold = self.config.threshold;
        let mut messages = self.ledger.list_all().await?;
        let mut changed = false;

        for message in messages
            .iter()
            .filter(|m| m.status == MessageStatus::Pending && m.meets_threshold(threshold))
        {
            if self.ledger.mark_signed(message.id, threshold).await? {
                info!(message_id = message.id, threshold, "Threshold reached, message signed");
                report.marked_signed.push(message.id);
                changed = true;
            }
        }
        if changed {
            messages = self.ledger.list_all().await?;
        }

        if let Some(aggregator) = &self.aggregator {
            changed = false;
            self.backoff
                .retain(|id| messages.iter().any(|m| m.id == id && m.status == MessageStatus::Signed));
            for message in messages.iter().filter(|m| m.status == MessageStatus::Signed) {
                let id = message.id;
                if !self.backoff.ready(id, now) {
                    continue;
                }
                match aggregator
                    .finalize_at(id, threshold, &self.config.participant_id, now)
                    .await
                {
                    Ok(AggregationOutcome::Broadcast { .. }) => {
                        self.backoff.clear(id);
                        report.finalized.push(id);
                        changed = true;
                    }
                    Ok(outcome) => debug!(message_id = id, outcome = ?outcome, "Aggregation skipped"),
                    Err(AggregationError::Ledger(e)) => return Err(e),
                    Err(e) => {
                        let next_attempt = self.backoff.record_failure(id, now);
                        // Verification failures are already logged at error level.
                        if !matches!(e, AggregationError::VerificationFailed { .. }) {
                            warn!(
                                message_id = id,
                                error = %e,
                                failures = self.backoff.failures(id),
                                next_attempt = %next_attempt,
                                "Aggregation failed, will retry"
                            );
                        }
                    }
                }
            }
            if changed {
                messages = self.ledger.list_all().await?;
            }
        }

        report.exhausted = self.is_exhausted(&messages);
        Ok(())
    }

    /// No pending message still needs this participant's share, and no
    /// signed message awaits this daemon's aggregation.
    fn is_exhausted(&self, messages: &[Message]) -> bool {
        let threshold = self.config.threshold;
        let aggregating = self.aggregator.is_some();
        messages.iter().all(|m| match m.status {
            MessageStatus::Pending => {
                m.meets_threshold(threshold) || m.has_contribution_from(&self.config.participant_id)
            }
            MessageStatus::Signed => !aggregating,
            MessageStatus::Broadcast => true,
        })
    }

    /// Transient ledger failures end the tick; corruption ends the daemon.
    fn ledger_fault(&self, e: LedgerError) -> DaemonResult<()> {
        if e.is_corruption() {
            error!(
                participant = %self.config.participant_id,
                error = %e,
                "LEDGER CORRUPT: every daemon sharing this ledger is affected"
            );
            Err(DaemonError::LedgerCorrupt(e))
        } else {
            warn!(
                participant = %self.config.participant_id,
                error = %e,
                "Ledger I/O failure, retrying next tick"
            );
            Ok(())
        }
    }
}
