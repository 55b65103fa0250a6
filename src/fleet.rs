//! Fleet launcher.
//!
//! Discovers participant configs, starts one daemon task per participant and
//! supervises them. Daemons share nothing in process; they coordinate only
//! through the ledger.
//!
//! ## Supervision
//!
//! - clean exit (shutdown or idle): recorded, not restarted
//! - per-daemon fault: logged, that daemon stays down
//! - panic: restarted with linear backoff, up to `max_restarts`
//! - ledger corruption: every daemon is told to stop and the fleet fails

use crate::config::ParticipantConfig;
use crate::daemon::{DaemonError, DaemonExit, DaemonResult, SigningDaemon};
use crate::ledger::LedgerStore;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};

pub const DEFAULT_MAX_RESTARTS: u32 = 3;
pub const DEFAULT_RESTART_BACKOFF: Duration = Duration::from_secs(1);

pub type FleetResult<T> = Result<T, FleetError>;

#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error("Failed to read participants directory {path}: {source}")]
    Discovery {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No valid participant configs in {0}")]
    NoParticipants(PathBuf),

    #[error("Fleet stopped: {0}")]
    LedgerCorrupt(#[source] DaemonError),
}

/// How one member of the fleet ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberOutcome {
    Exited(DaemonExit),
    Failed(String),
    /// Panicked more than `max_restarts` times.
    GaveUp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberReport {
    pub participant_id: String,
    pub outcome: MemberOutcome,
    pub restarts: u32,
}

#[derive(Debug, Clone, Default)]
pub struct FleetSummary {
    pub members: Vec<MemberReport>,
    /// Config files that failed to load.
    pub skipped: Vec<PathBuf>,
}

pub struct FleetLauncher {
    participants_dir: PathBuf,
    max_restarts: u32,
    restart_backoff: Duration,
}

impl FleetLauncher {
    pub fn new(participants_dir: impl Into<PathBuf>) -> Self {
        Self {
            participants_dir: participants_dir.into(),
            max_restarts: DEFAULT_MAX_RESTARTS,
            restart_backoff: DEFAULT_RESTART_BACKOFF,
        }
    }

    pub fn with_max_restarts(mut self, max_restarts: u32) -> Self {
        self.max_restarts = max_restarts;
        self
    }

    pub fn with_restart_backoff(mut self, backoff: Duration) -> Self {
        self.restart_backoff = backoff;
        self
    }

    pub fn participants_dir(&self) -> &Path {
        &self.participants_dir
    }

    /// `*.toml` files in the participants directory, in natural order.
    pub async fn discover(&self) -> FleetResult<Vec<PathBuf>> {
        let discovery = |source| FleetError::Discovery {
            path: self.participants_dir.clone(),
            source,
        };
        let mut entries = fs::read_dir(&self.participants_dir)
            .await
            .map_err(discovery)?;

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(discovery)? {
            let is_file = entry
                .file_type()
                .await
                .map(|kind| kind.is_file())
                .unwrap_or(false);
            let path = entry.path();
            if is_file && path.extension().is_some_and(|ext| ext == "toml") {
                paths.push(path);
            }
        }
        paths.sort_by(|a, b| natural_cmp(&file_name(a), &file_name(b)));
        Ok(paths)
    }

    /// Load every discovered config. Invalid ones are logged and skipped.
    pub async fn load_configs(&self) -> FleetResult<(Vec<ParticipantConfig>, Vec<PathBuf>)> {
        let mut configs = Vec::new();
        let mut skipped = Vec::new();

        for path in self.discover().await? {
            match ParticipantConfig::load(&path).await {
                Ok(config) => {
                    info!(
                        participant = %config.participant_id,
                        config = %path.display(),
                        "Discovered participant"
                    );
                    configs.push(config);
                }
                Err(e) => {
                    warn!(config = %path.display(), error = %e, "Skipping invalid participant config");
                    skipped.push(path);
                }
            }
        }

        Ok((configs, skipped))
    }

    /// Launch every valid participant daemon against the on-disk ledger.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> FleetResult<FleetSummary> {
        let (configs, skipped) = self.load_configs().await?;
        if configs.is_empty() {
            return Err(FleetError::NoParticipants(self.participants_dir.clone()));
        }

        let mut summary = self
            .supervise(
                configs,
                |config: &ParticipantConfig| SigningDaemon::from_config(config.clone()),
                shutdown,
            )
            .await?;
        summary.skipped = skipped;
        Ok(summary)
    }

    /// Run one daemon per config, built by `factory` inside its own task.
    pub async fn supervise<S, F>(
        &self,
        configs: Vec<ParticipantConfig>,
        factory: F,
        mut shutdown: watch::Receiver<bool>,
    ) -> FleetResult<FleetSummary>
    where
        S: LedgerStore + 'static,
        F: Fn(&ParticipantConfig) -> DaemonResult<SigningDaemon<S>> + Send + Sync + 'static,
    {
        let factory = Arc::new(factory);
        let configs: Arc<Vec<ParticipantConfig>> = Arc::new(configs);
        let (stop_tx, stop_rx) = watch::channel(*shutdown.borrow());
        let mut stopping = *shutdown.borrow();

        let mut outcomes: Vec<Option<MemberOutcome>> = vec![None; configs.len()];
        let mut restarts = vec![0u32; configs.len()];
        let mut members = JoinSet::new();

        for slot in 0..configs.len() {
            spawn_member(&mut members, slot, &configs, &factory, &stop_rx, Duration::ZERO);
        }
        info!(daemons = configs.len(), "Fleet started");

        let mut fatal = None;
        loop {
            tokio::select! {
                joined = members.join_next() => {
                    let Some(joined) = joined else { break };
                    let (slot, result) = match joined {
                        Ok(member) => member,
                        Err(e) => {
                            error!(error = %e, "Supervisor task failed");
                            continue;
                        }
                    };
                    let participant = &configs[slot].participant_id;

                    match result {
                        Ok(Ok(exit)) => {
                            info!(participant = %participant, exit = ?exit, "Daemon exited");
                            outcomes[slot] = Some(MemberOutcome::Exited(exit));
                        }
                        Ok(Err(e)) if e.is_shared() => {
                            error!(participant = %participant, error = %e, "Stopping fleet");
                            outcomes[slot] = Some(MemberOutcome::Failed(e.to_string()));
                            if fatal.is_none() {
                                fatal = Some(e);
                            }
                            stopping = true;
                            let _ = stop_tx.send(true);
                        }
                        Ok(Err(e)) => {
                            error!(
                                participant = %participant,
                                error = %e,
                                "Daemon stopped; other participants continue"
                            );
                            outcomes[slot] = Some(MemberOutcome::Failed(e.to_string()));
                        }
                        Err(e) if e.is_panic() && !stopping => {
                            restarts[slot] += 1;
                            if restarts[slot] > self.max_restarts {
                                error!(
                                    participant = %participant,
                                    restarts = restarts[slot] - 1,
                                    "Daemon keeps panicking, giving up"
                                );
                                outcomes[slot] = Some(MemberOutcome::GaveUp);
                            } else {
                                let delay = self.restart_backoff * restarts[slot];
                                warn!(
                                    participant = %participant,
                                    attempt = restarts[slot],
                                    delay = ?delay,
                                    "Daemon panicked, restarting"
                                );
                                spawn_member(&mut members, slot, &configs, &factory, &stop_rx, delay);
                            }
                        }
                        Err(e) => {
                            outcomes[slot] = Some(MemberOutcome::Failed(join_failure(&e)));
                        }
                    }
                }
                changed = shutdown.changed(), if !stopping => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown requested, stopping daemons between ticks");
                        stopping = true;
                        let _ = stop_tx.send(true);
                    }
                }
            }
        }

        if let Some(e) = fatal {
            return Err(FleetError::LedgerCorrupt(e));
        }

        let members = configs
            .iter()
            .zip(outcomes)
            .zip(restarts)
            .map(|((config, outcome), restarts)| MemberReport {
                participant_id: config.participant_id.clone(),
                outcome: outcome.unwrap_or(MemberOutcome::Failed("no outcome".to_string())),
                restarts,
            })
            .collect();

        Ok(FleetSummary {
            members,
            skipped: Vec::new(),
        })
    }
}

type MemberResult = (usize, Result<DaemonResult<DaemonExit>, JoinError>);

/// Start the daemon for `slot` in its own task so a panic surfaces as a
/// `JoinError` instead of taking the supervisor down.
fn spawn_member<S, F>(
    members: &mut JoinSet<MemberResult>,
    slot: usize,
    configs: &Arc<Vec<ParticipantConfig>>,
    factory: &Arc<F>,
    stop: &watch::Receiver<bool>,
    delay: Duration,
) where
    S: LedgerStore + 'static,
    F: Fn(&ParticipantConfig) -> DaemonResult<SigningDaemon<S>> + Send + Sync + 'static,
{
    let configs = Arc::clone(configs);
    let factory = Arc::clone(factory);
    let stop = stop.clone();

    members.spawn(async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let daemon_task = tokio::spawn(async move {
            let mut daemon = match factory(&configs[slot]) {
                Ok(daemon) => daemon,
                Err(e) => return Err(e),
            };
            daemon.run(stop).await
        });
        (slot, daemon_task.await)
    });
}

fn join_failure(e: &JoinError) -> String {
    if e.is_panic() {
        "panicked during shutdown".to_string()
    } else {
        "cancelled".to_string()
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Compare names with digit runs ordered numerically (`share2` < `share10`).
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (mut a, mut b) = (a, b);
    loop {
        match (a.is_empty(), b.is_empty()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            _ => {}
        }

        let (a_chunk, a_rest) = split_chunk(a);
        let (b_chunk, b_rest) = split_chunk(b);
        let a_digits = a_chunk.starts_with(|c: char| c.is_ascii_digit());
        let b_digits = b_chunk.starts_with(|c: char| c.is_ascii_digit());

        let ordering = if a_digits && b_digits {
            let a_num = a_chunk.trim_start_matches('0');
            let b_num = b_chunk.trim_start_matches('0');
            a_num
                .len()
                .cmp(&b_num.len())
                .then_with(|| a_num.cmp(b_num))
                .then_with(|| a_chunk.len().cmp(&b_chunk.len()))
        } else {
            a_chunk.cmp(b_chunk)
        };

        if ordering != Ordering::Equal {
            return ordering;
        }
        a = a_rest;
        b = b_rest;
    }
}

/// Leading run of digits or of non-digits.
fn split_chunk(s: &str) -> (&str, &str) {
    let digits = s.starts_with(|c: char| c.is_ascii_digit());
    let end = s
        .find(|c: char| c.is_ascii_digit() != digits)
        .unwrap_or(s.len());
    s.split_at(end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{FrostScheme, ThresholdScheme};
    use crate::ledger::{MemoryLedgerStore, MessageLedger, MessageStatus};
    use crate::shares::ShareStore;
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
    use tempfile::TempDir;

    #[test]
    fn test_natural_order() {
        let mut names = vec!["share10.toml", "share2.toml", "share1.toml", "alpha.toml"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(
            names,
            vec!["alpha.toml", "share1.toml", "share2.toml", "share10.toml"]
        );
        assert_eq!(natural_cmp("share02", "share2"), Ordering::Greater);
        assert_eq!(natural_cmp("share2", "share2"), Ordering::Equal);
    }

    struct Workspace {
        dir: TempDir,
        store: MemoryLedgerStore,
    }

    impl Workspace {
        async fn new(n: u16, t: u16) -> Self {
            let dir = TempDir::new().unwrap();
            let shares = ShareStore::new(dir.path().join("keys"));
            let keys = FrostScheme::new().generate_keys(n, t).unwrap();
            shares.install(&keys, false).await.unwrap();

            for share in &keys.shares {
                let mut config = ParticipantConfig::new(
                    share.participant_id.clone(),
                    t,
                    PathBuf::from(format!("../keys/{}/secret_share.json", share.participant_id)),
                );
                config.poll_interval = "20ms".to_string();
                config.exit_when_idle = true;
                config.aggregation.enabled = false;
                config
                    .save(
                        &dir.path()
                            .join("participants")
                            .join(format!("share{}.toml", share.participant_id)),
                    )
                    .await
                    .unwrap();
            }

            Self {
                dir,
                store: MemoryLedgerStore::new(),
            }
        }

        fn launcher(&self) -> FleetLauncher {
            FleetLauncher::new(self.dir.path().join("participants"))
                .with_restart_backoff(Duration::from_millis(10))
        }

        async fn configs(&self) -> Vec<ParticipantConfig> {
            self.launcher().load_configs().await.unwrap().0
        }
    }

    #[tokio::test]
    async fn test_discover_skips_invalid_and_other_files() {
        let ws = Workspace::new(3, 2).await;
        let participants = ws.dir.path().join("participants");
        std::fs::write(participants.join("share10.toml"), "threshold = \"many\"").unwrap();
        std::fs::write(participants.join("notes.txt"), "not a config").unwrap();

        let launcher = ws.launcher();
        let names: Vec<_> = launcher
            .discover()
            .await
            .unwrap()
            .iter()
            .map(|p| file_name(p))
            .collect();
        assert_eq!(
            names,
            vec!["share1.toml", "share2.toml", "share3.toml", "share10.toml"]
        );

        let (configs, skipped) = launcher.load_configs().await.unwrap();
        assert_eq!(configs.len(), 3);
        assert_eq!(skipped, vec![participants.join("share10.toml")]);
    }

    #[tokio::test]
    async fn test_missing_directory() {
        let launcher = FleetLauncher::new("/nonexistent/participants");
        assert!(matches!(
            launcher.discover().await,
            Err(FleetError::Discovery { .. })
        ));
    }

    #[tokio::test]
    async fn test_fleet_signs_pending_message() {
        let ws = Workspace::new(3, 2).await;
        let ledger = MessageLedger::new(ws.store.clone());
        ledger.append("evacuate sector 4").await.unwrap();
        let (_tx, rx) = watch::channel(false);

        let factory_ledger = ledger.clone();
        let summary = ws
            .launcher()
            .supervise(
                ws.configs().await,
                move |config| SigningDaemon::new(config.clone(), factory_ledger.clone()),
                rx,
            )
            .await
            .unwrap();

        assert_eq!(summary.members.len(), 3);
        assert!(summary
            .members
            .iter()
            .all(|m| m.outcome == MemberOutcome::Exited(DaemonExit::Idle)));
        let message = ledger.get_by_id(1).await.unwrap().unwrap();
        assert_eq!(message.status, MessageStatus::Signed);
        assert!(message.contribution_count() >= 2);
    }

    #[tokio::test]
    async fn test_one_bad_participant_does_not_stop_others() {
        let ws = Workspace::new(3, 2).await;
        let ledger = MessageLedger::new(ws.store.clone());
        std::fs::remove_file(ws.dir.path().join("keys/2/secret_share.json")).unwrap();
        let (_tx, rx) = watch::channel(false);

        let factory_ledger = ledger.clone();
        let summary = ws
            .launcher()
            .supervise(
                ws.configs().await,
                move |config| SigningDaemon::new(config.clone(), factory_ledger.clone()),
                rx,
            )
            .await
            .unwrap();

        let outcome = |id: &str| {
            summary
                .members
                .iter()
                .find(|m| m.participant_id == id)
                .unwrap()
                .outcome
                .clone()
        };
        assert!(matches!(outcome("2"), MemberOutcome::Failed(_)));
        assert_eq!(outcome("1"), MemberOutcome::Exited(DaemonExit::Idle));
        assert_eq!(outcome("3"), MemberOutcome::Exited(DaemonExit::Idle));
    }

    #[tokio::test]
    async fn test_panicking_daemon_is_restarted() {
        let ws = Workspace::new(3, 2).await;
        let ledger = MessageLedger::new(ws.store.clone());
        let attempts = Arc::new(AtomicU32::new(0));
        let (_tx, rx) = watch::channel(false);

        let counter = Arc::clone(&attempts);
        let factory_ledger = ledger.clone();
        let summary = ws
            .launcher()
            .supervise(
                ws.configs().await,
                move |config| {
                    if config.participant_id == "1"
                        && counter.fetch_add(1, AtomicOrdering::SeqCst) == 0
                    {
                        panic!("simulated crash");
                    }
                    SigningDaemon::new(config.clone(), factory_ledger.clone())
                },
                rx,
            )
            .await
            .unwrap();

        let first = &summary.members[0];
        assert_eq!(first.participant_id, "1");
        assert_eq!(first.restarts, 1);
        assert_eq!(first.outcome, MemberOutcome::Exited(DaemonExit::Idle));
    }

    #[tokio::test]
    async fn test_restart_limit() {
        let ws = Workspace::new(3, 2).await;
        let ledger = MessageLedger::new(ws.store.clone());
        let (_tx, rx) = watch::channel(false);

        let factory_ledger = ledger.clone();
        let summary = ws
            .launcher()
            .with_max_restarts(2)
            .supervise(
                ws.configs().await,
                move |config| {
                    if config.participant_id == "3" {
                        panic!("always crashes");
                    }
                    SigningDaemon::new(config.clone(), factory_ledger.clone())
                },
                rx,
            )
            .await
            .unwrap();

        let third = &summary.members[2];
        assert_eq!(third.outcome, MemberOutcome::GaveUp);
        assert_eq!(third.restarts, 3);
    }

    #[tokio::test]
    async fn test_corrupt_ledger_stops_fleet() {
        let ws = Workspace::new(3, 2).await;
        let ledger_path = ws.dir.path().join("note_contents.jsonl");
        std::fs::write(&ledger_path, "not json\n").unwrap();
        let (_tx, rx) = watch::channel(false);

        let result = ws
            .launcher()
            .supervise(
                ws.configs().await,
                move |config| {
                    let ledger =
                        MessageLedger::new(crate::ledger::JsonlLedgerStore::new(&ledger_path));
                    SigningDaemon::new(config.clone(), ledger)
                },
                rx,
            )
            .await;

        assert!(matches!(result, Err(FleetError::LedgerCorrupt(_))));
    }

    #[tokio::test]
    async fn test_shutdown_stops_all_daemons() {
        let ws = Workspace::new(3, 2).await;
        let ledger = MessageLedger::new(ws.store.clone());
        let configs: Vec<_> = ws
            .configs()
            .await
            .into_iter()
            .map(|mut c| {
                c.exit_when_idle = false;
                c.poll_interval = "1h".to_string();
                c
            })
            .collect();
        let (tx, rx) = watch::channel(false);

        let launcher = ws.launcher();
        let factory_ledger = ledger.clone();
        let fleet = launcher.supervise(
            configs,
            move |config| SigningDaemon::new(config.clone(), factory_ledger.clone()),
            rx,
        );
        let stopper = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(true).unwrap();
        };

        let (summary, ()) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(fleet, stopper)
        })
        .await
        .unwrap();

        let summary = summary.unwrap();
        assert!(summary
            .members
            .iter()
            .all(|m| m.outcome == MemberOutcome::Exited(DaemonExit::Shutdown)));
    }
}
