//! Daemon lifecycle states and per-tick reports.

use crate::ledger::MessageId;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Idle,
    Evaluating,
    Contributing,
    Sleeping,
    Terminated,
}

impl DaemonState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DaemonState::Idle => "idle",
            DaemonState::Evaluating => "evaluating",
            DaemonState::Contributing => "contributing",
            DaemonState::Sleeping => "sleeping",
            DaemonState::Terminated => "terminated",
        }
    }
}

impl fmt::Display for DaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a daemon's run loop returned without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonExit {
    /// Shutdown was requested.
    Shutdown,
    /// No work left and `exit_when_idle` is set.
    Idle,
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Outside the active window; nothing attempted.
    pub window_closed: bool,
    /// Share could not be loaded and the policy is to retry.
    pub share_unavailable: bool,
    /// A transient ledger failure cut the tick short.
    pub ledger_unavailable: bool,
    pub contributed: Vec<MessageId>,
    pub marked_signed: Vec<MessageId>,
    pub finalized: Vec<MessageId>,
    /// Nothing left for this participant to do right now.
    pub exhausted: bool,
}

impl TickReport {
    pub fn did_work(&self) -> bool {
        !self.contributed.is_empty() || !self.marked_signed.is_empty() || !self.finalized.is_empty()
    }
}
