//! On-disk workspace layout.
//!
//! ```text
//! <root>/
//!   note_contents.jsonl            message ledger
//!   outbox.jsonl                   published events
//!   keys/
//!     group_key_bundle.json
//!     public_key.txt
//!     note_signatures.jsonl
//!     latest_note_signature.json
//!     <participant_id>/secret_share.json
//!   participants/
//!     share<N>.toml
//! ```

use std::path::{Path, PathBuf};

pub const LEDGER_FILE: &str = "note_contents.jsonl";
pub const OUTBOX_FILE: &str = "outbox.jsonl";
pub const KEYS_DIR: &str = "keys";
pub const PARTICIPANTS_DIR: &str = "participants";

/// Default workspace root, used when `--dir` is not given.
pub fn default_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("quorum-signer")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLayout {
    root: PathBuf,
}

impl WorkspaceLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Layout at `dir`, or at [`default_root`] when absent.
    pub fn resolve(dir: Option<PathBuf>) -> Self {
        Self::new(dir.unwrap_or_else(default_root))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ledger(&self) -> PathBuf {
        self.root.join(LEDGER_FILE)
    }

    pub fn outbox(&self) -> PathBuf {
        self.root.join(OUTBOX_FILE)
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.root.join(KEYS_DIR)
    }

    pub fn participants_dir(&self) -> PathBuf {
        self.root.join(PARTICIPANTS_DIR)
    }

    /// Generated config file for `participant_id`.
    pub fn participant_config(&self, participant_id: &str) -> PathBuf {
        self.participants_dir()
            .join(format!("share{}.toml", participant_id))
    }
}
