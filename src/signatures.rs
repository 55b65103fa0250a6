//! Signature log: every produced [`SignedRecord`], plus a "latest" pointer.

use crate::ledger::MessageId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

pub const SIGNATURE_LOG_FILE: &str = "note_signatures.jsonl";
pub const LATEST_SIGNATURE_FILE: &str = "latest_note_signature.json";

pub type SignatureLogResult<T> = Result<T, SignatureLogError>;

#[derive(Debug, thiserror::Error)]
pub enum SignatureLogError {
    #[error("Signature log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed signature record: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Output of one successful aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedRecord {
    pub message_id: MessageId,
    pub content: String,
    /// Hex aggregate signature.
    pub signature: String,
    pub produced_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SignatureLog {
    log_path: PathBuf,
    latest_path: PathBuf,
}

impl SignatureLog {
    /// Log stored alongside the key material.
    pub fn in_dir(keys_dir: &Path) -> Self {
        Self {
            log_path: keys_dir.join(SIGNATURE_LOG_FILE),
            latest_path: keys_dir.join(LATEST_SIGNATURE_FILE),
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn latest_path(&self) -> &Path {
        &self.latest_path
    }

    /// Append `record` to the log, then point "latest" at it.
    pub async fn persist(&self, record: &SignedRecord) -> SignatureLogResult<()> {
        if let Some(parent) = self.log_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        file.sync_data().await?;

        let latest = serde_json::to_string_pretty(record)?;
        let tmp = self.latest_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, latest).await?;
        tokio::fs::rename(&tmp, &self.latest_path).await?;
        Ok(())
    }

    /// All records in production order. A missing log is empty.
    pub async fn records(&self) -> SignatureLogResult<Vec<SignedRecord>> {
        let contents = match tokio::fs::read_to_string(&self.log_path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(SignatureLogError::from))
            .collect()
    }

    pub async fn latest(&self) -> SignatureLogResult<Option<SignedRecord>> {
        match tokio::fs::read_to_string(&self.latest_path).await {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Most recent record for `content`, if any.
    pub async fn find_by_content(&self, content: &str) -> SignatureLogResult<Option<SignedRecord>> {
        Ok(self
            .records()
            .await?
            .into_iter()
            .rev()
            .find(|record| record.content == content))
    }
}
