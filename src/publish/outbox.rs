//! File outbox publisher.
//!
//! Events are appended as JSON lines; a separate relay bridge drains the
//! outbox onto the network.

use super::traits::{event_text, EventId, PublishError, PublishResult, Publisher};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: EventId,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct OutboxPublisher {
    path: PathBuf,
}

impl OutboxPublisher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Events currently in the outbox, oldest first.
    pub async fn events(&self) -> PublishResult<Vec<OutboxEvent>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(|e| PublishError::Encode(e.to_string())))
            .collect()
    }
}

/// SHA-256 of the event text, hex encoded.
pub fn event_id(text: &str) -> EventId {
    hex::encode(Sha256::digest(text.as_bytes()))
}

#[async_trait]
impl Publisher for OutboxPublisher {
    async fn publish(&self, content: &str, signature: &str) -> PublishResult<EventId> {
        let text = event_text(content, signature);
        let event = OutboxEvent {
            id: event_id(&text),
            text,
            created_at: Utc::now(),
        };

        let mut line =
            serde_json::to_string(&event).map_err(|e| PublishError::Encode(e.to_string()))?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        info!(event_id = %event.id, outbox = %self.path.display(), "Queued signed event");
        Ok(event.id)
    }
}
