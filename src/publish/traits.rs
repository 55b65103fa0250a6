//! Publisher abstraction.
//!
//! Publishing happens after a message is marked broadcast. Failures are
//! reported to the caller but never undo the ledger transition.

use async_trait::async_trait;

pub type PublishResult<T> = Result<T, PublishError>;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Publish I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode event: {0}")]
    Encode(String),

    #[error("Publisher rejected event: {0}")]
    Rejected(String),
}

/// Opaque identifier of a published event.
pub type EventId = String;

/// Sends a signed message to the outside world.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, content: &str, signature: &str) -> PublishResult<EventId>;
}

/// Text of the event carrying `content` and its signature.
pub fn event_text(content: &str, signature: &str) -> String {
    format!("{}\nFROST Signature: {}", content, signature)
}
