//! In-memory publisher for testing.

use super::outbox::event_id;
use super::traits::{event_text, EventId, PublishError, PublishResult, Publisher};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Records published events. Can be switched to reject everything.
#[derive(Clone, Default)]
pub struct MemoryPublisher {
    events: Arc<Mutex<Vec<String>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publisher whose every call fails.
    pub fn failing() -> Self {
        let publisher = Self::default();
        publisher.set_failing(true);
        publisher
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, content: &str, signature: &str) -> PublishResult<EventId> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError::Rejected("relay unavailable".to_string()));
        }
        let text = event_text(content, signature);
        let id = event_id(&text);
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(text);
        Ok(id)
    }
}
