//! Publication of signed messages.

pub mod memory;
pub mod outbox;
pub mod traits;

pub use memory::MemoryPublisher;
pub use outbox::{event_id, OutboxEvent, OutboxPublisher};
pub use traits::{event_text, EventId, PublishError, PublishResult, Publisher};
