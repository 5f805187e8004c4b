//! Update publisher.
//!
//! Services announce committed poll changes through [`UpdatePublisher`]
//! without depending on how observers are reached.

use std::sync::Arc;

/// A poll changed and observers should refresh it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollUpdatedEvent {
    /// The poll that changed.
    pub poll_id: String,
}

impl PollUpdatedEvent {
    /// Create an event for a poll.
    #[must_use]
    pub fn new(poll_id: impl Into<String>) -> Self {
        Self {
            poll_id: poll_id.into(),
        }
    }
}

/// Trait for publishing poll updates.
///
/// Publishing is fire-and-forget: it never blocks the caller on delivery and
/// never fails the operation that triggered it.
pub trait UpdatePublisher: Send + Sync {
    /// Announce that a poll changed.
    fn publish(&self, event: PollUpdatedEvent);
}

/// Publisher that drops every event.
#[derive(Clone, Default)]
pub struct NoOpUpdatePublisher;

impl UpdatePublisher for NoOpUpdatePublisher {
    fn publish(&self, _event: PollUpdatedEvent) {}
}

/// Shared publisher handle.
pub type UpdatePublisherService = Arc<dyn UpdatePublisher>;
