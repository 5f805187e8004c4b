//! Notification hub: push distribution of poll updates.
//!
//! Each push connection registers once and subscribes to at most one poll.
//! When a poll changes, the hub's dispatcher re-reads it and sends the same
//! serialized update to every connection subscribed to that poll. A connection whose
//! receiver is gone is skipped; it disappears when its handler unsubscribes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use livepoll_common::AppResult;
use livepoll_db::{
    entities::poll::PollStatus,
    repositories::{PollRepository, PollWithOptions},
};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use super::event_publisher::{PollUpdatedEvent, UpdatePublisher};

/// Identifies one push connection.
pub type ConnectionId = Uuid;

/// Snapshot pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollUpdateMessage {
    pub poll_id: String,
    pub question: String,
    pub status: PollStatus,
    pub results: BTreeMap<String, i32>,
}

impl From<&PollWithOptions> for PollUpdateMessage {
    fn from(poll: &PollWithOptions) -> Self {
        Self {
            poll_id: poll.poll.id.clone(),
            question: poll.poll.question.clone(),
            status: poll.poll.status,
            results: poll.results(),
        }
    }
}

struct Subscriber {
    poll_id: Option<String>,
    tx: mpsc::UnboundedSender<String>,
}

struct Registry {
    connections: RwLock<HashMap<ConnectionId, Subscriber>>,
    connection_count: AtomicU64,
    poll_repo: PollRepository,
}

impl Registry {
    async fn broadcast(&self, poll_id: &str) -> AppResult<usize> {
        let Some(poll) = self.poll_repo.find_with_options(poll_id).await? else {
            tracing::debug!(poll_id = %poll_id, "Poll gone, nothing to broadcast");
            return Ok(0);
        };
        let Some(json) = serialize(&PollUpdateMessage::from(&poll)) else {
            return Ok(0);
        };

        let connections = self.connections.read().await;
        let mut delivered = 0;
        for (id, subscriber) in connections.iter() {
            if subscriber.poll_id.as_deref() != Some(poll_id) {
                continue;
            }
            if let Err(e) = subscriber.tx.send(json.clone()) {
                tracing::warn!(connection_id = %id, error = %e, "Failed to push poll update");
            } else {
                delivered += 1;
            }
        }

        tracing::debug!(poll_id = %poll_id, delivered, "Broadcast poll update");
        Ok(delivered)
    }
}

/// Registry of push connections and their poll subscriptions.
///
/// Published updates are queued and broadcast one at a time in publish
/// order, so each push reads the store after every earlier one did.
#[derive(Clone)]
pub struct NotificationHub {
    registry: Arc<Registry>,
    updates: Option<mpsc::UnboundedSender<PollUpdatedEvent>>,
}

impl NotificationHub {
    /// Create an empty hub.
    ///
    /// The dispatcher task is spawned on the current runtime; without one,
    /// published updates are dropped.
    #[must_use]
    pub fn new(poll_repo: PollRepository) -> Self {
        let registry = Arc::new(Registry {
            connections: RwLock::new(HashMap::new()),
            connection_count: AtomicU64::new(0),
            poll_repo,
        });

        let updates = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let (tx, rx) = mpsc::unbounded_channel();
                runtime.spawn(dispatch(registry.clone(), rx));
                Some(tx)
            }
            Err(_) => {
                tracing::warn!("No runtime, poll updates will not be pushed");
                None
            }
        };

        Self { registry, updates }
    }

    /// Register a connection. Messages for it arrive on the returned receiver.
    pub async fn register(&self) -> (ConnectionId, mpsc::UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut connections = self.registry.connections.write().await;
            connections.insert(id, Subscriber { poll_id: None, tx });
        }

        self.registry.connection_count.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(connection_id = %id, "Push connection registered");

        (id, rx)
    }

    /// Bind a connection to a poll, replacing any previous subscription.
    ///
    /// Returns `false` for an unknown connection.
    pub async fn subscribe(&self, connection: ConnectionId, poll_id: &str) -> bool {
        let mut connections = self.registry.connections.write().await;
        match connections.get_mut(&connection) {
            Some(subscriber) => {
                subscriber.poll_id = Some(poll_id.to_string());
                tracing::debug!(connection_id = %connection, poll_id = %poll_id, "Subscribed to poll");
                true
            }
            None => false,
        }
    }

    /// Remove a connection.
    pub async fn unsubscribe(&self, connection: ConnectionId) {
        let mut connections = self.registry.connections.write().await;
        if connections.remove(&connection).is_some() {
            self.registry.connection_count.fetch_sub(1, Ordering::Relaxed);
            tracing::debug!(connection_id = %connection, "Push connection removed");
        }
    }

    /// Number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> u64 {
        self.registry.connection_count.load(Ordering::Relaxed)
    }

    /// Number of connections subscribed to a poll.
    pub async fn subscriber_count(&self, poll_id: &str) -> usize {
        let connections = self.registry.connections.read().await;
        connections
            .values()
            .filter(|s| s.poll_id.as_deref() == Some(poll_id))
            .count()
    }

    /// Send the current state of a poll to one connection.
    ///
    /// Returns `false` when the poll does not exist or the connection is gone.
    pub async fn send_snapshot(&self, connection: ConnectionId, poll_id: &str) -> AppResult<bool> {
        let Some(poll) = self.registry.poll_repo.find_with_options(poll_id).await? else {
            return Ok(false);
        };
        let Some(json) = serialize(&PollUpdateMessage::from(&poll)) else {
            return Ok(false);
        };

        let connections = self.registry.connections.read().await;
        Ok(connections
            .get(&connection)
            .is_some_and(|s| s.tx.send(json).is_ok()))
    }

    /// Re-read a poll and push it to its subscribers now, bypassing the queue.
    ///
    /// Returns the number of connections the update was handed to.
    pub async fn broadcast(&self, poll_id: &str) -> AppResult<usize> {
        self.registry.broadcast(poll_id).await
    }
}

impl UpdatePublisher for NotificationHub {
    fn publish(&self, event: PollUpdatedEvent) {
        let Some(updates) = &self.updates else {
            tracing::warn!(poll_id = %event.poll_id, "No dispatcher, dropping poll update");
            return;
        };

        if let Err(e) = updates.send(event) {
            tracing::warn!(poll_id = %e.0.poll_id, "Dispatcher stopped, dropping poll update");
        }
    }
}

/// Broadcast queued updates sequentially until every hub handle is dropped.
async fn dispatch(
    registry: Arc<Registry>,
    mut updates: mpsc::UnboundedReceiver<PollUpdatedEvent>,
) {
    while let Some(event) = updates.recv().await {
        if let Err(e) = registry.broadcast(&event.poll_id).await {
            tracing::error!(poll_id = %event.poll_id, error = %e, "Failed to broadcast poll update");
        }
    }
    tracing::debug!("Poll update dispatcher stopped");
}

fn serialize(message: &PollUpdateMessage) -> Option<String> {
    match serde_json::to_string(message) {
        Ok(json) => Some(json),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize poll update");
            None
        }
    }
}
