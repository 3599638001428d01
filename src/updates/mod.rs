//! Live update fan-out to connected observers
//!
//! Every observer owns a bounded queue. Publishing never waits: a message
//! is pushed into each queue with `try_send`, an observer whose queue is
//! full is disconnected, and one whose receiving side is gone is dropped
//! from the set. Publishing happens under a single lock so every observer
//! sees messages in publish order.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Kind of state an update refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Flows,
    Events,
    Options,
}

/// What happened to the resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateCmd {
    Add,
    Update,
    Remove,
    Reset,
}

/// Message pushed to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateMessage {
    pub resource: Resource,
    pub cmd: UpdateCmd,
    pub data: Value,
}

impl UpdateMessage {
    pub fn to_json_string(&self) -> String {
        // a struct of plain JSON values always serializes
        serde_json::to_string(self).unwrap_or_default()
    }
}

struct Registry {
    observers: HashMap<u64, mpsc::Sender<Arc<UpdateMessage>>>,
    next_id: u64,
    closed: bool,
}

/// Fan-out hub shared by the session and all observer connections
pub struct UpdateBroadcaster {
    registry: Mutex<Registry>,
    queue_size: usize,
}

impl UpdateBroadcaster {
    pub fn new(queue_size: usize) -> Arc<Self> {
        Arc::new(Self {
            registry: Mutex::new(Registry {
                observers: HashMap::new(),
                next_id: 1,
                closed: false,
            }),
            queue_size: queue_size.max(1),
        })
    }

    /// Register a new observer. It only sees messages published from now on.
    pub fn subscribe(self: &Arc<Self>) -> Observer {
        let (tx, rx) = mpsc::channel(self.queue_size);
        let mut registry = self.registry.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        if !registry.closed {
            registry.observers.insert(id, tx);
        }
        tracing::debug!(observer = id, total = registry.observers.len(), "observer connected");
        Observer {
            id,
            rx,
            broadcaster: Arc::downgrade(self),
        }
    }

    /// Send a message to every observer. Returns how many queues accepted it.
    pub fn publish(&self, resource: Resource, cmd: UpdateCmd, data: Value) -> usize {
        let message = Arc::new(UpdateMessage {
            resource,
            cmd,
            data,
        });
        let mut registry = self.registry.lock();
        let mut delivered = 0;
        registry.observers.retain(|id, tx| match tx.try_send(message.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(observer = id, "observer queue full, disconnecting");
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(observer = id, "observer gone");
                false
            }
        });
        delivered
    }

    pub fn observer_count(&self) -> usize {
        self.registry.lock().observers.len()
    }

    /// Disconnect every observer and refuse new ones
    pub fn close_all(&self) {
        let mut registry = self.registry.lock();
        registry.closed = true;
        let count = registry.observers.len();
        registry.observers.clear();
        tracing::info!(observers = count, "closed all observer channels");
    }

    fn unsubscribe(&self, id: u64) {
        if self.registry.lock().observers.remove(&id).is_some() {
            tracing::debug!(observer = id, "observer disconnected");
        }
    }
}

/// Receiving end held by one observer connection
///
/// Dropping it removes the observer from the broadcast set.
pub struct Observer {
    id: u64,
    rx: mpsc::Receiver<Arc<UpdateMessage>>,
    broadcaster: Weak<UpdateBroadcaster>,
}

impl Observer {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next message, or `None` once the observer was disconnected
    pub async fn recv(&mut self) -> Option<Arc<UpdateMessage>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<UpdateMessage>> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        if let Some(broadcaster) = self.broadcaster.upgrade() {
            broadcaster.unsubscribe(self.id);
        }
    }
}
