//! Commit observer registry.
//!
//! Tracks whoever wants to hear about commits and fans each commit notice out
//! to them. Observers that went away are dropped on the next broadcast.

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::Generation;

/// Identifier handed out when an observer registers.
pub type ObserverId = Uuid;

/// One commit, as seen by observers.
#[derive(Debug, Clone)]
pub struct CommitNotice<R> {
    /// Generation reached by this commit
    pub generation: Generation,
    /// Read view pinned to exactly this commit
    pub reader: R,
}

/// Receives commit notices. Returning false unregisters the sink.
pub type NoticeSink<R> = Box<dyn Fn(CommitNotice<R>) -> bool + Send + Sync>;

/// Registry of commit observers, safe to share across threads.
pub struct ObserverRegistry<R> {
    sinks: DashMap<ObserverId, NoticeSink<R>>,
}

impl<R: Clone> ObserverRegistry<R> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            sinks: DashMap::new(),
        }
    }

    /// Register a sink and return its id.
    pub fn register(&self, sink: NoticeSink<R>) -> ObserverId {
        let id = Uuid::new_v4();
        self.sinks.insert(id, sink);
        tracing::debug!(observer = %id, "Commit observer registered");
        id
    }

    /// Register a channel; notices arrive on the returned receiver in commit order.
    pub fn subscribe(&self) -> (ObserverId, mpsc::UnboundedReceiver<CommitNotice<R>>)
    where
        R: Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.register(Box::new(move |notice| tx.send(notice).is_ok()));
        (id, rx)
    }

    /// Unregister an observer.
    pub fn unregister(&self, id: &ObserverId) {
        if self.sinks.remove(id).is_some() {
            tracing::debug!(observer = %id, "Commit observer unregistered");
        }
    }

    /// Deliver a notice to every observer.
    ///
    /// Returns the number of observers that accepted it.
    pub fn broadcast(&self, notice: &CommitNotice<R>) -> usize {
        let mut delivered = 0;
        let mut gone = Vec::new();

        for entry in self.sinks.iter() {
            if (entry.value())(notice.clone()) {
                delivered += 1;
            } else {
                gone.push(*entry.key());
            }
        }

        // Removal waits until iteration released the shard locks.
        for id in &gone {
            self.unregister(id);
        }

        delivered
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl<R: Clone> Default for ObserverRegistry<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> std::fmt::Debug for ObserverRegistry<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("observers", &self.sinks.len())
            .finish()
    }
}
