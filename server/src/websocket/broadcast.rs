//! Change consumer that forwards delivered batches to WebSocket clients.
//!
//! The broadcaster keeps its own mirror of the list. Applying a batch,
//! pushing it out and registering a new client all happen under one lock, so
//! a client's first snapshot is always exactly the state the next batch it
//! receives starts from.

use std::sync::Arc;

use parking_lot::Mutex;
use roster_engine::{
    ChangeConsumer, ChangeEvent, ConsumerResult, Generation, ListMirror, Record, Snapshot,
};

use super::{manager::MessageSender, BatchEvent, ConnectionManager, ServerMessage};

#[derive(Debug, Default)]
struct Delivered {
    generation: Generation,
    pending: Vec<BatchEvent>,
}

/// Collects a batch and broadcasts it as one message when it ends.
#[derive(Debug)]
pub struct BatchBroadcaster {
    conn_manager: Arc<ConnectionManager>,
    delivered: Mutex<Delivered>,
    mirror: ListMirror,
}

impl BatchBroadcaster {
    pub fn new(conn_manager: Arc<ConnectionManager>) -> Self {
        Self {
            conn_manager,
            delivered: Mutex::new(Delivered::default()),
            mirror: ListMirror::default(),
        }
    }

    /// Start from a fetched snapshot.
    pub fn reset(&self, generation: Generation, snapshot: Snapshot) {
        let mut delivered = self.delivered.lock();
        self.mirror.reset(snapshot);
        delivered.generation = generation;
        delivered.pending.clear();
    }

    /// Register a client and queue the current list as its first message.
    pub fn connect(&self, sender: MessageSender) -> String {
        let delivered = self.delivered.lock();
        let conn_id = self.conn_manager.register(sender);
        self.conn_manager
            .send_to(&conn_id, self.snapshot_at(delivered.generation));
        conn_id
    }

    /// Queue the current list for one client.
    ///
    /// Queued under the delivery lock, so it cannot overtake a batch built on
    /// top of it.
    pub fn send_snapshot(&self, conn_id: &str) -> bool {
        let delivered = self.delivered.lock();
        self.conn_manager
            .send_to(conn_id, self.snapshot_at(delivered.generation))
    }

    /// The current list as a snapshot message.
    pub fn snapshot_message(&self) -> ServerMessage {
        let delivered = self.delivered.lock();
        self.snapshot_at(delivered.generation)
    }

    fn snapshot_at(&self, generation: Generation) -> ServerMessage {
        ServerMessage::Snapshot {
            generation,
            sections: self.mirror.sections(),
        }
    }
}

impl ChangeConsumer for BatchBroadcaster {
    fn on_begin(&self, generation: Generation) -> ConsumerResult {
        let mut delivered = self.delivered.lock();
        delivered.pending.clear();
        self.mirror.on_begin(generation)
    }

    fn on_event(&self, event: &ChangeEvent, record: Option<&Record>) -> ConsumerResult {
        let mut delivered = self.delivered.lock();
        delivered.pending.push(BatchEvent {
            event: event.clone(),
            player: record.cloned(),
        });
        self.mirror.on_event(event, record)
    }

    fn on_end(&self, generation: Generation) -> ConsumerResult {
        let mut delivered = self.delivered.lock();
        let events = std::mem::take(&mut delivered.pending);
        let count = events.len();
        delivered.generation = generation;

        let applied = self.mirror.on_end(generation);
        let sent = self
            .conn_manager
            .broadcast_all(ServerMessage::Batch { generation, events });

        tracing::debug!(generation, events = count, recipients = sent, "Batch pushed");
        applied
    }
}
