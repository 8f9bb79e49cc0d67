//! Transaction Serializer - the single logical writer.
//!
//! Every mutation goes through [`TransactionSerializer`]. Writers are admitted
//! one at a time in FIFO order by a fair `tokio` mutex held for the whole
//! transaction body. Readers never wait: they use the read view pinned at the
//! latest commit.
//!
//! After each commit, while the write lock is still held, the serializer pins
//! a reader to the new state, bumps the generation once and hands a
//! [`CommitNotice`] to every observer. Observers do their work later, on their
//! own tasks, so the writer never waits on the notification pipeline.

use crate::{
    error::Result,
    observers::{CommitNotice, NoticeSink, ObserverId, ObserverRegistry},
    Generation, RecordStore, StoreTransaction,
};
use parking_lot::RwLock;
use tokio::sync::{mpsc, watch, Mutex};

/// How a write closure ends its transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Commit,
    Rollback,
}

/// Result of an admitted write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// Changes are published; `generation` is the commit's generation
    Committed { generation: Generation, value: T },
    /// Nothing was published
    RolledBack { value: T },
}

impl<T> Outcome<T> {
    /// The value returned by the write closure.
    pub fn into_value(self) -> T {
        match self {
            Outcome::Committed { value, .. } | Outcome::RolledBack { value } => value,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, Outcome::Committed { .. })
    }

    /// Generation of the commit, if there was one.
    pub fn generation(&self) -> Option<Generation> {
        match self {
            Outcome::Committed { generation, .. } => Some(*generation),
            Outcome::RolledBack { .. } => None,
        }
    }
}

/// Serializes writes to a [`RecordStore`] and announces commits.
pub struct TransactionSerializer<S: RecordStore> {
    store: S,
    /// Held for the whole body of a write; guards the generation counter
    writer: Mutex<Generation>,
    latest: RwLock<(Generation, S::Reader)>,
    observers: ObserverRegistry<S::Reader>,
    generation_tx: watch::Sender<Generation>,
}

impl<S: RecordStore> TransactionSerializer<S> {
    /// Take ownership of a store. All writes must go through the serializer
    /// from now on.
    pub fn new(store: S) -> Self {
        let reader = store.reader();
        let (generation_tx, _) = watch::channel(0);
        Self {
            store,
            writer: Mutex::new(0),
            latest: RwLock::new((0, reader)),
            observers: ObserverRegistry::new(),
            generation_tx,
        }
    }

    /// Run a write transaction once admitted.
    ///
    /// The closure decides between commit and rollback. An error from the
    /// closure rolls back and is returned. Dropping the returned future before
    /// admission cancels the request; once admitted, it runs to the end.
    pub async fn run_write<T, F>(&self, f: F) -> Result<Outcome<T>>
    where
        F: FnOnce(&mut S::Transaction) -> Result<(Completion, T)>,
    {
        let mut generation = self.writer.lock().await;
        self.execute(&mut generation, f)
    }

    /// Blocking twin of [`run_write`](Self::run_write), for plain threads.
    ///
    /// Panics when called from inside an async runtime.
    pub fn run_write_blocking<T, F>(&self, f: F) -> Result<Outcome<T>>
    where
        F: FnOnce(&mut S::Transaction) -> Result<(Completion, T)>,
    {
        let mut generation = self.writer.blocking_lock();
        self.execute(&mut generation, f)
    }

    /// Run a write that always commits unless the closure fails.
    pub async fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut S::Transaction) -> Result<T>,
    {
        self.run_write(|txn| f(txn).map(|value| (Completion::Commit, value)))
            .await
            .map(Outcome::into_value)
    }

    /// Blocking twin of [`write`](Self::write).
    pub fn write_blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut S::Transaction) -> Result<T>,
    {
        self.run_write_blocking(|txn| f(txn).map(|value| (Completion::Commit, value)))
            .map(Outcome::into_value)
    }

    /// Run a write whose closure picks commit or rollback.
    pub async fn transaction<F>(&self, f: F) -> Result<Completion>
    where
        F: FnOnce(&mut S::Transaction) -> Result<Completion>,
    {
        self.run_write(|txn| f(txn).map(|completion| (completion, completion)))
            .await
            .map(Outcome::into_value)
    }

    /// Run a read against the latest commit. Never waits for writers.
    pub fn run_read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&S::Reader) -> Result<T>,
    {
        let reader = self.latest.read().1.clone();
        f(&reader)
    }

    /// Generation and read view of the latest commit.
    pub fn latest(&self) -> (Generation, S::Reader) {
        self.latest.read().clone()
    }

    /// Number of commits so far.
    pub fn generation(&self) -> Generation {
        self.latest.read().0
    }

    /// Receiver that sees the generation advance.
    pub fn subscribe_generation(&self) -> watch::Receiver<Generation> {
        self.generation_tx.subscribe()
    }

    /// Register a commit sink. It is called under the write lock and must
    /// not block.
    pub fn observe(&self, sink: NoticeSink<S::Reader>) -> ObserverId {
        self.observers.register(sink)
    }

    /// Commit notices through a channel, in commit order.
    pub fn subscribe(&self) -> (ObserverId, mpsc::UnboundedReceiver<CommitNotice<S::Reader>>) {
        self.observers.subscribe()
    }

    /// Stop notifying an observer.
    pub fn unobserve(&self, id: &ObserverId) {
        self.observers.unregister(id);
    }

    fn execute<T, F>(&self, generation: &mut Generation, f: F) -> Result<Outcome<T>>
    where
        F: FnOnce(&mut S::Transaction) -> Result<(Completion, T)>,
    {
        let mut txn = self.store.begin()?;
        match f(&mut txn) {
            Ok((Completion::Commit, value)) => {
                txn.commit()?;
                *generation += 1;
                self.publish(*generation);
                Ok(Outcome::Committed {
                    generation: *generation,
                    value,
                })
            }
            Ok((Completion::Rollback, value)) => {
                txn.rollback();
                tracing::debug!(generation = *generation, "Write rolled back");
                Ok(Outcome::RolledBack { value })
            }
            Err(e) => {
                txn.rollback();
                tracing::debug!(generation = *generation, error = %e, "Write failed, rolled back");
                Err(e)
            }
        }
    }

    /// Announce a commit. Runs with the write lock held so notices leave in
    /// commit order.
    fn publish(&self, generation: Generation) {
        let reader = self.store.reader();
        *self.latest.write() = (generation, reader.clone());

        let notice = CommitNotice { generation, reader };
        let observers = self.observers.broadcast(&notice);
        self.generation_tx.send_replace(generation);

        tracing::debug!(generation, observers, "Write committed");
    }
}

impl<S: RecordStore + std::fmt::Debug> std::fmt::Debug for TransactionSerializer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionSerializer")
            .field("store", &self.store)
            .field("generation", &self.generation())
            .field("observers", &self.observers)
            .finish()
    }
}
