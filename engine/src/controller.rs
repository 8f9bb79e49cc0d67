//! Records controller: keeps a query result in sync with the store.
//!
//! A [`RecordsController`] tracks one [`QuerySpec`]. After every commit it
//! rebuilds the snapshot against the commit's pinned reader, diffs it with the
//! snapshot it delivered last and hands the events to a [`ChangeConsumer`] as
//! one batch:
//!
//! ```text
//! on_begin(generation)
//! on_event(event, record)   // in diff order, once per event
//! on_end(generation)
//! ```
//!
//! All of this happens on a single background task, fed by one channel that
//! carries both commit notices and configuration commands. Batches therefore
//! never overlap, and a diff that becomes ready mid-delivery simply waits its
//! turn in the channel.

use crate::{
    diff::{self, FieldTracking},
    error::Result,
    observers::{CommitNotice, ObserverId},
    snapshot, ChangeEvent, Error, Generation, IndexPath, QuerySpec, Record, RecordStore, Section,
    Snapshot, TransactionSerializer,
};
use parking_lot::RwLock;
use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Weak},
};
use tokio::sync::{mpsc, oneshot};

/// What a consumer callback returns. Failures and panics are logged, never
/// propagated.
pub type ConsumerResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Receives change batches from a [`RecordsController`].
///
/// The controller only keeps a weak reference: once the consumer is dropped,
/// delivery stops but the controller keeps its snapshot current.
pub trait ChangeConsumer: Send + Sync {
    /// A non-empty batch is about to be delivered.
    fn on_begin(&self, _generation: Generation) -> ConsumerResult {
        Ok(())
    }

    /// One event, with the record it concerns: the old version for
    /// deletions, the new version for other row events, `None` for section
    /// events.
    fn on_event(&self, event: &ChangeEvent, record: Option<&Record>) -> ConsumerResult;

    /// The batch is complete. Sent even if earlier callbacks failed.
    fn on_end(&self, _generation: Generation) -> ConsumerResult {
        Ok(())
    }
}

/// Controller tuning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerOptions {
    pub field_tracking: FieldTracking,
}

/// The last delivered state.
#[derive(Debug, Clone)]
struct Current {
    generation: Generation,
    query: QuerySpec,
    snapshot: Arc<Snapshot>,
}

enum Command<R> {
    Commit(CommitNotice<R>),
    SetQuery(QuerySpec, oneshot::Sender<Result<()>>),
    InitialFetch(oneshot::Sender<Result<()>>),
    Sync(oneshot::Sender<Generation>),
}

/// Keeps the result of one query synchronized with a store.
pub struct RecordsController<S: RecordStore> {
    serializer: Arc<TransactionSerializer<S>>,
    current: Arc<RwLock<Current>>,
    commands: mpsc::UnboundedSender<Command<S::Reader>>,
    observer: ObserverId,
}

impl<S: RecordStore> RecordsController<S> {
    /// Start tracking `query`.
    ///
    /// Nothing is fetched yet: call
    /// [`perform_initial_fetch`](Self::perform_initial_fetch) first. Commits
    /// made before that are covered by the initial fetch and never delivered.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        serializer: Arc<TransactionSerializer<S>>,
        query: QuerySpec,
        consumer: Weak<dyn ChangeConsumer>,
        options: ControllerOptions,
    ) -> Result<Self> {
        query.validate()?;

        let current = Arc::new(RwLock::new(Current {
            generation: 0,
            query,
            snapshot: Arc::new(Snapshot::default()),
        }));
        let (commands, rx) = mpsc::unbounded_channel();

        let sink = commands.clone();
        let observer = serializer.observe(Box::new(move |notice| {
            sink.send(Command::Commit(notice)).is_ok()
        }));

        let worker = Worker {
            serializer: Arc::clone(&serializer),
            current: Arc::clone(&current),
            consumer,
            tracking: options.field_tracking,
            fetched: false,
        };
        tokio::spawn(worker.run(rx));

        Ok(Self {
            serializer,
            current,
            commands,
            observer,
        })
    }

    /// Build the first snapshot and adopt it without emitting events.
    ///
    /// Calling it again once fetched does nothing.
    pub async fn perform_initial_fetch(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::InitialFetch(tx))?;
        rx.await.map_err(|_| Error::ControllerClosed)?
    }

    /// Replace the tracked query.
    ///
    /// Once fetched, the new query is built against the latest commit and
    /// the difference is delivered as a batch. On error the previous query
    /// and snapshot stay current and nothing is emitted.
    pub async fn set_query(&self, query: QuerySpec) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::SetQuery(query, tx))?;
        rx.await.map_err(|_| Error::ControllerClosed)?
    }

    /// Wait until every commit and command queued so far is processed.
    ///
    /// Returns the generation of the delivered snapshot.
    pub async fn sync(&self) -> Result<Generation> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Sync(tx))?;
        rx.await.map_err(|_| Error::ControllerClosed)
    }

    pub fn section_count(&self) -> usize {
        self.current.read().snapshot.section_count()
    }

    pub fn row_count(&self, section: usize) -> usize {
        self.current.read().snapshot.row_count(section)
    }

    pub fn record_at(&self, path: IndexPath) -> Option<Record> {
        self.current.read().snapshot.record_at(path).cloned()
    }

    pub fn sections(&self) -> Vec<Section> {
        self.current.read().snapshot.sections().to_vec()
    }

    /// The last delivered snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.read().snapshot)
    }

    pub fn query(&self) -> QuerySpec {
        self.current.read().query.clone()
    }

    /// Generation of the last delivered snapshot.
    pub fn generation(&self) -> Generation {
        self.current.read().generation
    }

    /// The serializer this controller observes.
    pub fn serializer(&self) -> &Arc<TransactionSerializer<S>> {
        &self.serializer
    }

    fn send(&self, command: Command<S::Reader>) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::ControllerClosed)
    }
}

impl<S: RecordStore> Drop for RecordsController<S> {
    fn drop(&mut self) {
        // The task ends once both senders, ours and the observer's, are gone.
        self.serializer.unobserve(&self.observer);
    }
}

impl<S: RecordStore> std::fmt::Debug for RecordsController<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let current = self.current.read();
        f.debug_struct("RecordsController")
            .field("observer", &self.observer)
            .field("generation", &current.generation)
            .field("query", &current.query)
            .finish()
    }
}

struct Worker<S: RecordStore> {
    serializer: Arc<TransactionSerializer<S>>,
    current: Arc<RwLock<Current>>,
    consumer: Weak<dyn ChangeConsumer>,
    tracking: FieldTracking,
    fetched: bool,
}

impl<S: RecordStore> Worker<S> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command<S::Reader>>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Commit(notice) => self.on_commit(notice),
                Command::SetQuery(query, reply) => {
                    let _ = reply.send(self.set_query(query));
                }
                Command::InitialFetch(reply) => {
                    let _ = reply.send(self.initial_fetch());
                }
                Command::Sync(reply) => {
                    let _ = reply.send(self.current.read().generation);
                }
            }
        }
        tracing::debug!("Records controller stopped");
    }

    fn on_commit(&mut self, notice: CommitNotice<S::Reader>) {
        let (generation, query) = {
            let current = self.current.read();
            (current.generation, current.query.clone())
        };
        if !self.fetched || notice.generation <= generation {
            tracing::trace!(
                generation = notice.generation,
                current = generation,
                "Skipping commit"
            );
            return;
        }

        match snapshot::build(&notice.reader, &query) {
            Ok(next) => {
                // Failures are logged inside; the old snapshot stays.
                let _ = self.deliver(notice.generation, query, next);
            }
            Err(e) => {
                tracing::error!(generation = notice.generation, error = %e, "Rebuild after commit failed");
            }
        }
    }

    fn set_query(&mut self, query: QuerySpec) -> Result<()> {
        query.validate()?;
        if !self.fetched {
            self.current.write().query = query;
            return Ok(());
        }

        let (generation, reader) = self.serializer.latest();
        let next = snapshot::build(&reader, &query)?;
        self.deliver(generation, query, next)
    }

    fn initial_fetch(&mut self) -> Result<()> {
        if self.fetched {
            return Ok(());
        }

        let query = self.current.read().query.clone();
        let (generation, reader) = self.serializer.latest();
        let next = snapshot::build(&reader, &query)?;
        tracing::debug!(generation, records = next.record_count(), "Initial fetch");

        self.adopt(generation, query, next);
        self.fetched = true;
        Ok(())
    }

    /// Diff against the delivered snapshot, deliver the batch, then adopt.
    fn deliver(&mut self, generation: Generation, query: QuerySpec, next: Snapshot) -> Result<()> {
        let previous = Arc::clone(&self.current.read().snapshot);

        let changes = match diff::changes(&previous, &next, self.tracking) {
            Ok(changes) => changes,
            Err(e) => {
                tracing::error!(generation, error = %e, "Diff failed, keeping current snapshot");
                return Err(e);
            }
        };

        if !changes.is_empty() {
            tracing::debug!(generation, events = changes.len(), "Delivering batch");
            self.notify(generation, &changes);
        }
        drop(changes);

        self.adopt(generation, query, next);
        Ok(())
    }

    fn notify(&self, generation: Generation, changes: &[diff::Change<'_>]) {
        let Some(consumer) = self.consumer.upgrade() else {
            tracing::debug!(generation, "Consumer is gone, batch dropped");
            return;
        };
        call_consumer(generation, "begin", || consumer.on_begin(generation));
        drop(consumer);

        for change in changes {
            let Some(consumer) = self.consumer.upgrade() else {
                tracing::debug!(generation, "Consumer went away mid-batch");
                return;
            };
            call_consumer(generation, "event", || {
                consumer.on_event(&change.event, change.record)
            });
        }

        if let Some(consumer) = self.consumer.upgrade() {
            call_consumer(generation, "end", || consumer.on_end(generation));
        }
    }

    fn adopt(&self, generation: Generation, query: QuerySpec, snapshot: Snapshot) {
        *self.current.write() = Current {
            generation,
            query,
            snapshot: Arc::new(snapshot),
        };
    }
}

/// Run one consumer callback, turning errors and panics into warnings.
fn call_consumer(
    generation: Generation,
    stage: &'static str,
    callback: impl FnOnce() -> ConsumerResult,
) {
    match panic::catch_unwind(AssertUnwindSafe(callback)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::warn!(generation, stage, error = %e, "Consumer callback failed");
        }
        Err(payload) => {
            tracing::warn!(
                generation,
                stage,
                panic = panic_message(payload.as_ref()),
                "Consumer callback panicked"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
