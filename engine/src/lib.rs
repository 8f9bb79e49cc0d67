//! # Roster Engine
//!
//! A reactive query synchronization engine.
//!
//! This crate keeps the result of a query in sync with a record store that is
//! written to concurrently. Every committed write produces at most one batch of
//! structural change events (insert, delete, update, move) that turns the
//! previously delivered list into the new one.
//!
//! ## Design Principles
//!
//! - **One writer**: all mutations go through the [`TransactionSerializer`]
//! - **No lost changes**: each commit is rebuilt against a reader pinned to it
//! - **Identity-based**: diffs track records by their identity key, not by position
//! - **Injected, not global**: stores, serializers and consumers are passed in
//!
//! ## Core Concepts
//!
//! ### Records and queries
//!
//! A [`Record`] is an identity key plus JSON fields. A [`QuerySpec`] orders
//! records by one or more [`SortKey`]s and may group them into sections with a
//! [`Grouping`]. Identity is always the final tiebreaker, so every ordering is
//! total and every [`Snapshot`] deterministic.
//!
//! ### Store
//!
//! [`RecordStore`] is the boundary to storage. [`MemoryStore`] is an in-memory
//! implementation with snapshot-isolated readers.
//!
//! ### Diff
//!
//! [`diff()`] compares two snapshots and returns [`ChangeEvent`]s in an order
//! a list view can apply directly (see [`mirror::replay`]).
//!
//! ### Controller
//!
//! A [`RecordsController`] watches the serializer, rebuilds its query after
//! every commit and delivers the diff to a [`ChangeConsumer`] as one
//! begin/events/end batch.
//!
//! ## Quick Start
//!
//! ```rust
//! use roster_engine::{
//!     ControllerOptions, ListMirror, MemoryStore, QuerySpec, RecordsController, SortKey,
//!     StoreTransaction, TransactionSerializer, record::fields_from_json,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> roster_engine::error::Result<()> {
//!     // 1. Wrap a store in a serializer
//!     let serializer = Arc::new(TransactionSerializer::new(MemoryStore::new()));
//!
//!     // 2. Track a query, mirroring the list
//!     let mirror = Arc::new(ListMirror::default());
//!     let consumer: Arc<dyn roster_engine::ChangeConsumer> = mirror.clone();
//!     let controller = RecordsController::new(
//!         serializer.clone(),
//!         QuerySpec::ordered_by(SortKey::desc("score")),
//!         Arc::downgrade(&consumer),
//!         ControllerOptions::default(),
//!     )?;
//!     controller.perform_initial_fetch().await?;
//!     mirror.reset(controller.snapshot().as_ref().clone());
//!
//!     // 3. Write
//!     serializer
//!         .write(|txn| txn.insert(fields_from_json(json!({"name": "Arthur", "score": 250}))?))
//!         .await?;
//!
//!     // 4. The batch has been delivered once the controller caught up
//!     controller.sync().await?;
//!     assert_eq!(mirror.snapshot(), *controller.snapshot());
//!     assert_eq!(controller.row_count(0), 1);
//!     Ok(())
//! }
//! ```

pub mod controller;
pub mod diff;
pub mod error;
pub mod event;
pub mod mirror;
pub mod observers;
pub mod query;
pub mod record;
pub mod serializer;
pub mod snapshot;
pub mod store;

// Re-export main types at crate root
pub use controller::{ChangeConsumer, ConsumerResult, ControllerOptions, RecordsController};
pub use diff::{diff, diff_with, Change, FieldTracking};
pub use error::Error;
pub use event::{ChangeEvent, FieldChanges, IndexPath};
pub use mirror::ListMirror;
pub use observers::{CommitNotice, ObserverId};
pub use query::{Collation, Direction, Grouping, QuerySpec, SortKey};
pub use record::{Fields, Record};
pub use serializer::{Completion, Outcome, TransactionSerializer};
pub use snapshot::{Section, Snapshot};
pub use store::{
    MemoryReader, MemoryStore, MemoryTransaction, ReadRecords, RecordStore, StoreReader,
    StoreTransaction,
};

/// Type aliases for clarity
pub type RecordId = i64;
pub type SectionKey = serde_json::Value;
pub type Generation = u64;
