//! Record Store boundary and the in-memory reference store.
//!
//! The engine never talks to storage directly. It goes through
//! [`RecordStore`], which hands out write transactions and read views.
//! [`MemoryStore`] implements it with copy-on-write tables: a transaction
//! works on a private copy and commit publishes that copy atomically, so a
//! reader only ever sees complete commits.

use crate::{
    error::Result,
    record::{validate_fields, Fields},
    Error, QuerySpec, Record, RecordId,
};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Read access shared by read views and write transactions.
pub trait ReadRecords {
    /// Records matching the query, in the query's order.
    fn execute_query(&self, spec: &QuerySpec) -> Result<Vec<Record>>;

    /// A record by identity.
    fn fetch(&self, id: RecordId) -> Result<Option<Record>>;

    /// Number of stored records.
    fn count(&self) -> Result<usize>;

    /// Every record, by ascending identity.
    fn fetch_all(&self) -> Result<Vec<Record>>;
}

/// A read view fixed to one committed state.
///
/// Cloning a reader must be cheap and keep it on the same state.
pub trait StoreReader: ReadRecords + Clone + Send + Sync + 'static {}

/// A write transaction. Dropping it without commit discards its changes.
pub trait StoreTransaction: ReadRecords + Send {
    /// Insert a record; the store assigns and returns its identity.
    fn insert(&mut self, fields: Fields) -> Result<RecordId>;

    /// Merge fields into an existing record.
    fn update(&mut self, id: RecordId, fields: Fields) -> Result<()>;

    /// Delete a record. Returns false when it did not exist.
    fn delete(&mut self, id: RecordId) -> Result<bool>;

    /// Publish every change made since `begin`.
    fn commit(self) -> Result<()>;

    /// Discard every change made since `begin`.
    fn rollback(self);
}

/// Durable keyed storage, the single source of truth.
pub trait RecordStore: Send + Sync + 'static {
    type Reader: StoreReader;
    type Transaction: StoreTransaction;

    /// Start a write transaction.
    fn begin(&self) -> Result<Self::Transaction>;

    /// A read view of the latest committed state.
    ///
    /// Must not fail: the serializer pins a reader right after every commit,
    /// and a commit nobody can observe would be a lost notification.
    fn reader(&self) -> Self::Reader;
}

#[derive(Debug, Clone, Default)]
struct Table {
    rows: BTreeMap<RecordId, Fields>,
    /// Highest identity ever assigned; identities are never reused
    last_id: RecordId,
}

impl Table {
    fn record(&self, id: RecordId) -> Option<Record> {
        self.rows
            .get(&id)
            .map(|fields| Record::new(id, fields.clone()))
    }

    fn records(&self) -> impl Iterator<Item = Record> + '_ {
        self.rows
            .iter()
            .map(|(id, fields)| Record::new(*id, fields.clone()))
    }

    fn query(&self, spec: &QuerySpec) -> Result<Vec<Record>> {
        spec.validate()?;
        let mut records: Vec<Record> = self.records().collect();
        records.sort_by(|a, b| spec.compare(a, b));
        Ok(records)
    }
}

/// In-memory [`RecordStore`] with snapshot-isolated readers.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    committed: Arc<RwLock<Arc<Table>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    type Reader = MemoryReader;
    type Transaction = MemoryTransaction;

    fn begin(&self) -> Result<MemoryTransaction> {
        let base = Arc::clone(&*self.committed.read());
        Ok(MemoryTransaction {
            committed: Arc::clone(&self.committed),
            working: Table::clone(&base),
            base,
        })
    }

    fn reader(&self) -> MemoryReader {
        MemoryReader {
            table: Arc::clone(&*self.committed.read()),
        }
    }
}

/// Read view over one committed [`MemoryStore`] state.
#[derive(Debug, Clone)]
pub struct MemoryReader {
    table: Arc<Table>,
}

impl ReadRecords for MemoryReader {
    fn execute_query(&self, spec: &QuerySpec) -> Result<Vec<Record>> {
        self.table.query(spec)
    }

    fn fetch(&self, id: RecordId) -> Result<Option<Record>> {
        Ok(self.table.record(id))
    }

    fn count(&self) -> Result<usize> {
        Ok(self.table.rows.len())
    }

    fn fetch_all(&self) -> Result<Vec<Record>> {
        Ok(self.table.records().collect())
    }
}

impl StoreReader for MemoryReader {}

/// Write transaction over a private copy of the table.
#[derive(Debug)]
pub struct MemoryTransaction {
    committed: Arc<RwLock<Arc<Table>>>,
    base: Arc<Table>,
    working: Table,
}

impl ReadRecords for MemoryTransaction {
    fn execute_query(&self, spec: &QuerySpec) -> Result<Vec<Record>> {
        self.working.query(spec)
    }

    fn fetch(&self, id: RecordId) -> Result<Option<Record>> {
        Ok(self.working.record(id))
    }

    fn count(&self) -> Result<usize> {
        Ok(self.working.rows.len())
    }

    fn fetch_all(&self) -> Result<Vec<Record>> {
        Ok(self.working.records().collect())
    }
}

impl StoreTransaction for MemoryTransaction {
    fn insert(&mut self, fields: Fields) -> Result<RecordId> {
        validate_fields(&fields)?;
        self.working.last_id += 1;
        let id = self.working.last_id;
        self.working.rows.insert(id, fields);
        Ok(id)
    }

    fn update(&mut self, id: RecordId, fields: Fields) -> Result<()> {
        validate_fields(&fields)?;
        let row = self
            .working
            .rows
            .get_mut(&id)
            .ok_or(Error::RecordNotFound(id))?;
        row.extend(fields);
        Ok(())
    }

    fn delete(&mut self, id: RecordId) -> Result<bool> {
        Ok(self.working.rows.remove(&id).is_some())
    }

    fn commit(self) -> Result<()> {
        let mut committed = self.committed.write();
        // Two transactions begun from the same state cannot both commit.
        if !Arc::ptr_eq(&*committed, &self.base) {
            return Err(Error::Store(
                "another transaction committed since this one began".into(),
            ));
        }
        *committed = Arc::new(self.working);
        Ok(())
    }

    fn rollback(self) {}
}
