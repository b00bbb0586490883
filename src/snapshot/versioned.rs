//! Snapshot publication and the single-writer gate.

use crate::error::{Result, StoreError};
use crate::schema::Schema;
use crate::tables::Table;
use crate::types::{TableId, Version};
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

use super::changes::ChangeSet;
use super::transaction::WriteTransaction;
use super::{ReadView, Snapshot};

/// Mutual exclusion between writers.
struct WriterGate {
    held: Mutex<bool>,
    released: Condvar,
}

impl WriterGate {
    fn new() -> Self {
        Self {
            held: Mutex::new(false),
            released: Condvar::new(),
        }
    }
}

/// Proof of holding the writer gate. Releases it on drop.
pub(crate) struct WriterPermit {
    gate: Arc<WriterGate>,
}

impl Drop for WriterPermit {
    fn drop(&mut self) {
        let mut held = self.gate.held.lock();
        *held = false;
        self.gate.released.notify_one();
    }
}

/// The store's version history.
///
/// Holds the latest committed snapshot, hands out write transactions one at
/// a time, and keeps weak references to every published snapshot so it can
/// report which versions readers still pin.
pub struct VersionedStore {
    current: RwLock<Arc<Snapshot>>,
    gate: Arc<WriterGate>,
    /// Next row key. Never rolled back.
    keys: Arc<AtomicU64>,
    published: Mutex<Vec<Weak<Snapshot>>>,
}

impl VersionedStore {
    /// An empty store at version 0 with one table per object type.
    pub fn new(schema: &Schema) -> Self {
        let tables = schema
            .objects
            .iter()
            .enumerate()
            .map(|(i, object)| Table::new(TableId(i as u32), Arc::new(object.clone())))
            .collect();
        Self::from_tables(tables, Version(0), 1)
    }

    /// A store whose latest snapshot holds `tables` at `version`.
    pub fn from_tables(tables: Vec<Table>, version: Version, next_key: u64) -> Self {
        let snapshot = Arc::new(Snapshot::new(version, tables.into_iter().map(Arc::new).collect()));
        Self {
            published: Mutex::new(vec![Arc::downgrade(&snapshot)]),
            current: RwLock::new(snapshot),
            gate: Arc::new(WriterGate::new()),
            keys: Arc::new(AtomicU64::new(next_key.max(1))),
        }
    }

    /// Pin the latest committed snapshot.
    pub fn begin_read(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.read())
    }

    /// Latest committed version.
    pub fn version(&self) -> Version {
        self.current.read().version()
    }

    /// Start a write transaction, failing if another one is open.
    pub fn begin_write(&self) -> Result<WriteTransaction> {
        let permit = self.try_acquire().ok_or(StoreError::WriteConflict)?;
        Ok(self.start_write(permit))
    }

    /// Start a write transaction, waiting for the current writer to finish.
    pub fn begin_write_blocking(&self) -> WriteTransaction {
        let permit = self.acquire();
        self.start_write(permit)
    }

    fn start_write(&self, permit: WriterPermit) -> WriteTransaction {
        let base = self.begin_read();
        debug!(version = base.version().0, "write transaction started");
        WriteTransaction::new(base, Arc::clone(&self.keys), permit)
    }

    pub(crate) fn try_acquire(&self) -> Option<WriterPermit> {
        let mut held = self.gate.held.lock();
        if *held {
            return None;
        }
        *held = true;
        Some(WriterPermit {
            gate: Arc::clone(&self.gate),
        })
    }

    fn acquire(&self) -> WriterPermit {
        let mut held = self.gate.held.lock();
        while *held {
            self.gate.released.wait(&mut held);
        }
        *held = true;
        WriterPermit {
            gate: Arc::clone(&self.gate),
        }
    }

    /// Whether a write transaction is currently open.
    pub fn is_write_locked(&self) -> bool {
        *self.gate.held.lock()
    }

    /// Publish a transaction as the next version.
    ///
    /// Returns the new snapshot and the transaction's net changes. The
    /// writer gate is released once the snapshot is visible.
    pub fn commit(&self, txn: WriteTransaction) -> Result<(Arc<Snapshot>, ChangeSet)> {
        let mut current = self.current.write();
        if txn.base_version() != current.version() {
            return Err(StoreError::StaleTransaction {
                base: txn.base_version(),
                current: current.version(),
            });
        }

        let (base, tables, changes, permit) = txn.into_parts();
        let snapshot = Arc::new(Snapshot::new(base.version().next(), tables));
        *current = Arc::clone(&snapshot);
        drop(current);
        drop(permit);

        let mut published = self.published.lock();
        published.retain(|weak| weak.strong_count() > 0);
        published.push(Arc::downgrade(&snapshot));

        debug!(version = snapshot.version().0, "committed");
        Ok((snapshot, changes))
    }

    /// Discard a transaction. Never fails.
    pub fn rollback(&self, txn: WriteTransaction) {
        debug!(version = txn.base_version().0, "write transaction rolled back");
        drop(txn);
    }

    /// Versions that are still referenced by someone, oldest first.
    pub fn pinned_versions(&self) -> Vec<Version> {
        let mut published = self.published.lock();
        published.retain(|weak| weak.strong_count() > 0);
        published
            .iter()
            .filter_map(Weak::upgrade)
            .map(|s| s.version())
            .collect()
    }

    /// Next row key that will be issued.
    pub fn next_key(&self) -> u64 {
        self.keys.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ObjectSchema, Property, PropertyType};
    use crate::types::Value;
    use std::thread;
    use std::time::Duration;

    fn test_store() -> VersionedStore {
        VersionedStore::new(&Schema::new(vec![ObjectSchema::new(
            "Counter",
            vec![Property::new("n", PropertyType::Int)],
        )]))
    }

    #[test]
    fn test_single_writer() {
        let store = test_store();
        let txn = store.begin_write().unwrap();
        assert!(store.is_write_locked());
        assert!(matches!(store.begin_write(), Err(StoreError::WriteConflict)));

        store.rollback(txn);
        assert!(!store.is_write_locked());
        assert!(store.begin_write().is_ok());
    }

    #[test]
    fn test_commit_advances_version() {
        let store = test_store();
        assert_eq!(store.version(), Version(0));

        let mut txn = store.begin_write().unwrap();
        txn.create(TableId(0), vec![]).unwrap();
        let (snapshot, changes) = store.commit(txn).unwrap();

        assert_eq!(snapshot.version(), Version(1));
        assert_eq!(store.version(), Version(1));
        assert!(!changes.is_empty());
        assert!(!store.is_write_locked());
    }

    #[test]
    fn test_out_of_range_property_is_an_error() {
        let store = test_store();
        let mut txn = store.begin_write().unwrap();
        let key = txn.create(TableId(0), vec![]).unwrap();
        let (snapshot, _) = store.commit(txn).unwrap();

        assert_eq!(snapshot.get(TableId(0), key, 0).unwrap(), Value::Int(0));
        assert!(matches!(
            snapshot.get(TableId(0), key, 7),
            Err(StoreError::UnknownProperty { .. })
        ));
        assert!(matches!(
            snapshot.list(TableId(0), key, 7),
            Err(StoreError::UnknownProperty { .. })
        ));
    }

    #[test]
    fn test_reader_keeps_pinned_snapshot() {
        let store = test_store();
        let reader = store.begin_read();

        let mut txn = store.begin_write().unwrap();
        let key = txn.create(TableId(0), vec![(0, Value::Int(7))]).unwrap();
        store.commit(txn).unwrap();

        assert!(!reader.is_live(TableId(0), key));
        assert_eq!(store.pinned_versions(), vec![Version(0), Version(1)]);

        drop(reader);
        assert_eq!(store.pinned_versions(), vec![Version(1)]);
    }

    #[test]
    fn test_rollback_does_not_reuse_keys() {
        let store = test_store();

        let mut txn = store.begin_write().unwrap();
        let first = txn.create(TableId(0), vec![]).unwrap();
        store.rollback(txn);

        let mut txn = store.begin_write().unwrap();
        let second = txn.create(TableId(0), vec![]).unwrap();
        assert_ne!(first, second);
        assert!(second > first);
    }

    #[test]
    fn test_blocking_writer_waits() {
        let store = Arc::new(test_store());
        let txn = store.begin_write().unwrap();

        let waiter = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let mut txn = store.begin_write_blocking();
                txn.create(TableId(0), vec![]).unwrap();
                store.commit(txn).unwrap().0.version()
            })
        };

        thread::sleep(Duration::from_millis(20));
        store.commit(txn).unwrap();
        assert_eq!(waiter.join().unwrap(), Version(2));
    }
}
