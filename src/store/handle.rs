//! Per-context transaction coordinator.

use crate::collections::{Object, Results};
use crate::error::{Result, StoreError};
use crate::snapshot::{ReadView, Snapshot, WriteTransaction};
use crate::types::{RowKey, Value, Version};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::Store;

/// Per-handle settings.
#[derive(Clone, Debug)]
pub struct HandleConfig {
    /// Move a reading handle to the latest snapshot at the start of every
    /// access. Default: true
    pub auto_refresh: bool,
}

impl Default for HandleConfig {
    fn default() -> Self {
        Self { auto_refresh: true }
    }
}

/// What a handle passes to code running against its current view.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ViewContext {
    /// Structural change counter of the handle.
    pub(crate) epoch: u64,
    /// The view is a committed snapshot rather than a write transaction.
    pub(crate) committed: bool,
}

enum TxnState {
    Read(Arc<Snapshot>),
    Write(WriteTransaction),
}

/// One context's view of a [`Store`].
///
/// Either reads a pinned snapshot or owns the store's write transaction.
/// [`Object`], [`List`](crate::List) and [`Results`] borrow a handle and go
/// through it for every access, so they always see its current state.
///
/// # Example
///
/// ```ignore
/// let handle = store.handle();
/// handle.write(|h| {
///     let parent = h.create("ArrayObject")?;
///     parent.list("array")?.append(&h.create("StringObject")?)
/// })?;
/// ```
pub struct StoreHandle {
    store: Arc<Store>,
    state: Mutex<TxnState>,
    /// Bumped on every structural change seen by this handle.
    epoch: AtomicU64,
    config: HandleConfig,
}

impl StoreHandle {
    pub fn new(store: Arc<Store>) -> Self {
        Self::with_config(store, HandleConfig::default())
    }

    pub fn with_config(store: Arc<Store>, config: HandleConfig) -> Self {
        let snapshot = store.snapshot();
        Self {
            store,
            state: Mutex::new(TxnState::Read(snapshot)),
            epoch: AtomicU64::new(0),
            config,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn config(&self) -> &HandleConfig {
        &self.config
    }

    /// Version of the snapshot being read, or the base of the open write.
    pub fn version(&self) -> Version {
        match &*self.state.lock() {
            TxnState::Read(snapshot) => snapshot.version(),
            TxnState::Write(txn) => txn.base_version(),
        }
    }

    pub fn is_in_write_transaction(&self) -> bool {
        matches!(*self.state.lock(), TxnState::Write(_))
    }

    pub(crate) fn bump_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    // --- Transactions ---

    /// Start a write transaction on the latest version.
    ///
    /// Fails with [`StoreError::WriteConflict`] if any handle of the store
    /// already has one open.
    pub fn begin_write(&self) -> Result<()> {
        let mut state = self.state.lock();
        if matches!(*state, TxnState::Write(_)) {
            return Err(StoreError::AlreadyInWriteTransaction);
        }
        *state = TxnState::Write(self.store.versions().begin_write()?);
        self.bump_epoch();
        Ok(())
    }

    /// Start a write transaction, waiting for another handle's to finish.
    pub fn begin_write_blocking(&self) -> Result<()> {
        let mut state = self.state.lock();
        if matches!(*state, TxnState::Write(_)) {
            return Err(StoreError::AlreadyInWriteTransaction);
        }
        *state = TxnState::Write(self.store.versions().begin_write_blocking());
        self.bump_epoch();
        Ok(())
    }

    fn take_write(&self, state: &mut TxnState) -> Result<WriteTransaction> {
        match std::mem::replace(state, TxnState::Read(self.store.snapshot())) {
            TxnState::Write(txn) => Ok(txn),
            read => {
                *state = read;
                Err(StoreError::NotInWriteTransaction)
            }
        }
    }

    /// Commit the open write transaction. Returns the new version.
    ///
    /// On failure nothing is published and the handle is back to reading
    /// the version the transaction started from.
    pub fn commit_write(&self) -> Result<Version> {
        let mut state = self.state.lock();
        let txn = self.take_write(&mut state)?;
        let result = self.store.commit(txn);
        self.bump_epoch();

        match result {
            Ok(snapshot) => {
                let version = snapshot.version();
                *state = TxnState::Read(snapshot);
                Ok(version)
            }
            Err(e) => {
                warn!(error = %e, "commit failed, transaction discarded");
                Err(e)
            }
        }
    }

    /// Discard the open write transaction.
    pub fn cancel_write(&self) -> Result<()> {
        let mut state = self.state.lock();
        let txn = self.take_write(&mut state)?;
        self.store.versions().rollback(txn);
        self.bump_epoch();
        Ok(())
    }

    /// Run `f` in a write transaction. Commits if it returns `Ok`, rolls
    /// back if it returns `Err`. If `f` already ended the transaction
    /// itself, that outcome stands.
    pub fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Self) -> Result<T>,
    {
        self.begin_write()?;
        match f(self) {
            Ok(value) => {
                if self.is_in_write_transaction() {
                    self.commit_write()?;
                }
                Ok(value)
            }
            Err(e) => {
                if self.is_in_write_transaction() {
                    self.cancel_write()?;
                }
                Err(e)
            }
        }
    }

    /// Move a reading handle to the latest snapshot. Returns whether the
    /// version changed. Does nothing during a write transaction.
    pub fn refresh(&self) -> bool {
        match &mut *self.state.lock() {
            TxnState::Read(snapshot) => self.advance(snapshot),
            TxnState::Write(_) => false,
        }
    }

    fn advance(&self, snapshot: &mut Arc<Snapshot>) -> bool {
        let latest = self.store.snapshot();
        if latest.version() == snapshot.version() {
            return false;
        }
        debug!(from = snapshot.version().0, to = latest.version().0, "refreshed");
        *snapshot = latest;
        self.bump_epoch();
        true
    }

    /// Run `f` against the current view.
    ///
    /// This is the refresh point for auto-refreshing handles. `f` must not
    /// call back into the handle.
    pub(crate) fn with_view<T>(
        &self,
        f: impl FnOnce(&dyn ReadView, ViewContext) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.state.lock();
        if self.config.auto_refresh {
            if let TxnState::Read(snapshot) = &mut *state {
                self.advance(snapshot);
            }
        }
        self.view_of(&state, f)
    }

    /// Run `f` against the current view without refreshing.
    pub(crate) fn peek_view<T>(
        &self,
        f: impl FnOnce(&dyn ReadView, ViewContext) -> Result<T>,
    ) -> Result<T> {
        let state = self.state.lock();
        self.view_of(&state, f)
    }

    fn view_of<T>(
        &self,
        state: &TxnState,
        f: impl FnOnce(&dyn ReadView, ViewContext) -> Result<T>,
    ) -> Result<T> {
        let ctx = ViewContext {
            epoch: self.epoch(),
            committed: matches!(state, TxnState::Read(_)),
        };
        match state {
            TxnState::Read(snapshot) => f(snapshot.as_ref(), ctx),
            TxnState::Write(txn) => f(txn, ctx),
        }
    }

    /// Run `f` against the open write transaction.
    pub(crate) fn with_txn<T>(
        &self,
        f: impl FnOnce(&mut WriteTransaction, ViewContext) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.state.lock();
        let ctx = ViewContext {
            epoch: self.epoch(),
            committed: false,
        };
        match &mut *state {
            TxnState::Write(txn) => f(txn, ctx),
            TxnState::Read(_) => Err(StoreError::ReadOnlyTransaction),
        }
    }

    // --- Objects ---

    /// Create an object with default property values.
    pub fn create(&self, object_type: &str) -> Result<Object<'_>> {
        self.create_with(object_type, std::iter::empty::<(&str, Value)>())
    }

    /// Create an object, overriding some properties.
    pub fn create_with<'a>(
        &self,
        object_type: &str,
        values: impl IntoIterator<Item = (&'a str, Value)>,
    ) -> Result<Object<'_>> {
        let table = self.store.table_id(object_type)?;
        let schema = self.store.object_schema(table);
        let values = values
            .into_iter()
            .map(|(name, value)| Ok((schema.property_or_err(name)?.0, value)))
            .collect::<Result<Vec<_>>>()?;

        self.with_txn(|txn, ctx| {
            let key = txn.create(table, values)?;
            Ok(Object::at(self, &*txn, ctx, table, key))
        })
    }

    /// The object of `object_type` with `key`, if it exists in the current view.
    pub fn object(&self, object_type: &str, key: RowKey) -> Result<Option<Object<'_>>> {
        let table = self.store.table_id(object_type)?;
        self.with_view(|view, ctx| {
            Ok(view
                .is_live(table, key)
                .then(|| Object::at(self, view, ctx, table, key)))
        })
    }

    /// Every object of `object_type`.
    pub fn objects(&self, object_type: &str) -> Result<Results<'_>> {
        Ok(Results::new(self, self.store.table_id(object_type)?))
    }

    pub fn delete(&self, object: &Object<'_>) -> Result<()> {
        object.delete()
    }

    /// Delete every object of `object_type`.
    pub fn delete_all(&self, object_type: &str) -> Result<()> {
        self.objects(object_type)?.delete_all()
    }
}

impl Drop for StoreHandle {
    fn drop(&mut self) {
        if matches!(*self.state.get_mut(), TxnState::Write(_)) {
            debug!("handle dropped inside a write transaction, rolling back");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ObjectSchema, Property, PropertyType, Schema};

    fn test_store() -> Arc<Store> {
        Arc::new(
            Store::in_memory(Schema::new(vec![ObjectSchema::new(
                "Counter",
                vec![Property::new("n", PropertyType::Int)],
            )]))
            .unwrap(),
        )
    }

    #[test]
    fn test_write_outside_transaction_fails() {
        let store = test_store();
        let handle = store.handle();
        assert!(matches!(
            handle.create("Counter"),
            Err(StoreError::ReadOnlyTransaction)
        ));
        assert!(matches!(
            handle.commit_write(),
            Err(StoreError::NotInWriteTransaction)
        ));
        assert!(matches!(
            handle.cancel_write(),
            Err(StoreError::NotInWriteTransaction)
        ));
    }

    #[test]
    fn test_write_closure_may_end_transaction() {
        let store = test_store();
        let handle = store.handle();

        let version = handle
            .write(|h| {
                h.create("Counter")?;
                h.commit_write()
            })
            .unwrap();
        assert_eq!(version, Version(1));
        assert_eq!(store.version(), Version(1));
        assert!(!handle.is_in_write_transaction());

        handle
            .write(|h| {
                h.create("Counter")?;
                h.cancel_write()
            })
            .unwrap();
        assert_eq!(store.version(), Version(1));
        assert_eq!(handle.objects("Counter").unwrap().count().unwrap(), 1);
    }

    #[test]
    fn test_single_writer_across_handles() {
        let store = test_store();
        let a = store.handle();
        let b = store.handle();

        a.begin_write().unwrap();
        assert!(matches!(a.begin_write(), Err(StoreError::AlreadyInWriteTransaction)));
        assert!(matches!(b.begin_write(), Err(StoreError::WriteConflict)));

        a.commit_write().unwrap();
        b.begin_write().unwrap();
        b.cancel_write().unwrap();
    }

    #[test]
    fn test_write_closure_rolls_back_on_error() {
        let store = test_store();
        let handle = store.handle();

        let result: Result<()> = handle.write(|h| {
            h.create("Counter")?;
            Err(StoreError::InvalidatedObject)
        });
        assert!(result.is_err());
        assert!(!handle.is_in_write_transaction());
        assert_eq!(handle.objects("Counter").unwrap().count().unwrap(), 0);
        assert_eq!(store.version(), Version(0));
    }

    #[test]
    fn test_pinned_reader_until_refresh() {
        let store = test_store();
        let reader = store.handle_with(HandleConfig {
            auto_refresh: false,
        });
        let writer = store.handle();
        let counters = reader.objects("Counter").unwrap();

        writer.write(|h| h.create("Counter").map(|_| ())).unwrap();
        assert_eq!(reader.version(), Version(0));
        assert_eq!(counters.count().unwrap(), 0);

        assert!(reader.refresh());
        assert_eq!(counters.count().unwrap(), 1);
        assert!(!reader.refresh());
    }

    #[test]
    fn test_auto_refresh_reader() {
        let store = test_store();
        let reader = store.handle();
        let writer = store.handle();
        let counters = reader.objects("Counter").unwrap();

        writer.write(|h| h.create("Counter").map(|_| ())).unwrap();
        assert_eq!(counters.count().unwrap(), 1);
        assert_eq!(reader.version(), Version(1));
    }

    #[test]
    fn test_lookup_by_key() {
        let store = test_store();
        let handle = store.handle();
        let key = handle
            .write(|h| {
                let counter = h.create_with("Counter", [("n", Value::Int(4))])?;
                Ok(counter.key())
            })
            .unwrap();

        let counter = handle.object("Counter", key).unwrap().unwrap();
        assert_eq!(counter.get::<i64>("n").unwrap(), 4);
        assert!(handle.object("Counter", RowKey(9999)).unwrap().is_none());
        assert!(matches!(
            handle.object("Nope", key),
            Err(StoreError::UnknownObjectType(_))
        ));
    }
}
