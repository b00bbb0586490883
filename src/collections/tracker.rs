//! Change tokens and lazy invalidation.

use crate::snapshot::ReadView;
use crate::types::{RowKey, TableId};
use std::cell::Cell;

/// When a handle was last known to be valid.
///
/// `epoch` is the owning handle's structural change counter and
/// `table_generation` the generation of the row's table at that time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChangeToken {
    pub epoch: u64,
    pub table_generation: u64,
}

/// Per-handle validity cache.
///
/// A matching epoch means nothing structural happened since the last check,
/// so the row is trusted without a lookup. Otherwise the row is looked up
/// again. A row missing from a committed view latches the tracker: the
/// handle stays invalidated even if the key shows up again later. Inside a
/// write transaction a missing row is only reported, because rolling back
/// can bring it back.
#[derive(Debug, Clone)]
pub(crate) struct Tracker {
    token: Cell<ChangeToken>,
    invalidated: Cell<bool>,
}

impl Tracker {
    pub(crate) fn new(token: ChangeToken) -> Self {
        Self {
            token: Cell::new(token),
            invalidated: Cell::new(false),
        }
    }

    pub(crate) fn token(&self) -> ChangeToken {
        self.token.get()
    }

    /// Validate against `view`, refreshing the token on success.
    pub(crate) fn check(
        &self,
        epoch: u64,
        view: &dyn ReadView,
        committed: bool,
        table: TableId,
        key: RowKey,
    ) -> bool {
        if self.invalidated.get() {
            return false;
        }
        let token = self.token.get();
        if token.epoch == epoch {
            return true;
        }

        if Self::resolves(token, view, table, key) {
            self.token.set(ChangeToken { epoch, ..token });
            true
        } else {
            if committed {
                self.invalidated.set(true);
            }
            false
        }
    }

    /// Same answer as [`check`](Self::check) without updating anything.
    pub(crate) fn peek(&self, epoch: u64, view: &dyn ReadView, table: TableId, key: RowKey) -> bool {
        if self.invalidated.get() {
            return false;
        }
        let token = self.token.get();
        token.epoch == epoch || Self::resolves(token, view, table, key)
    }

    fn resolves(token: ChangeToken, view: &dyn ReadView, table: TableId, key: RowKey) -> bool {
        view.table(table)
            .map_or(false, |t| t.generation() == token.table_generation && t.contains(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ObjectSchema, Property, PropertyType, Schema};
    use crate::snapshot::VersionedStore;

    const ITEMS: TableId = TableId(0);

    fn test_store() -> VersionedStore {
        VersionedStore::new(&Schema::new(vec![ObjectSchema::new(
            "Item",
            vec![Property::new("n", PropertyType::Int)],
        )]))
    }

    fn token(epoch: u64) -> ChangeToken {
        ChangeToken {
            epoch,
            table_generation: 0,
        }
    }

    #[test]
    fn test_matching_epoch_skips_lookup() {
        let store = test_store();
        let tracker = Tracker::new(token(3));

        // The key does not exist, but the epoch says nothing changed.
        assert!(tracker.check(3, store.begin_read().as_ref(), true, ITEMS, RowKey(42)));
    }

    #[test]
    fn test_missing_row_latches_in_committed_view() {
        let store = test_store();
        let mut txn = store.begin_write().unwrap();
        let key = txn.create(ITEMS, vec![]).unwrap();
        store.commit(txn).unwrap();

        let tracker = Tracker::new(token(0));
        assert!(tracker.check(1, store.begin_read().as_ref(), true, ITEMS, key));
        assert_eq!(tracker.token().epoch, 1);

        let mut txn = store.begin_write().unwrap();
        txn.delete(ITEMS, key).unwrap();
        store.commit(txn).unwrap();

        assert!(!tracker.check(2, store.begin_read().as_ref(), true, ITEMS, key));
        // Latched, whatever the epoch says
        assert!(!tracker.check(1, store.begin_read().as_ref(), true, ITEMS, key));
    }

    #[test]
    fn test_missing_row_in_write_does_not_latch() {
        let store = test_store();
        let mut txn = store.begin_write().unwrap();
        let key = txn.create(ITEMS, vec![]).unwrap();
        store.commit(txn).unwrap();

        let tracker = Tracker::new(token(0));
        let mut txn = store.begin_write().unwrap();
        txn.delete(ITEMS, key).unwrap();
        assert!(!tracker.check(1, &txn, false, ITEMS, key));
        store.rollback(txn);

        assert!(tracker.check(2, store.begin_read().as_ref(), true, ITEMS, key));
    }

    #[test]
    fn test_generation_change_invalidates() {
        let store = test_store();
        let mut txn = store.begin_write().unwrap();
        let key = txn.create(ITEMS, vec![]).unwrap();
        store.commit(txn).unwrap();

        let tracker = Tracker::new(token(0));
        let mut txn = store.begin_write().unwrap();
        txn.clear(ITEMS).unwrap();
        store.commit(txn).unwrap();

        let view = store.begin_read();
        assert!(!tracker.peek(1, view.as_ref(), ITEMS, key));
        assert!(!tracker.check(1, view.as_ref(), true, ITEMS, key));
    }

    #[test]
    fn test_peek_is_pure() {
        let store = test_store();
        let tracker = Tracker::new(token(0));

        assert!(!tracker.peek(1, store.begin_read().as_ref(), ITEMS, RowKey(1)));
        // Not latched by peek
        assert!(tracker.peek(0, store.begin_read().as_ref(), ITEMS, RowKey(1)));
    }
}
