//! Per-transaction record of which rows changed.

use crate::types::{RowKey, TableId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Net changes to one table within a transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableChanges {
    pub inserted: BTreeSet<RowKey>,
    pub modified: BTreeSet<RowKey>,
    pub deleted: BTreeSet<RowKey>,
    /// The table was cleared (generation bumped) at least once.
    pub cleared: bool,
}

impl TableChanges {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.modified.is_empty() && self.deleted.is_empty() && !self.cleared
    }
}

/// Net row changes of a transaction, keyed by table.
///
/// A row inserted and then deleted in the same transaction leaves no trace;
/// a row inserted and then modified is only reported as inserted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeSet {
    tables: BTreeMap<TableId, TableChanges>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.values().all(TableChanges::is_empty)
    }

    pub fn table(&self, id: TableId) -> Option<&TableChanges> {
        self.tables.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (TableId, &TableChanges)> + '_ {
        self.tables
            .iter()
            .filter(|(_, c)| !c.is_empty())
            .map(|(id, c)| (*id, c))
    }

    pub(crate) fn record_insert(&mut self, table: TableId, key: RowKey) {
        self.tables.entry(table).or_default().inserted.insert(key);
    }

    pub(crate) fn record_modify(&mut self, table: TableId, key: RowKey) {
        let changes = self.tables.entry(table).or_default();
        if !changes.inserted.contains(&key) {
            changes.modified.insert(key);
        }
    }

    pub(crate) fn record_delete(&mut self, table: TableId, key: RowKey) {
        let changes = self.tables.entry(table).or_default();
        changes.modified.remove(&key);
        if !changes.inserted.remove(&key) {
            changes.deleted.insert(key);
        }
    }

    pub(crate) fn record_clear(&mut self, table: TableId, keys: &[RowKey]) {
        for &key in keys {
            self.record_delete(table, key);
        }
        self.tables.entry(table).or_default().cleared = true;
    }
}
