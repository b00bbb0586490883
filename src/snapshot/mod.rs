//! Versioned, copy-on-write snapshots.
//!
//! A [`Snapshot`] is an immutable view of every table at one committed
//! [`Version`](crate::Version). Write transactions clone the table directory
//! (a vector of `Arc<Table>`), copy a table on its first write and a row on
//! its first write, and publish the result as the next snapshot on commit.
//! Readers keep whatever snapshot they pinned for as long as they hold it.

mod changes;
mod transaction;
mod versioned;

pub use changes::{ChangeSet, TableChanges};
pub use transaction::WriteTransaction;
pub use versioned::VersionedStore;

use crate::error::{Result, StoreError};
use crate::tables::{Field, Row, Table};
use crate::types::{RowKey, TableId, Value, Version};
use std::sync::Arc;

/// Read access shared by committed snapshots and in-flight write
/// transactions.
pub trait ReadView {
    /// Version this view is based on.
    fn version(&self) -> Version;

    /// Table directory, indexed by [`TableId`].
    fn tables(&self) -> &[Arc<Table>];

    fn table(&self, id: TableId) -> Option<&Table> {
        self.tables().get(id.index()).map(|t| t.as_ref())
    }

    /// Whether `key` is a live row of `table`.
    fn is_live(&self, table: TableId, key: RowKey) -> bool {
        self.table(table).map_or(false, |t| t.contains(key))
    }

    fn row(&self, table: TableId, key: RowKey) -> Result<&Row> {
        self.table(table)
            .and_then(|t| t.row(key))
            .ok_or(StoreError::InvalidHandle(key))
    }

    /// Stored field at position `property` of a row.
    fn field(&self, table: TableId, key: RowKey, property: usize) -> Result<&Field> {
        self.row(table, key)?
            .fields
            .get(property)
            .ok_or_else(|| StoreError::UnknownProperty {
                object_type: self.table(table).map(|t| t.name().to_string()).unwrap_or_default(),
                property: format!("#{}", property),
            })
    }

    /// Read a scalar property.
    fn get(&self, table: TableId, key: RowKey, property: usize) -> Result<Value> {
        match self.field(table, key, property)? {
            Field::Value(v) => Ok(v.clone()),
            Field::List(_) => Err(StoreError::NotAList(self.property_name(table, property))),
        }
    }

    /// Read a list property.
    fn list(&self, table: TableId, key: RowKey, property: usize) -> Result<&[Value]> {
        match self.field(table, key, property)? {
            Field::List(items) => Ok(items),
            Field::Value(_) => Err(StoreError::NotAList(self.property_name(table, property))),
        }
    }

    #[doc(hidden)]
    fn property_name(&self, table: TableId, property: usize) -> String {
        self.table(table)
            .and_then(|t| t.schema().properties.get(property))
            .map(|p| p.name.clone())
            .unwrap_or_default()
    }
}

/// Immutable view of the store at one committed version.
#[derive(Debug)]
pub struct Snapshot {
    version: Version,
    tables: Vec<Arc<Table>>,
}

impl Snapshot {
    pub(crate) fn new(version: Version, tables: Vec<Arc<Table>>) -> Self {
        Self { version, tables }
    }

    /// Total live rows across all tables.
    pub fn object_count(&self) -> u64 {
        self.tables.iter().map(|t| t.len() as u64).sum()
    }
}

impl ReadView for Snapshot {
    fn version(&self) -> Version {
        self.version
    }

    fn tables(&self) -> &[Arc<Table>] {
        &self.tables
    }
}
