//! Write transactions over a private copy of the table directory.

use crate::collections::{apply_list_op, ListOp};
use crate::error::{Result, StoreError};
use crate::schema::Property;
use crate::tables::{Field, Row, Table};
use crate::types::{RowKey, TableId, Value, Version};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::changes::ChangeSet;
use super::versioned::WriterPermit;
use super::{ReadView, Snapshot};

/// An exclusive, uncommitted set of mutations.
///
/// Holds the store's writer permit for its whole lifetime. Dropping it
/// without committing discards every mutation.
pub struct WriteTransaction {
    base: Arc<Snapshot>,
    tables: Vec<Arc<Table>>,
    changes: ChangeSet,
    keys: Arc<AtomicU64>,
    _permit: WriterPermit,
}

impl WriteTransaction {
    pub(crate) fn new(base: Arc<Snapshot>, keys: Arc<AtomicU64>, permit: WriterPermit) -> Self {
        let tables = base.tables().to_vec();
        Self {
            base,
            tables,
            changes: ChangeSet::new(),
            keys,
            _permit: permit,
        }
    }

    /// Version of the snapshot this transaction started from.
    pub fn base_version(&self) -> Version {
        self.base.version()
    }

    /// Net changes made so far.
    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    pub(crate) fn into_parts(self) -> (Arc<Snapshot>, Vec<Arc<Table>>, ChangeSet, WriterPermit) {
        (self.base, self.tables, self.changes, self._permit)
    }

    fn table_ref(&self, id: TableId) -> Result<&Table> {
        self.table(id)
            .ok_or_else(|| StoreError::UnknownObjectType(format!("{:?}", id)))
    }

    fn table_mut(&mut self, id: TableId) -> Result<&mut Table> {
        self.tables
            .get_mut(id.index())
            .map(Arc::make_mut)
            .ok_or_else(|| StoreError::UnknownObjectType(format!("{:?}", id)))
    }

    fn table_by_name(&self, name: &str) -> Option<&Table> {
        self.tables.iter().map(|t| t.as_ref()).find(|t| t.name() == name)
    }

    /// Check that a link value points at a live row of the right type.
    fn check_link(&self, prop: &Property, value: &Value) -> Result<()> {
        let (Some(target), Value::Link(key)) = (prop.link_target(), value) else {
            return Ok(());
        };
        if self.table_by_name(target).map_or(false, |t| t.contains(*key)) {
            return Ok(());
        }
        match self.tables.iter().find(|t| t.contains(*key)) {
            Some(other) => Err(StoreError::TypeMismatch {
                property: prop.name.clone(),
                expected: target.to_string(),
                got: other.name().to_string(),
            }),
            None => Err(StoreError::InvalidatedObject),
        }
    }

    /// Create a row with schema defaults, overridden by `values`.
    pub fn create(&mut self, table: TableId, values: Vec<(usize, Value)>) -> Result<RowKey> {
        let schema = self.table_ref(table)?.schema();
        let mut row = Row::with_defaults(schema);

        for (idx, value) in values {
            let prop = schema.properties.get(idx).ok_or_else(|| StoreError::UnknownProperty {
                object_type: schema.name.clone(),
                property: format!("#{}", idx),
            })?;
            if prop.list {
                return Err(StoreError::TypeMismatch {
                    property: prop.name.clone(),
                    expected: "list".into(),
                    got: value.kind_name().into(),
                });
            }
            prop.check(&value)?;
            self.check_link(prop, &value)?;
            row.fields[idx] = Field::Value(value);
        }

        let key = RowKey(self.keys.fetch_add(1, Ordering::SeqCst));
        self.table_mut(table)?.insert(key, row);
        self.changes.record_insert(table, key);
        Ok(key)
    }

    /// Delete a row and remove every link pointing at it.
    pub fn delete(&mut self, table: TableId, key: RowKey) -> Result<()> {
        self.table_mut(table)?.remove(key)?;
        self.changes.record_delete(table, key);

        let name = self.table_ref(table)?.name().to_string();
        self.unlink_everywhere(&name, key);
        Ok(())
    }

    /// Delete every row of a table and start a new table generation.
    pub fn clear(&mut self, table: TableId) -> Result<Vec<RowKey>> {
        let removed = self.table_mut(table)?.clear();
        self.changes.record_clear(table, &removed);

        let name = self.table_ref(table)?.name().to_string();
        for &key in &removed {
            self.unlink_everywhere(&name, key);
        }
        Ok(removed)
    }

    fn unlink_everywhere(&mut self, target_table: &str, key: RowKey) {
        for i in 0..self.tables.len() {
            let fields = self.tables[i].link_fields_to(target_table);
            if !self.tables[i].has_references(&fields, key) {
                continue;
            }
            let table = Arc::make_mut(&mut self.tables[i]);
            let id = table.id();
            for changed in table.unlink_all(&fields, key) {
                self.changes.record_modify(id, changed);
            }
        }
    }

    /// Write a scalar property.
    pub fn set(&mut self, table: TableId, key: RowKey, property: usize, value: Value) -> Result<()> {
        let prop = self
            .table_ref(table)?
            .schema()
            .properties
            .get(property)
            .cloned()
            .ok_or_else(|| StoreError::UnknownProperty {
                object_type: format!("{:?}", table),
                property: format!("#{}", property),
            })?;
        if prop.list {
            return Err(StoreError::TypeMismatch {
                property: prop.name,
                expected: "list".into(),
                got: value.kind_name().into(),
            });
        }
        prop.check(&value)?;
        self.check_link(&prop, &value)?;

        let row = self.table_mut(table)?.row_mut(key)?;
        row.fields[property] = Field::Value(value);
        self.changes.record_modify(table, key);
        Ok(())
    }

    /// Apply a list mutation. Returns whether the list changed.
    ///
    /// New elements are type checked and links resolved before the list is
    /// touched, so a failure leaves it as it was.
    pub fn apply_list_op(
        &mut self,
        table: TableId,
        key: RowKey,
        property: usize,
        op: ListOp,
    ) -> Result<bool> {
        if !self.is_live(table, key) {
            return Err(StoreError::InvalidatedObject);
        }
        let prop = self
            .table_ref(table)?
            .schema()
            .properties
            .get(property)
            .cloned()
            .ok_or_else(|| StoreError::UnknownProperty {
                object_type: format!("{:?}", table),
                property: format!("#{}", property),
            })?;
        if !prop.list {
            return Err(StoreError::NotAList(prop.name));
        }
        for value in op.new_values() {
            prop.check(value)?;
            self.check_link(&prop, value)?;
        }

        let row = self.table_mut(table)?.row_mut(key)?;
        let changed = match &mut row.fields[property] {
            Field::List(items) => apply_list_op(items, op)?,
            Field::Value(_) => return Err(StoreError::NotAList(prop.name)),
        };
        if changed {
            self.changes.record_modify(table, key);
        }
        Ok(changed)
    }
}

impl ReadView for WriteTransaction {
    fn version(&self) -> Version {
        self.base.version()
    }

    fn tables(&self) -> &[Arc<Table>] {
        &self.tables
    }
}
