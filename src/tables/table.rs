//! Table and row storage.

use crate::error::{Result, StoreError};
use crate::schema::ObjectSchema;
use crate::types::{RowKey, TableId, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Stored content of one property.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Field {
    Value(Value),
    List(Vec<Value>),
}

/// One object's attribute tuple, in schema property order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub fields: Vec<Field>,
}

impl Row {
    /// A row with every property at its initial value.
    pub fn with_defaults(schema: &ObjectSchema) -> Self {
        let fields = schema
            .properties
            .iter()
            .map(|p| {
                if p.list {
                    Field::List(Vec::new())
                } else {
                    Field::Value(p.initial_value())
                }
            })
            .collect();
        Self { fields }
    }

    /// Drop every reference to `target` from this row.
    ///
    /// Single links become `Null`, list entries are removed. Returns whether
    /// anything changed. `link_fields` lists the field positions that may
    /// point into the target's table.
    pub(crate) fn unlink(&mut self, link_fields: &[usize], target: RowKey) -> bool {
        let mut changed = false;
        for &idx in link_fields {
            match &mut self.fields[idx] {
                Field::Value(v) => {
                    if v.as_link() == Some(target) {
                        *v = Value::Null;
                        changed = true;
                    }
                }
                Field::List(items) => {
                    let before = items.len();
                    items.retain(|v| v.as_link() != Some(target));
                    changed |= items.len() != before;
                }
            }
        }
        changed
    }

    fn references(&self, link_fields: &[usize], target: RowKey) -> bool {
        link_fields.iter().any(|&idx| match &self.fields[idx] {
            Field::Value(v) => v.as_link() == Some(target),
            Field::List(items) => items.iter().any(|v| v.as_link() == Some(target)),
        })
    }
}

/// All rows of one object type.
///
/// Rows are kept behind `Arc` so cloning a table for a write transaction
/// copies pointers, not tuples; a row is copied the first time it is
/// written.
#[derive(Clone, Debug)]
pub struct Table {
    id: TableId,
    schema: Arc<ObjectSchema>,
    rows: BTreeMap<RowKey, Arc<Row>>,
    /// Bumped whenever the table is cleared wholesale.
    generation: u64,
}

impl Table {
    pub fn new(id: TableId, schema: Arc<ObjectSchema>) -> Self {
        Self {
            id,
            schema,
            rows: BTreeMap::new(),
            generation: 0,
        }
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn schema(&self) -> &ObjectSchema {
        &self.schema
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, key: RowKey) -> bool {
        self.rows.contains_key(&key)
    }

    pub fn row(&self, key: RowKey) -> Option<&Row> {
        self.rows.get(&key).map(|r| r.as_ref())
    }

    /// Row keys in ascending order, which is creation order.
    pub fn keys(&self) -> impl Iterator<Item = RowKey> + '_ {
        self.rows.keys().copied()
    }

    /// Key at a position in creation order.
    pub fn key_at(&self, index: usize) -> Option<RowKey> {
        self.rows.keys().nth(index).copied()
    }

    pub fn rows(&self) -> impl Iterator<Item = (RowKey, &Row)> + '_ {
        self.rows.iter().map(|(k, r)| (*k, r.as_ref()))
    }

    pub(crate) fn insert(&mut self, key: RowKey, row: Row) {
        self.rows.insert(key, Arc::new(row));
    }

    pub(crate) fn remove(&mut self, key: RowKey) -> Result<Row> {
        self.rows
            .remove(&key)
            .map(|r| Arc::try_unwrap(r).unwrap_or_else(|shared| (*shared).clone()))
            .ok_or(StoreError::InvalidHandle(key))
    }

    pub(crate) fn row_mut(&mut self, key: RowKey) -> Result<&mut Row> {
        self.rows
            .get_mut(&key)
            .map(Arc::make_mut)
            .ok_or(StoreError::InvalidHandle(key))
    }

    /// Remove every row and start a new generation. Returns the removed keys.
    pub(crate) fn clear(&mut self) -> Vec<RowKey> {
        let keys: Vec<RowKey> = self.rows.keys().copied().collect();
        self.rows.clear();
        self.generation += 1;
        keys
    }

    pub(crate) fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }

    /// Null out or remove links to `target` in every row, copying only the
    /// rows that actually reference it. Returns the keys of changed rows.
    pub(crate) fn unlink_all(&mut self, link_fields: &[usize], target: RowKey) -> Vec<RowKey> {
        if link_fields.is_empty() {
            return Vec::new();
        }
        let mut changed = Vec::new();
        for (key, row) in self.rows.iter_mut() {
            if row.references(link_fields, target) {
                Arc::make_mut(row).unlink(link_fields, target);
                changed.push(*key);
            }
        }
        changed
    }

    /// Whether any row holds a link to `target` in one of `link_fields`.
    pub(crate) fn has_references(&self, link_fields: &[usize], target: RowKey) -> bool {
        !link_fields.is_empty() && self.rows.values().any(|r| r.references(link_fields, target))
    }

    /// Positions of fields that hold links into the table named `target`.
    pub(crate) fn link_fields_to(&self, target: &str) -> Vec<usize> {
        self.schema
            .properties
            .iter()
            .enumerate()
            .filter(|(_, p)| p.link_target() == Some(target))
            .map(|(i, _)| i)
            .collect()
    }
}
