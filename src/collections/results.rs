//! Live collections of every object of one type.

use crate::error::{Result, StoreError};
use crate::store::StoreHandle;
use crate::types::{FromValue, RowKey, TableId};
use std::fmt;

use super::list::List;
use super::object::{convert, Object};
use super::ObjectCollection;

/// All objects of one type, in creation order.
///
/// Evaluated lazily against the owning handle's current view on every call.
#[derive(Clone, Copy)]
pub struct Results<'r> {
    handle: &'r StoreHandle,
    table: TableId,
}

impl<'r> Results<'r> {
    pub(crate) fn new(handle: &'r StoreHandle, table: TableId) -> Self {
        Self { handle, table }
    }

    pub fn object_type(&self) -> &'r str {
        &self.handle.store().object_schema(self.table).name
    }

    pub fn count(&self) -> Result<usize> {
        self.handle
            .with_view(|view, _| Ok(view.table(self.table).map_or(0, |t| t.len())))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.count()? == 0)
    }

    /// Object at `index`, in creation order.
    pub fn get(&self, index: isize) -> Result<Object<'r>> {
        let handle = self.handle;
        handle.with_view(|view, ctx| {
            let len = view.table(self.table).map_or(0, |t| t.len());
            let key = usize::try_from(index)
                .ok()
                .and_then(|i| view.table(self.table)?.key_at(i))
                .ok_or(StoreError::IndexOutOfBounds { index, len })?;
            Ok(Object::at(handle, view, ctx, self.table, key))
        })
    }

    pub fn first(&self) -> Result<Option<Object<'r>>> {
        match self.get(0) {
            Ok(object) => Ok(Some(object)),
            Err(StoreError::IndexOutOfBounds { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Read `property` from every object.
    pub fn project<T: FromValue>(&self, property: &str) -> Result<Vec<T>> {
        let schema = self.handle.store().object_schema(self.table);
        let (idx, prop) = schema.property_or_err(property)?;
        self.handle.with_view(|view, _| {
            let Some(table) = view.table(self.table) else {
                return Ok(Vec::new());
            };
            table
                .keys()
                .map(|key| convert(prop, view.get(self.table, key, idx)?))
                .collect()
        })
    }

    /// The list stored in `property` of every object.
    pub fn lists(&self, property: &str) -> Result<Vec<List<'r>>> {
        self.iter()
            .map(|object| object.and_then(|o| o.list(property)))
            .collect()
    }

    /// Live iterator in creation order.
    pub fn iter(&self) -> ResultsIter<'r> {
        ResultsIter {
            results: *self,
            index: 0,
            done: false,
        }
    }

    /// Delete every object of this type.
    pub fn delete_all(&self) -> Result<()> {
        self.handle.with_txn(|txn, _| txn.clear(self.table).map(|_| ()))?;
        self.handle.bump_epoch();
        Ok(())
    }
}

impl ObjectCollection for Results<'_> {
    fn element_table(&self) -> Option<TableId> {
        Some(self.table)
    }

    fn snapshot_keys(&self) -> Result<Vec<RowKey>> {
        self.handle.with_view(|view, _| {
            Ok(view
                .table(self.table)
                .map(|t| t.keys().collect())
                .unwrap_or_default())
        })
    }
}

impl fmt::Debug for Results<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Results<{}>", self.object_type())
    }
}

impl<'r> IntoIterator for Results<'r> {
    type Item = Result<Object<'r>>;
    type IntoIter = ResultsIter<'r>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator returned by [`Results::iter`].
pub struct ResultsIter<'r> {
    results: Results<'r>,
    index: usize,
    done: bool,
}

impl<'r> Iterator for ResultsIter<'r> {
    type Item = Result<Object<'r>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.results.get(self.index as isize) {
            Ok(object) => {
                self.index += 1;
                Some(Ok(object))
            }
            Err(StoreError::IndexOutOfBounds { .. }) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
