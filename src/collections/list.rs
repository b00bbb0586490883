//! Ordered list properties.

use crate::error::{Result, StoreError};
use crate::snapshot::ReadView;
use crate::store::ViewContext;
use crate::types::{FromValue, RowKey, TableId, Value};
use std::fmt;
use std::ops::Range;

use super::object::{convert, Object};
use super::operations::ListOp;
use super::ObjectCollection;

/// A live handle to one list property of one object.
///
/// Valid exactly as long as its parent object is. Every call re-reads the
/// list from the owning handle's current transaction, and every mutation is
/// checked in full before anything changes.
#[derive(Clone)]
pub struct List<'r> {
    parent: Object<'r>,
    property: usize,
    element_table: Option<TableId>,
}

impl<'r> List<'r> {
    pub(crate) fn new(parent: Object<'r>, property: usize, element_table: Option<TableId>) -> Self {
        Self {
            parent,
            property,
            element_table,
        }
    }

    /// Object that owns the list.
    pub fn parent(&self) -> &Object<'r> {
        &self.parent
    }

    pub fn property_name(&self) -> &'r str {
        &self.parent.schema().properties[self.property].name
    }

    /// Whether the parent object is gone.
    pub fn is_invalidated(&self) -> bool {
        self.parent.is_invalidated()
    }

    fn read<T>(&self, f: impl FnOnce(&dyn ReadView, ViewContext, &[Value]) -> Result<T>) -> Result<T> {
        let (table, key) = (self.parent.table_id(), self.parent.key());
        self.parent.read(|view, ctx| {
            let items = view.list(table, key, self.property)?;
            f(view, ctx, items)
        })
    }

    fn apply(&self, op: ListOp) -> Result<()> {
        let (table, key) = (self.parent.table_id(), self.parent.key());
        self.parent
            .write(|txn| txn.apply_list_op(table, key, self.property, op))
            .map(|_| ())
    }

    pub fn count(&self) -> Result<usize> {
        self.read(|_, _, items| Ok(items.len()))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.count()? == 0)
    }

    /// Element at `index`.
    pub fn get(&self, index: isize) -> Result<Value> {
        self.read(|_, _, items| element(items, index).cloned())
    }

    /// Linked object at `index`.
    pub fn get_object(&self, index: isize) -> Result<Object<'r>> {
        let handle = self.parent.handle();
        let target = self.object_table()?;
        self.read(|view, ctx, items| {
            let key = link_at(items, index)?;
            Ok(Object::at(handle, view, ctx, target, key))
        })
    }

    pub fn first(&self) -> Result<Option<Value>> {
        self.read(|_, _, items| Ok(items.first().cloned()))
    }

    pub fn last(&self) -> Result<Option<Value>> {
        self.read(|_, _, items| Ok(items.last().cloned()))
    }

    /// Position of the first element linking to `object`.
    pub fn index_of(&self, object: &Object<'_>) -> Result<Option<usize>> {
        let needle = Value::Link(object.key());
        self.read(|_, _, items| Ok(items.iter().position(|v| *v == needle)))
    }

    pub fn contains(&self, value: &Value) -> Result<bool> {
        self.read(|_, _, items| Ok(items.contains(value)))
    }

    /// Copy of the current elements.
    pub fn to_vec(&self) -> Result<Vec<Value>> {
        self.read(|_, _, items| Ok(items.to_vec()))
    }

    /// Read `property` from every linked object, in list order.
    pub fn project<T: FromValue>(&self, property: &str) -> Result<Vec<T>> {
        let target = self.object_table()?;
        let schema = self.parent.handle().store().object_schema(target);
        let (idx, prop) = schema.property_or_err(property)?;
        self.read(|view, _, items| {
            items
                .iter()
                .filter_map(Value::as_link)
                .map(|key| convert(prop, view.get(target, key, idx)?))
                .collect()
        })
    }

    pub fn append(&self, value: impl Into<Value>) -> Result<()> {
        self.apply(ListOp::Append(vec![value.into()]))
    }

    /// Append several values, keeping their order.
    pub fn append_all<I, V>(&self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.apply(ListOp::Append(values.into_iter().map(Into::into).collect()))
    }

    /// Append every object of `source`.
    ///
    /// The source is read in full first, so appending a list to itself
    /// doubles it once.
    pub fn append_objects_in(&self, source: &dyn ObjectCollection) -> Result<()> {
        let expected = self.object_table()?;
        let got = source.element_table();
        if got != Some(expected) {
            let store = self.parent.handle().store();
            return Err(StoreError::TypeMismatch {
                property: self.property_name().to_string(),
                expected: store.object_schema(expected).name.clone(),
                got: got.map_or_else(
                    || "primitive".to_string(),
                    |t| store.object_schema(t).name.clone(),
                ),
            });
        }
        let keys = source.snapshot_keys()?;
        self.apply(ListOp::Append(keys.into_iter().map(Value::Link).collect()))
    }

    /// Insert `value` so that it ends up at `index` (`0..=count`).
    pub fn insert(&self, value: impl Into<Value>, index: isize) -> Result<()> {
        self.apply(ListOp::Insert {
            index,
            values: vec![value.into()],
        })
    }

    /// Overwrite the element at `index`.
    pub fn replace(&self, index: isize, value: impl Into<Value>) -> Result<()> {
        self.apply(ListOp::Set {
            index,
            value: value.into(),
        })
    }

    pub fn remove(&self, index: isize) -> Result<()> {
        self.apply(ListOp::Remove { index })
    }

    /// Remove the last element, if any.
    pub fn remove_last(&self) -> Result<()> {
        self.apply(ListOp::RemoveLast)
    }

    pub fn remove_all(&self) -> Result<()> {
        self.apply(ListOp::RemoveAll)
    }

    /// Move the element at `from` so that it ends up at `to`.
    pub fn move_item(&self, from: isize, to: isize) -> Result<()> {
        self.apply(ListOp::Move { from, to })
    }

    pub fn swap(&self, a: isize, b: isize) -> Result<()> {
        self.apply(ListOp::Swap { a, b })
    }

    /// Replace `range` with `values` in one step.
    pub fn replace_range<I, V>(&self, range: Range<isize>, values: I) -> Result<()>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.apply(ListOp::ReplaceRange {
            start: range.start,
            end: range.end,
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    /// Live iterator over elements.
    ///
    /// Each step reads the list again, so elements appended while iterating
    /// are visited too.
    pub fn iter(&self) -> ListIter<'_, 'r> {
        ListIter {
            list: self,
            index: 0,
            done: false,
        }
    }

    /// Live iterator over linked objects.
    pub fn objects(&self) -> ObjectIter<'_, 'r> {
        ObjectIter {
            list: self,
            index: 0,
            done: false,
        }
    }

    /// Iterator over the elements as they are now.
    pub fn snapshot_iter(&self) -> Result<std::vec::IntoIter<Value>> {
        Ok(self.to_vec()?.into_iter())
    }

    /// Linked object at `index`, or `None` past the end, read in one access.
    fn object_at(&self, index: usize) -> Result<Option<Object<'r>>> {
        let handle = self.parent.handle();
        let target = self.object_table()?;
        self.read(|view, ctx, items| {
            if index >= items.len() {
                return Ok(None);
            }
            let key = link_at(items, index as isize)?;
            Ok(Some(Object::at(handle, view, ctx, target, key)))
        })
    }

    fn object_table(&self) -> Result<TableId> {
        self.element_table.ok_or_else(|| {
            let prop = &self.parent.schema().properties[self.property];
            StoreError::TypeMismatch {
                property: prop.name.clone(),
                expected: "object".into(),
                got: prop.ty.name(),
            }
        })
    }
}

fn element(items: &[Value], index: isize) -> Result<&Value> {
    usize::try_from(index)
        .ok()
        .and_then(|i| items.get(i))
        .ok_or(StoreError::IndexOutOfBounds {
            index,
            len: items.len(),
        })
}

fn link_at(items: &[Value], index: isize) -> Result<RowKey> {
    let value = element(items, index)?;
    value.as_link().ok_or_else(|| StoreError::TypeMismatch {
        property: format!("[{}]", index),
        expected: "object".into(),
        got: value.kind_name().into(),
    })
}

impl ObjectCollection for List<'_> {
    fn element_table(&self) -> Option<TableId> {
        self.element_table
    }

    fn snapshot_keys(&self) -> Result<Vec<RowKey>> {
        self.read(|_, _, items| Ok(items.iter().filter_map(Value::as_link).collect()))
    }
}

impl fmt::Debug for List<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("List")
            .field("parent", &self.parent)
            .field("property", &self.property_name())
            .finish()
    }
}

impl<'a, 'r> IntoIterator for &'a List<'r> {
    type Item = Result<Value>;
    type IntoIter = ListIter<'a, 'r>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Live iterator returned by [`List::iter`].
///
/// Yields an error once if the list becomes invalid, then stops.
pub struct ListIter<'a, 'r> {
    list: &'a List<'r>,
    index: usize,
    done: bool,
}

impl Iterator for ListIter<'_, '_> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let index = self.index;
        match self.list.read(|_, _, items| Ok(items.get(index).cloned())) {
            Ok(Some(value)) => {
                self.index += 1;
                Some(Ok(value))
            }
            Ok(None) => {
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

/// Live iterator returned by [`List::objects`].
pub struct ObjectIter<'a, 'r> {
    list: &'a List<'r>,
    index: usize,
    done: bool,
}

impl<'r> Iterator for ObjectIter<'_, 'r> {
    type Item = Result<Object<'r>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let index = self.index;
        match self.list.object_at(index) {
            Ok(Some(object)) => {
                self.index += 1;
                Some(Ok(object))
            }
            Ok(None) => {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ObjectSchema, Property, PropertyType, Schema};
    use crate::store::{Store, StoreHandle};
    use std::sync::Arc;

    fn test_store() -> Arc<Store> {
        let schema = Schema::new(vec![
            ObjectSchema::new(
                "StringObject",
                vec![Property::new("stringCol", PropertyType::String)],
            ),
            ObjectSchema::new(
                "ArrayObject",
                vec![
                    Property::list("array", PropertyType::Object("StringObject".into())),
                    Property::list("ints", PropertyType::Int),
                ],
            ),
        ]);
        Arc::new(Store::in_memory(schema).unwrap())
    }

    fn strings<'r>(handle: &'r StoreHandle, values: &[&str]) -> Vec<Object<'r>> {
        values
            .iter()
            .map(|s| {
                handle
                    .create_with("StringObject", [("stringCol", Value::from(*s))])
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_append_and_read() {
        let store = test_store();
        let handle = store.handle();
        handle.begin_write().unwrap();

        let parent = handle.create("ArrayObject").unwrap();
        let list = parent.list("array").unwrap();
        let objs = strings(&handle, &["1", "2"]);

        list.append(&objs[0]).unwrap();
        list.append_all(&objs).unwrap();
        assert_eq!(list.count().unwrap(), 3);
        assert_eq!(list.project::<String>("stringCol").unwrap(), ["1", "1", "2"]);
        assert_eq!(list.get_object(2).unwrap(), objs[1]);
        assert_eq!(list.index_of(&objs[1]).unwrap(), Some(2));
        handle.commit_write().unwrap();
    }

    #[test]
    fn test_negative_index_rejected() {
        let store = test_store();
        let handle = store.handle();
        handle.begin_write().unwrap();

        let list = handle.create("ArrayObject").unwrap().list("ints").unwrap();
        list.append_all([1, 2, 3]).unwrap();

        assert!(matches!(
            list.get(-1),
            Err(StoreError::IndexOutOfBounds { index: -1, len: 3 })
        ));
        assert!(matches!(list.remove(-1), Err(StoreError::IndexOutOfBounds { .. })));
        assert!(matches!(list.insert(4, -1), Err(StoreError::IndexOutOfBounds { .. })));
        assert_eq!(list.to_vec().unwrap(), vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        handle.commit_write().unwrap();
    }

    #[test]
    fn test_primitive_list_has_no_objects() {
        let store = test_store();
        let handle = store.handle();
        handle.begin_write().unwrap();

        let list = handle.create("ArrayObject").unwrap().list("ints").unwrap();
        list.append(7).unwrap();
        assert!(matches!(list.get_object(0), Err(StoreError::TypeMismatch { .. })));
        assert!(matches!(list.append("x"), Err(StoreError::TypeMismatch { .. })));
        handle.commit_write().unwrap();
    }

    #[test]
    fn test_live_iteration_sees_appends() {
        let store = test_store();
        let handle = store.handle();
        handle.begin_write().unwrap();

        let list = handle.create("ArrayObject").unwrap().list("ints").unwrap();
        list.append_all([1, 2]).unwrap();

        let mut visited = 0;
        for value in &list {
            value.unwrap();
            visited += 1;
            if list.count().unwrap() < 6 {
                list.append(0).unwrap();
            }
        }
        assert_eq!(visited, 6);

        let frozen: Vec<Value> = list.snapshot_iter().unwrap().collect();
        for _ in &frozen {
            list.append(0).unwrap();
        }
        assert_eq!(list.count().unwrap(), 12);
        handle.commit_write().unwrap();
    }

    #[test]
    fn test_self_append_doubles_once() {
        let store = test_store();
        let handle = store.handle();
        handle.begin_write().unwrap();

        let list = handle.create("ArrayObject").unwrap().list("array").unwrap();
        list.append_all(&strings(&handle, &["1", "2"])).unwrap();
        list.append_objects_in(&list).unwrap();
        assert_eq!(list.project::<String>("stringCol").unwrap(), ["1", "2", "1", "2"]);
        handle.commit_write().unwrap();
    }

    #[test]
    fn test_iterator_stops_on_invalidation() {
        let store = test_store();
        let handle = store.handle();
        handle.begin_write().unwrap();

        let parent = handle.create("ArrayObject").unwrap();
        let list = parent.list("ints").unwrap();
        list.append_all([1, 2, 3]).unwrap();

        let mut iter = list.iter();
        assert_eq!(iter.next().unwrap().unwrap(), Value::Int(1));
        parent.delete().unwrap();
        assert!(matches!(iter.next(), Some(Err(StoreError::InvalidatedObject))));
        assert!(iter.next().is_none());
        handle.commit_write().unwrap();
    }
}
