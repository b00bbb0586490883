//! Handles onto single stored objects.

use crate::error::{Result, StoreError};
use crate::schema::{ObjectSchema, Property};
use crate::snapshot::{ReadView, WriteTransaction};
use crate::store::{StoreHandle, ViewContext};
use crate::tables::Field;
use crate::types::{FromValue, RowKey, TableId, Value};
use std::fmt;

use super::list::List;
use super::tracker::{ChangeToken, Tracker};

/// A live handle to one row.
///
/// Reads and writes go through the owning [`StoreHandle`], so they always
/// observe its current transaction. Once the row has been seen deleted in a
/// committed view the handle reports [`StoreError::InvalidatedObject`] for
/// good.
#[derive(Clone)]
pub struct Object<'r> {
    handle: &'r StoreHandle,
    table: TableId,
    key: RowKey,
    tracker: Tracker,
}

impl<'r> Object<'r> {
    /// Handle to a row known to be live in `view`.
    pub(crate) fn at(
        handle: &'r StoreHandle,
        view: &dyn ReadView,
        ctx: ViewContext,
        table: TableId,
        key: RowKey,
    ) -> Self {
        let table_generation = view.table(table).map_or(0, |t| t.generation());
        Self {
            handle,
            table,
            key,
            tracker: Tracker::new(ChangeToken {
                epoch: ctx.epoch,
                table_generation,
            }),
        }
    }

    pub fn key(&self) -> RowKey {
        self.key
    }

    pub fn table_id(&self) -> TableId {
        self.table
    }

    /// Name of the object's type.
    pub fn object_type(&self) -> &'r str {
        &self.schema().name
    }

    pub fn schema(&self) -> &'r ObjectSchema {
        self.handle.store().object_schema(self.table)
    }

    pub(crate) fn handle(&self) -> &'r StoreHandle {
        self.handle
    }

    /// Token recorded the last time the handle was found valid.
    pub fn change_token(&self) -> ChangeToken {
        self.tracker.token()
    }

    /// Whether the row is gone from the handle's current view.
    ///
    /// Does not refresh the handle or change its state.
    pub fn is_invalidated(&self) -> bool {
        self.handle
            .peek_view(|view, ctx| Ok(!self.tracker.peek(ctx.epoch, view, self.table, self.key)))
            .unwrap_or(true)
    }

    /// Whether both handles refer to the same row.
    pub fn is_same_object(&self, other: &Object<'_>) -> bool {
        self.table == other.table && self.key == other.key
    }

    fn ensure_valid(&self, view: &dyn ReadView, ctx: ViewContext) -> Result<()> {
        if self
            .tracker
            .check(ctx.epoch, view, ctx.committed, self.table, self.key)
        {
            Ok(())
        } else {
            Err(StoreError::InvalidatedObject)
        }
    }

    /// Run `f` against the current view after validating the handle.
    pub(crate) fn read<T>(&self, f: impl FnOnce(&dyn ReadView, ViewContext) -> Result<T>) -> Result<T> {
        self.handle.with_view(|view, ctx| {
            self.ensure_valid(view, ctx)?;
            f(view, ctx)
        })
    }

    /// Run `f` against the open write transaction after validating the handle.
    pub(crate) fn write<T>(&self, f: impl FnOnce(&mut WriteTransaction) -> Result<T>) -> Result<T> {
        self.handle.with_txn(|txn, ctx| {
            self.ensure_valid(&*txn, ctx)?;
            f(txn)
        })
    }

    pub(crate) fn property(&self, name: &str) -> Result<(usize, &'r Property)> {
        self.schema().property_or_err(name)
    }

    /// Read a scalar property as `T`.
    pub fn get<T: FromValue>(&self, property: &str) -> Result<T> {
        let (idx, prop) = self.property(property)?;
        let value = self.read(|view, _| view.get(self.table, self.key, idx))?;
        convert(prop, value)
    }

    /// Read a scalar property without conversion.
    pub fn get_value(&self, property: &str) -> Result<Value> {
        self.get::<Value>(property)
    }

    /// Write a scalar property. Requires a write transaction.
    pub fn set(&self, property: &str, value: impl Into<Value>) -> Result<()> {
        let (idx, _) = self.property(property)?;
        let value = value.into();
        self.write(|txn| txn.set(self.table, self.key, idx, value))
    }

    /// Follow a single link property.
    pub fn link(&self, property: &str) -> Result<Option<Object<'r>>> {
        let (idx, prop) = self.property(property)?;
        let target = match prop.link_target() {
            Some(target) if !prop.list => self.handle.store().table_id(target)?,
            _ => {
                return Err(StoreError::TypeMismatch {
                    property: prop.name.clone(),
                    expected: "object".into(),
                    got: prop.ty.name(),
                })
            }
        };

        let handle = self.handle;
        self.read(|view, ctx| match view.get(self.table, self.key, idx)? {
            Value::Link(key) => Ok(Some(Object::at(handle, view, ctx, target, key))),
            _ => Ok(None),
        })
    }

    /// The list stored in a list property.
    pub fn list(&self, property: &str) -> Result<List<'r>> {
        let (idx, prop) = self.property(property)?;
        if !prop.list {
            return Err(StoreError::NotAList(prop.name.clone()));
        }
        let element_table = match prop.link_target() {
            Some(target) => Some(self.handle.store().table_id(target)?),
            None => None,
        };
        self.read(|_, _| Ok(()))?;
        Ok(List::new(self.clone(), idx, element_table))
    }

    /// Delete the row, removing it from every list and link that holds it.
    ///
    /// Fails with [`StoreError::InvalidHandle`] if it is already gone.
    pub fn delete(&self) -> Result<()> {
        self.handle.with_txn(|txn, _| txn.delete(self.table, self.key))?;
        self.handle.bump_epoch();
        Ok(())
    }

    /// Every property as JSON. Links render as `{"$link": key}`.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        let schema = self.schema();
        self.read(|view, _| {
            let row = view.row(self.table, self.key)?;
            let mut map = serde_json::Map::new();
            for (prop, field) in schema.properties.iter().zip(&row.fields) {
                let json = match field {
                    Field::Value(v) => v.to_json(),
                    Field::List(items) => {
                        serde_json::Value::Array(items.iter().map(Value::to_json).collect())
                    }
                };
                map.insert(prop.name.clone(), json);
            }
            Ok(serde_json::Value::Object(map))
        })
    }
}

pub(crate) fn convert<T: FromValue>(prop: &Property, value: Value) -> Result<T> {
    let got = value.kind_name();
    T::from_value(value).ok_or_else(|| StoreError::TypeMismatch {
        property: prop.name.clone(),
        expected: T::type_name().into(),
        got: got.into(),
    })
}

impl PartialEq for Object<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.is_same_object(other)
    }
}

impl fmt::Debug for Object<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.object_type(), self.key)
    }
}

impl From<&Object<'_>> for Value {
    fn from(object: &Object<'_>) -> Self {
        Value::Link(object.key)
    }
}

impl From<Object<'_>> for Value {
    fn from(object: Object<'_>) -> Self {
        Value::Link(object.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ObjectSchema, Property, PropertyType, Schema};
    use crate::store::Store;
    use serde_json::json;
    use std::sync::Arc;

    fn test_store() -> Arc<Store> {
        let schema = Schema::new(vec![
            ObjectSchema::new(
                "Person",
                vec![
                    Property::new("name", PropertyType::String),
                    Property::new("age", PropertyType::Int).with_default(18),
                    Property::link("friend", "Person"),
                    Property::list("nicknames", PropertyType::String),
                ],
            ),
            ObjectSchema::new("Dog", vec![Property::new("name", PropertyType::String)]),
        ]);
        Arc::new(Store::in_memory(schema).unwrap())
    }

    #[test]
    fn test_get_and_set() {
        let store = test_store();
        let handle = store.handle();
        handle.begin_write().unwrap();

        let person = handle.create("Person").unwrap();
        assert_eq!(person.get::<i64>("age").unwrap(), 18);
        person.set("name", "Ann").unwrap();
        assert_eq!(person.get::<String>("name").unwrap(), "Ann");

        assert!(matches!(
            person.get::<bool>("age"),
            Err(StoreError::TypeMismatch { .. })
        ));
        assert!(matches!(
            person.get::<i64>("missing"),
            Err(StoreError::UnknownProperty { .. })
        ));
        handle.commit_write().unwrap();

        assert!(matches!(
            person.set("age", 30),
            Err(StoreError::ReadOnlyTransaction)
        ));
    }

    #[test]
    fn test_link_follow_and_type_check() {
        let store = test_store();
        let handle = store.handle();
        handle.begin_write().unwrap();

        let ann = handle.create_with("Person", [("name", Value::from("Ann"))]).unwrap();
        let bob = handle.create_with("Person", [("name", Value::from("Bob"))]).unwrap();
        let dog = handle.create("Dog").unwrap();

        assert!(ann.link("friend").unwrap().is_none());
        ann.set("friend", &bob).unwrap();
        assert_eq!(ann.link("friend").unwrap().unwrap(), bob);

        assert!(matches!(
            ann.set("friend", &dog),
            Err(StoreError::TypeMismatch { .. })
        ));
        assert!(matches!(ann.link("name"), Err(StoreError::TypeMismatch { .. })));
        handle.commit_write().unwrap();
    }

    #[test]
    fn test_delete_invalidates_and_nulls_links() {
        let store = test_store();
        let handle = store.handle();
        handle.begin_write().unwrap();

        let ann = handle.create("Person").unwrap();
        let bob = handle.create("Person").unwrap();
        ann.set("friend", &bob).unwrap();

        bob.delete().unwrap();
        assert!(bob.is_invalidated());
        assert!(ann.link("friend").unwrap().is_none());
        assert!(matches!(bob.get::<String>("name"), Err(StoreError::InvalidatedObject)));
        assert!(matches!(bob.delete(), Err(StoreError::InvalidHandle(_))));
        handle.commit_write().unwrap();
    }

    #[test]
    fn test_list_requires_list_property() {
        let store = test_store();
        let handle = store.handle();
        handle.begin_write().unwrap();

        let ann = handle.create("Person").unwrap();
        assert!(ann.list("nicknames").is_ok());
        assert!(matches!(ann.list("name"), Err(StoreError::NotAList(_))));
        handle.commit_write().unwrap();
    }

    #[test]
    fn test_to_json() {
        let store = test_store();
        let handle = store.handle();
        handle.begin_write().unwrap();

        let ann = handle.create_with("Person", [("name", Value::from("Ann"))]).unwrap();
        ann.list("nicknames").unwrap().append("A").unwrap();
        handle.commit_write().unwrap();

        assert_eq!(
            ann.to_json().unwrap(),
            json!({"name": "Ann", "age": 18, "friend": null, "nicknames": ["A"]})
        );
    }
}
