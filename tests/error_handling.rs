//! Error handling and edge case tests.

use linkdb::{
    ObjectSchema, Property, PropertyType, Schema, Store, StoreConfig, StoreError, Value,
};
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use tempfile::TempDir;

fn test_schema() -> Schema {
    Schema::new(vec![
        ObjectSchema::new("Item", vec![Property::new("label", PropertyType::String)]),
        ObjectSchema::new(
            "Holder",
            vec![
                Property::list("items", PropertyType::Object("Item".into())),
                Property::list("numbers", PropertyType::Int),
                Property::new("count", PropertyType::Int),
            ],
        ),
    ])
}

fn test_config(dir: &TempDir) -> StoreConfig {
    StoreConfig {
        path: dir.path().join("store"),
        schema: test_schema(),
        sync_on_commit: false,
        ..Default::default()
    }
}

fn test_store(dir: &TempDir) -> Arc<Store> {
    Arc::new(Store::create(test_config(dir)).unwrap())
}

// --- Schema Errors ---

#[test]
fn test_unknown_object_type() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let handle = store.handle();

    handle.begin_write().unwrap();
    assert!(matches!(
        handle.create("Nope"),
        Err(StoreError::UnknownObjectType(_))
    ));
    assert!(matches!(
        handle.objects("Nope"),
        Err(StoreError::UnknownObjectType(_))
    ));
    handle.cancel_write().unwrap();
}

#[test]
fn test_unknown_property() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let handle = store.handle();

    handle.begin_write().unwrap();
    assert!(matches!(
        handle.create_with("Item", [("missing", Value::from("x"))]),
        Err(StoreError::UnknownProperty { .. })
    ));
    let holder = handle.create("Holder").unwrap();
    assert!(matches!(
        holder.list("missing"),
        Err(StoreError::UnknownProperty { .. })
    ));
    assert!(matches!(holder.list("count"), Err(StoreError::NotAList(_))));
    assert!(matches!(
        holder.get::<i64>("items"),
        Err(StoreError::NotAList(_))
    ));
    handle.commit_write().unwrap();
}

#[test]
fn test_type_mismatch_leaves_object_unchanged() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let handle = store.handle();

    handle.begin_write().unwrap();
    let holder = handle.create("Holder").unwrap();
    assert!(matches!(
        holder.set("count", "three"),
        Err(StoreError::TypeMismatch { .. })
    ));
    assert!(matches!(
        holder.set("count", Value::Null),
        Err(StoreError::TypeMismatch { .. })
    ));
    assert_eq!(holder.get::<i64>("count").unwrap(), 0);

    let numbers = holder.list("numbers").unwrap();
    numbers.append_all([1, 2]).unwrap();
    // The bad element is rejected before anything is appended
    assert!(matches!(
        numbers.append_all([Value::Int(3), Value::from("four")]),
        Err(StoreError::TypeMismatch { .. })
    ));
    assert_eq!(numbers.count().unwrap(), 2);
    handle.commit_write().unwrap();
}

// --- Transaction Errors ---

#[test]
fn test_mutation_outside_write() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let handle = store.handle();

    handle
        .write(|h| h.create("Holder").map(|_| ()))
        .unwrap();
    let holder = handle.objects("Holder").unwrap().first().unwrap().unwrap();
    let numbers = holder.list("numbers").unwrap();

    assert!(matches!(
        numbers.append(1),
        Err(StoreError::ReadOnlyTransaction)
    ));
    assert!(matches!(
        numbers.remove_all(),
        Err(StoreError::ReadOnlyTransaction)
    ));
    assert!(matches!(
        holder.set("count", 1),
        Err(StoreError::ReadOnlyTransaction)
    ));
    assert!(matches!(holder.delete(), Err(StoreError::ReadOnlyTransaction)));

    // Reads are fine
    assert_eq!(numbers.count().unwrap(), 0);
}

#[test]
fn test_nested_begin_write() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let handle = store.handle();

    handle.begin_write().unwrap();
    assert!(matches!(
        handle.begin_write(),
        Err(StoreError::AlreadyInWriteTransaction)
    ));
    assert!(matches!(
        handle.write(|_| Ok(())),
        Err(StoreError::AlreadyInWriteTransaction)
    ));
    // The outer transaction is still open
    assert!(handle.is_in_write_transaction());
    handle.commit_write().unwrap();
}

#[test]
fn test_double_delete() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let handle = store.handle();

    handle.begin_write().unwrap();
    let item = handle.create("Item").unwrap();
    let twin = handle.object("Item", item.key()).unwrap().unwrap();
    item.delete().unwrap();
    assert!(matches!(twin.delete(), Err(StoreError::InvalidHandle(_))));
    handle.commit_write().unwrap();
}

// --- Store Errors ---

#[test]
fn test_open_nonexistent_store() {
    let dir = TempDir::new().unwrap();
    let result = Store::open(test_config(&dir));
    assert!(matches!(result, Err(StoreError::NotInitialized)));
}

#[test]
fn test_concurrent_store_access() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    let _store1 = Store::create(config.clone()).unwrap();

    // Second store should fail to acquire lock
    let result = Store::open_or_create(config);
    assert!(matches!(result, Err(StoreError::Locked)));
}

#[test]
fn test_corrupted_manifest() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    drop(Store::create(config.clone()).unwrap());

    std::fs::write(config.path.join("MANIFEST"), b"XXXX\x01").unwrap();
    assert!(matches!(
        Store::open(config),
        Err(StoreError::InvalidFormat(_))
    ));
}

#[test]
fn test_corrupted_schema_file() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    drop(Store::create(config.clone()).unwrap());

    let path = config.path.join("schema.bin");
    let mut data = std::fs::read(&path).unwrap();
    data[0] ^= 0xff;
    std::fs::write(&path, data).unwrap();

    assert!(matches!(
        Store::open(config),
        Err(StoreError::ChecksumMismatch { .. })
    ));
}

#[test]
fn test_torn_log_tail_is_dropped() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    {
        let store = Arc::new(Store::create(config.clone()).unwrap());
        let handle = store.handle();
        handle
            .write(|h| h.create_with("Item", [("label", Value::from("kept"))]).map(|_| ()))
            .unwrap();
    }

    // Half of a frame: a length prefix and a few bytes
    let mut log = OpenOptions::new()
        .append(true)
        .open(config.path.join("commits.log"))
        .unwrap();
    log.write_all(&[200, 0, 0, 0, 1, 2, 3]).unwrap();
    drop(log);

    let store = Arc::new(Store::open(config).unwrap());
    let handle = store.handle();
    let items = handle.objects("Item").unwrap();
    assert_eq!(items.project::<String>("label").unwrap(), ["kept"]);

    // The log is writable again after recovery
    handle.write(|h| h.create("Item").map(|_| ())).unwrap();
    assert_eq!(items.count().unwrap(), 2);
}

// --- Boundary Conditions ---

#[test]
fn test_empty_list_operations() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let handle = store.handle();

    handle.begin_write().unwrap();
    let items = handle.create("Holder").unwrap().list("items").unwrap();

    assert!(items.is_empty().unwrap());
    assert_eq!(items.first().unwrap(), None);
    assert_eq!(items.last().unwrap(), None);
    assert!(matches!(items.get(0), Err(StoreError::IndexOutOfBounds { index: 0, len: 0 })));
    assert!(matches!(items.swap(0, 0), Err(StoreError::IndexOutOfBounds { .. })));
    assert!(matches!(items.move_item(0, 0), Err(StoreError::IndexOutOfBounds { .. })));
    items.replace_range(0..0, Vec::<Value>::new()).unwrap();
    items.remove_last().unwrap();
    items.remove_all().unwrap();
    assert_eq!(items.iter().count(), 0);
    handle.commit_write().unwrap();
}

#[test]
fn test_empty_list_invalidated_with_parent() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let handle = store.handle();

    handle.begin_write().unwrap();
    let holder = handle.create("Holder").unwrap();
    let items = holder.list("items").unwrap();
    handle.commit_write().unwrap();

    handle.write(|_| holder.delete()).unwrap();
    assert!(items.is_invalidated());
}

#[test]
fn test_unicode_values() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let handle = store.handle();

    let label = "日本語 🎉 émoji";
    let key = handle
        .write(|h| Ok(h.create_with("Item", [("label", Value::from(label))])?.key()))
        .unwrap();
    let item = handle.object("Item", key).unwrap().unwrap();
    assert_eq!(item.get::<String>("label").unwrap(), label);
}
