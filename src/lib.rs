//! # linkdb
//!
//! An embedded object store with transactional, live ordered collections.
//!
//! ## Core Concepts
//!
//! - **Snapshots**: Immutable, copy-on-write views of every table at one
//!   committed version
//! - **Handles**: Per-context coordinators that read a pinned snapshot or own
//!   the single write transaction
//! - **Objects**: Rows addressed by stable keys, invalidated once deleted
//! - **Lists**: Ordered link or value properties, mutated in place and
//!   observed live
//! - **Commit log**: Optional checksummed on-disk log replayed on open
//!
//! ## Example
//!
//! ```ignore
//! use linkdb::{ObjectSchema, Property, PropertyType, Schema, Store, StoreConfig, Value};
//! use std::sync::Arc;
//!
//! let schema = Schema::new(vec![
//!     ObjectSchema::new("StringObject", vec![Property::new("stringCol", PropertyType::String)]),
//!     ObjectSchema::new(
//!         "ArrayObject",
//!         vec![Property::list("array", PropertyType::Object("StringObject".into()))],
//!     ),
//! ]);
//!
//! let store = Arc::new(Store::open_or_create(StoreConfig {
//!     path: "./my-store".into(),
//!     schema,
//!     ..Default::default()
//! })?);
//!
//! let handle = store.handle();
//! handle.write(|h| {
//!     let array = h.create("ArrayObject")?.list("array")?;
//!     array.append(&h.create_with("StringObject", [("stringCol", Value::from("a"))])?)?;
//!     array.append(&h.create_with("StringObject", [("stringCol", Value::from("b"))])?)?;
//!     array.swap(0, 1)
//! })?;
//! ```

pub mod collections;
pub mod error;
pub mod notifications;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod tables;
pub mod types;
pub mod wal;

// Re-exports
pub use collections::{
    apply_list_op, ChangeToken, List, ListIter, ListOp, Object, ObjectCollection, ObjectIter,
    Results, ResultsIter,
};
pub use error::{Result, StoreError};
pub use notifications::{
    DropReason, NotificationManager, ObjectChanges, StoreEvent, SubscriptionConfig,
    SubscriptionFilter, SubscriptionHandle, SubscriptionId,
};
pub use schema::{ObjectSchema, Property, PropertyType, Schema};
pub use snapshot::{ChangeSet, ReadView, Snapshot, TableChanges, VersionedStore, WriteTransaction};
pub use store::{HandleConfig, Store, StoreConfig, StoreHandle};
pub use tables::{Field, Row, Table};
pub use types::*;
pub use wal::{CommitEntry, CommitLog, RowMutation};
