//! In-process change notifications.
//!
//! Every commit is broadcast to subscribers as a [`StoreEvent::Commit`]
//! carrying the inserted, modified and deleted row keys per object type.
//! Subscribers have bounded buffers; one that falls behind is dropped.
//!
//! # Example
//!
//! ```ignore
//! let handle = store.subscribe(SubscriptionConfig {
//!     filter: SubscriptionFilter::object_types(vec!["Person".to_string()]),
//!     ..Default::default()
//! });
//!
//! while let Ok(event) = handle.recv() {
//!     match event {
//!         StoreEvent::Commit { version, changes } => println!("{:?}: {:?}", version, changes),
//!         StoreEvent::Dropped { .. } => break,
//!     }
//! }
//! ```

mod manager;
mod types;

pub use manager::NotificationManager;
pub use types::{
    DropReason, ObjectChanges, StoreEvent, SubscriptionConfig, SubscriptionFilter,
    SubscriptionHandle, SubscriptionId,
};
