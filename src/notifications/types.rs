//! Notification types for commit events.

use crate::types::{RowKey, Version};
use serde::{Deserialize, Serialize};

/// Configuration for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered events before dropping subscriber.
    /// Default: 1000
    pub buffer_size: usize,

    /// Filter criteria.
    pub filter: SubscriptionFilter,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            filter: SubscriptionFilter::default(),
        }
    }
}

/// Filter criteria for subscriptions.
#[derive(Clone, Debug, Default)]
pub struct SubscriptionFilter {
    /// Only report changes to these object types (None = all types).
    pub object_types: Option<Vec<String>>,

    /// Also deliver commits that changed nothing the filter selects.
    pub include_empty: bool,
}

impl SubscriptionFilter {
    /// Subscribe to every commit.
    pub fn all() -> Self {
        Self {
            include_empty: true,
            ..Default::default()
        }
    }

    /// Subscribe to changes of specific object types.
    pub fn object_types(types: Vec<String>) -> Self {
        Self {
            object_types: Some(types),
            include_empty: false,
        }
    }

    pub(crate) fn selects(&self, object_type: &str) -> bool {
        match &self.object_types {
            Some(types) => types.iter().any(|t| t == object_type),
            None => true,
        }
    }
}

/// Events emitted to subscribers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    /// A write transaction was committed.
    Commit {
        version: Version,
        changes: Vec<ObjectChanges>,
    },

    /// Subscription was dropped.
    Dropped { reason: DropReason },
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Net changes to one object type in a commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectChanges {
    pub object_type: String,
    pub inserted: Vec<RowKey>,
    pub modified: Vec<RowKey>,
    pub deleted: Vec<RowKey>,
    /// Every object of the type was deleted at once.
    pub cleared: bool,
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle to manage a subscription.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<StoreEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<StoreEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<StoreEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<StoreEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}
