//! Error types for the object store.

use crate::types::{RowKey, Version};
use thiserror::Error;

/// Main error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: isize, len: usize },

    #[error("Object has been deleted or invalidated")]
    InvalidatedObject,

    #[error("Cannot modify managed objects outside of a write transaction")]
    ReadOnlyTransaction,

    #[error("A write transaction is already open on this store")]
    WriteConflict,

    #[error("Row {0} does not exist")]
    InvalidHandle(RowKey),

    #[error("Transaction based on {base:?} but store is at {current:?}")]
    StaleTransaction { base: Version, current: Version },

    #[error("This handle is already in a write transaction")]
    AlreadyInWriteTransaction,

    #[error("This handle is not in a write transaction")]
    NotInWriteTransaction,

    #[error("Unknown object type: {0}")]
    UnknownObjectType(String),

    #[error("Unknown property '{property}' on {object_type}")]
    UnknownProperty { object_type: String, property: String },

    #[error("Property '{0}' is not a list")]
    NotAList(String),

    #[error("Type mismatch for '{property}': expected {expected}, got {got}")]
    TypeMismatch {
        property: String,
        expected: String,
        got: String,
    },

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Schema does not match the one stored on disk")]
    SchemaMismatch,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Deserialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
