//! Key-value storage abstraction.
//!
//! This module defines the `KeyValueStore` trait the durable queue and the
//! ignore list are built on. It offers the small subset of Redis-like
//! operations the bridge needs: string values at keys, append-only lists,
//! and prefix listing. Implementations provide different backends
//! (in-memory for tests, SQLite for deployments).

mod memory;
mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage error during {operation}: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },

    #[error("corrupt {what} in store")]
    Corruption { what: String },
}

impl StoreError {
    pub fn storage(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Storage {
            operation,
            message: message.into(),
        }
    }

    pub fn corruption(what: impl Into<String>) -> Self {
        Self::Corruption { what: what.into() }
    }
}

/// Storage backend for queue records.
///
/// Plain values and lists share one key namespace: `exists` and `delete`
/// look at both, while `keys_with_prefix` only lists plain values.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store a value (upsert semantics).
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Store a value only if the key is absent. Returns whether it was written.
    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Delete a value or list. Returns whether anything was removed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Keys of plain values starting with `prefix`, sorted.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Append to a list, returning its new length.
    async fn list_push(&self, key: &str, value: &str) -> Result<usize, StoreError>;

    /// All entries of a list, oldest first. Missing lists are empty.
    async fn list_range(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Remove the `count` oldest entries of a list.
    async fn list_trim_front(&self, key: &str, count: usize) -> Result<(), StoreError>;
}
