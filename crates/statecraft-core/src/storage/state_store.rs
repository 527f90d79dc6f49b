//! Key/value, set and counter store trait.
//!
//! Parallel fan-out and join coordinate exclusively through this store, and
//! delegated task workers reach it through the callback channel.

use std::collections::BTreeSet;
use std::future::Future;

use serde_json::Value;
use statecraft_types::error::StorageError;

/// Workflow-scoped storage used across state invocations.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
/// Deleting an entry that does not exist is a no-op, never an error.
pub trait StateStore: Send + Sync {
    /// Store a value (upsert).
    fn put(&self, key: &str, value: &Value)
    -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Get a value by key. Returns None if the key does not exist.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Value>, StorageError>> + Send;

    fn delete(&self, key: &str) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Create an empty set, replacing any existing set under `key`.
    fn create_set(&self, key: &str) -> impl Future<Output = Result<(), StorageError>> + Send;

    fn add_set_entry(
        &self,
        key: &str,
        member: &str,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Members of the set, empty if it does not exist.
    fn retrieve_set(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<BTreeSet<String>, StorageError>> + Send;

    fn delete_set(&self, key: &str) -> impl Future<Output = Result<(), StorageError>> + Send;

    fn create_counter(
        &self,
        name: &str,
        initial: i64,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Atomically add `delta` and return the new value.
    ///
    /// Must be linearizable: concurrent increments from sibling branches
    /// each observe a distinct value.
    fn increment_counter(
        &self,
        name: &str,
        delta: i64,
    ) -> impl Future<Output = Result<i64, StorageError>> + Send;

    fn delete_counter(&self, name: &str) -> impl Future<Output = Result<(), StorageError>> + Send;
}
