//! Administrative handle for counter trigger registrations.

use std::future::Future;

use statecraft_types::error::StorageError;
use statecraft_types::metadata::CounterTriggerMetadata;

/// Manages the trigger-metadata table that tells the storage layer to invoke
/// a Parallel join when a counter reaches one of its `Klist` thresholds.
pub trait CounterTriggerAdmin: Send + Sync {
    fn put_trigger(
        &self,
        key: &str,
        metadata: &CounterTriggerMetadata,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Remove a registration. No-op if it does not exist.
    fn delete_trigger(&self, key: &str) -> impl Future<Output = Result<(), StorageError>> + Send;
}
