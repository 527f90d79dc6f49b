//! In-memory state store.
//!
//! Implements `StateStore` and `CounterTriggerAdmin` from `statecraft-core`
//! on top of `DashMap`. Counter increments take the entry's shard lock, so
//! concurrent branches each observe a distinct value. When an increment lands
//! on one of the registered `Klist` thresholds the store emits a
//! [`CounterTrigger`] on its channel, which a driver turns into the Parallel
//! join invocation.

use std::collections::BTreeSet;

use dashmap::DashMap;
use serde_json::Value;
use statecraft_core::storage::counter_trigger::CounterTriggerAdmin;
use statecraft_core::storage::state_store::StateStore;
use statecraft_core::workflow::context::counter_metadata_key;
use statecraft_types::error::StorageError;
use statecraft_types::metadata::CounterTriggerMetadata;
use tokio::sync::mpsc;

/// A counter reached a join threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterTrigger {
    pub counter_name: String,
    /// Registered metadata with `CounterValue` set to the reached value.
    pub metadata: CounterTriggerMetadata,
}

/// DashMap-backed implementation of `StateStore` and `CounterTriggerAdmin`.
#[derive(Default)]
pub struct InMemoryStateStore {
    values: DashMap<String, Value>,
    sets: DashMap<String, BTreeSet<String>>,
    counters: DashMap<String, i64>,
    triggers: DashMap<String, CounterTriggerMetadata>,
    trigger_tx: Option<mpsc::UnboundedSender<CounterTrigger>>,
}

impl InMemoryStateStore {
    /// A store that records triggers but never fires them.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that fires threshold crossings on the returned receiver.
    pub fn with_triggers() -> (Self, mpsc::UnboundedReceiver<CounterTrigger>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let store = Self {
            trigger_tx: Some(tx),
            ..Self::default()
        };
        (store, rx)
    }

    /// Registered trigger metadata under `key`, if any.
    pub fn trigger(&self, key: &str) -> Option<CounterTriggerMetadata> {
        self.triggers.get(key).map(|entry| entry.value().clone())
    }

    /// Current value of a counter, if it exists.
    pub fn counter(&self, name: &str) -> Option<i64> {
        self.counters.get(name).map(|entry| *entry.value())
    }

    /// Total number of keys, sets, counters and triggers held.
    pub fn entry_count(&self) -> usize {
        self.values.len() + self.sets.len() + self.counters.len() + self.triggers.len()
    }

    fn fire_threshold(&self, counter_name: &str, value: i64) {
        let Some(tx) = &self.trigger_tx else {
            return;
        };
        let Ok(reached) = u64::try_from(value) else {
            return;
        };
        let Some(mut metadata) = self.trigger(&counter_metadata_key(counter_name)) else {
            return;
        };
        if !metadata.klist.contains(&reached) {
            return;
        }

        metadata.counter_value = value;
        tracing::debug!(counter = %counter_name, value, "counter trigger fired");
        let trigger = CounterTrigger {
            counter_name: counter_name.to_string(),
            metadata,
        };
        if tx.send(trigger).is_err() {
            tracing::warn!(counter = %counter_name, "counter trigger receiver dropped");
        }
    }
}

impl StateStore for InMemoryStateStore {
    async fn put(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        self.values.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.values.get(key).map(|entry| entry.value().clone()))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.values.remove(key);
        Ok(())
    }

    async fn create_set(&self, key: &str) -> Result<(), StorageError> {
        self.sets.insert(key.to_string(), BTreeSet::new());
        Ok(())
    }

    async fn add_set_entry(&self, key: &str, member: &str) -> Result<(), StorageError> {
        self.sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn retrieve_set(&self, key: &str) -> Result<BTreeSet<String>, StorageError> {
        Ok(self
            .sets
            .get(key)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    async fn delete_set(&self, key: &str) -> Result<(), StorageError> {
        self.sets.remove(key);
        Ok(())
    }

    async fn create_counter(&self, name: &str, initial: i64) -> Result<(), StorageError> {
        self.counters.insert(name.to_string(), initial);
        Ok(())
    }

    async fn increment_counter(&self, name: &str, delta: i64) -> Result<i64, StorageError> {
        let value = {
            let mut entry = self
                .counters
                .get_mut(name)
                .ok_or_else(|| StorageError::NotFound(name.to_string()))?;
            *entry += delta;
            *entry
        };
        self.fire_threshold(name, value);
        Ok(value)
    }

    async fn delete_counter(&self, name: &str) -> Result<(), StorageError> {
        self.counters.remove(name);
        Ok(())
    }
}

impl CounterTriggerAdmin for InMemoryStateStore {
    async fn put_trigger(
        &self,
        key: &str,
        metadata: &CounterTriggerMetadata,
    ) -> Result<(), StorageError> {
        self.triggers.insert(key.to_string(), metadata.clone());
        Ok(())
    }

    async fn delete_trigger(&self, key: &str) -> Result<(), StorageError> {
        self.triggers.remove(key);
        Ok(())
    }
}
