//! In-memory collaborators shared by the unit tests of this crate.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use serde_json::Value;
use statecraft_types::error::StorageError;
use statecraft_types::metadata::CounterTriggerMetadata;

use crate::scheduler::Scheduler;
use crate::storage::counter_trigger::CounterTriggerAdmin;
use crate::storage::state_store::StateStore;

#[derive(Default)]
pub struct MockStore {
    pub values: Mutex<HashMap<String, Value>>,
    pub sets: Mutex<HashMap<String, BTreeSet<String>>>,
    pub counters: Mutex<HashMap<String, i64>>,
    /// Makes every counter operation fail with a backend error.
    pub fail_counters: bool,
}

impl MockStore {
    fn counter_failure(&self) -> Result<(), StorageError> {
        if self.fail_counters {
            Err(StorageError::Backend("counter table offline".to_string()))
        } else {
            Ok(())
        }
    }
}

impl StateStore for MockStore {
    async fn put(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        self.values.lock().unwrap().insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.values.lock().unwrap().remove(key);
        Ok(())
    }

    async fn create_set(&self, key: &str) -> Result<(), StorageError> {
        self.sets.lock().unwrap().insert(key.to_string(), BTreeSet::new());
        Ok(())
    }

    async fn add_set_entry(&self, key: &str, member: &str) -> Result<(), StorageError> {
        self.sets
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn retrieve_set(&self, key: &str) -> Result<BTreeSet<String>, StorageError> {
        Ok(self.sets.lock().unwrap().get(key).cloned().unwrap_or_default())
    }

    async fn delete_set(&self, key: &str) -> Result<(), StorageError> {
        self.sets.lock().unwrap().remove(key);
        Ok(())
    }

    async fn create_counter(&self, name: &str, initial: i64) -> Result<(), StorageError> {
        self.counter_failure()?;
        self.counters.lock().unwrap().insert(name.to_string(), initial);
        Ok(())
    }

    async fn increment_counter(&self, name: &str, delta: i64) -> Result<i64, StorageError> {
        self.counter_failure()?;
        let mut counters = self.counters.lock().unwrap();
        let value = counters
            .get_mut(name)
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;
        *value += delta;
        Ok(*value)
    }

    async fn delete_counter(&self, name: &str) -> Result<(), StorageError> {
        self.counter_failure()?;
        self.counters.lock().unwrap().remove(name);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockTriggers {
    pub entries: Mutex<HashMap<String, CounterTriggerMetadata>>,
}

impl CounterTriggerAdmin for MockTriggers {
    async fn put_trigger(
        &self,
        key: &str,
        metadata: &CounterTriggerMetadata,
    ) -> Result<(), StorageError> {
        self.entries.lock().unwrap().insert(key.to_string(), metadata.clone());
        Ok(())
    }

    async fn delete_trigger(&self, key: &str) -> Result<(), StorageError> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockScheduler {
    pub dispatched: Mutex<Vec<(String, Value)>>,
}

impl MockScheduler {
    /// Drain everything dispatched so far.
    pub fn take(&self) -> Vec<(String, Value)> {
        std::mem::take(&mut *self.dispatched.lock().unwrap())
    }
}

impl Scheduler for MockScheduler {
    fn add_dynamic_next(&self, next: &str, input: Value) {
        self.dispatched.lock().unwrap().push((next.to_string(), input));
    }
}
