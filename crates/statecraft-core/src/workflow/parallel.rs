//! Parallel state: fan-out, branch terminal writes, and join.
//!
//! Branches run as independent invocations that share nothing in memory.
//! They coordinate through the store: each branch's terminal state writes its
//! output, records the key in a tracking set and bumps a counter. The storage
//! layer re-invokes the Parallel state when the counter reaches a threshold,
//! and that join aggregates the outputs in branch order.

use std::time::Duration;

use serde_json::Value;
use statecraft_types::config::InterpreterConfig;
use statecraft_types::error::StorageError;
use statecraft_types::metadata::{
    CounterTriggerMetadata, ExecutionMetadata, ParallelExecutionRecord, StateAction,
};
use thiserror::Error;
use tracing::{debug, error, info};

use super::context::{ParallelKeys, RunContext, StateEnv, counter_metadata_key};
use super::definition::StateDefinition;
use crate::scheduler::Scheduler;
use crate::storage::counter_trigger::CounterTriggerAdmin;
use crate::storage::state_store::StateStore;

/// Scheduler target that terminates the workflow.
pub const END_TARGET: &str = "end";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ParallelError {
    /// A branch terminal state cannot find its owning Parallel record.
    #[error("no parallel record for state '{state}' in execution '{execution_id}'")]
    RecordNotFound { state: String, execution_id: String },

    #[error("parallel metadata is corrupt: {0}")]
    MetadataCorrupt(String),

    #[error("branch output set '{0}' is empty at join")]
    EmptyBranchSet(String),

    #[error("branch output '{key}' not written after {attempts} reads")]
    BranchOutputTimeout { key: String, attempts: u32 },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result of a join invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinOutcome {
    /// Outputs were aggregated and dispatched.
    Joined { output: Value, is_final: bool },
    /// The fan-out was already cleaned up by an earlier join.
    AlreadyJoined,
}

// ---------------------------------------------------------------------------
// ParallelCoordinator
// ---------------------------------------------------------------------------

/// Drives Parallel fan-out and join against the external store.
#[derive(Debug, Clone)]
pub struct ParallelCoordinator {
    poll_interval: Duration,
    poll_max_attempts: u32,
}

impl Default for ParallelCoordinator {
    fn default() -> Self {
        Self::new(&InterpreterConfig::default())
    }
}

impl ParallelCoordinator {
    pub fn new(config: &InterpreterConfig) -> Self {
        Self {
            poll_interval: config.join_poll_interval(),
            poll_max_attempts: config.join_poll_max_attempts.max(1),
        }
    }

    /// Start every branch of `definition` with `input`.
    ///
    /// Creates the counter, registers its trigger, records the fan-out in
    /// `run.metadata`, persists that metadata, creates the tracking set and
    /// dispatches each branch's `StartAt`. Does not wait for branches.
    pub async fn fan_out<S, A, D>(
        &self,
        definition: &StateDefinition,
        input: &Value,
        run: &mut RunContext,
        env: &StateEnv<'_, S, A, D>,
    ) -> Result<(), ParallelError>
    where
        S: StateStore,
        A: CounterTriggerAdmin,
        D: Scheduler,
    {
        let branches = &definition.body().branches;
        let total = branches.len();
        let keys = ParallelKeys::for_run(run);
        let klist = vec![total as u64];
        let counter = keys.counter();

        let trigger = CounterTriggerMetadata {
            state_action: StateAction::PostParallelProcessing,
            async_execution: run.metadata.async_execution,
            workflow_instance_metadata_storage_key: keys.workflow_metadata(),
            counter_value: 0,
            klist: klist.clone(),
            total_branches: total,
            execution_id: run.execution_id.clone(),
            function_topic: run.topic.clone(),
            endpoint: run.endpoint.clone(),
        };
        let record = ParallelExecutionRecord {
            counter_name: counter.clone(),
            branch_output_keys: (1..=total).map(|i| keys.branch_output(i)).collect(),
            branch_output_keys_set_key: keys.output_keys_set(),
            klist,
            total_branches: total,
            execution_id: run.execution_id.clone(),
            function_topic: run.topic.clone(),
            endpoint: run.endpoint.clone(),
        };
        run.metadata
            .set_parallel_info(definition.name(), &run.execution_id, record);

        env.store
            .create_counter(&counter, 0)
            .await
            .map_err(storage_failure("create_counter", &counter))?;
        let trigger_key = keys.counter_metadata();
        env.triggers
            .put_trigger(&trigger_key, &trigger)
            .await
            .map_err(storage_failure("put_trigger", &trigger_key))?;

        let metadata_key = keys.workflow_metadata();
        let metadata = serde_json::to_value(&run.metadata)
            .map_err(|e| ParallelError::MetadataCorrupt(e.to_string()))?;
        env.store
            .put(&metadata_key, &metadata)
            .await
            .map_err(storage_failure("put", &metadata_key))?;

        let set_key = keys.output_keys_set();
        env.store
            .create_set(&set_key)
            .await
            .map_err(storage_failure("create_set", &set_key))?;

        for branch in branches {
            env.scheduler.add_dynamic_next(&branch.start_at, input.clone());
        }

        info!(
            state = %definition.name(),
            execution_id = %run.execution_id,
            counter = %counter,
            branches = total,
            "parallel fan-out dispatched"
        );
        Ok(())
    }

    /// Record a branch's final output for its owning Parallel state.
    ///
    /// Returns the counter value after this branch's increment.
    pub async fn process_branch_terminal<S, A, D>(
        &self,
        definition: &StateDefinition,
        output: &Value,
        run: &RunContext,
        env: &StateEnv<'_, S, A, D>,
    ) -> Result<i64, ParallelError>
    where
        S: StateStore,
        A: CounterTriggerAdmin,
        D: Scheduler,
    {
        let lineage = definition.body().parent_parallel_info.as_ref().ok_or_else(|| {
            ParallelError::MetadataCorrupt(format!(
                "state '{}' carries no ParentParallelInfo",
                definition.name()
            ))
        })?;
        let record = run
            .metadata
            .parallel_info(&lineage.name, &run.execution_id)
            .ok_or_else(|| ParallelError::RecordNotFound {
                state: lineage.name.clone(),
                execution_id: run.execution_id.clone(),
            })?;
        let key = record.branch_output_key(lineage.branch_counter).ok_or_else(|| {
            ParallelError::MetadataCorrupt(format!(
                "branch {} out of range for '{}' ({} branches)",
                lineage.branch_counter, lineage.name, record.total_branches
            ))
        })?;

        env.store
            .put(key, output)
            .await
            .map_err(storage_failure("put", key))?;
        env.store
            .add_set_entry(&record.branch_output_keys_set_key, key)
            .await
            .map_err(storage_failure("add_set_entry", &record.branch_output_keys_set_key))?;
        let count = env
            .store
            .increment_counter(&record.counter_name, 1)
            .await
            .map_err(storage_failure("increment_counter", &record.counter_name))?;

        debug!(
            state = %definition.name(),
            parallel = %lineage.name,
            branch = lineage.branch_counter,
            counter = %record.counter_name,
            count,
            "branch output recorded"
        );
        Ok(count)
    }

    /// Aggregate branch outputs after the counter trigger fired.
    ///
    /// Idempotent: once the final join has cleaned up, later triggers find no
    /// persisted metadata and return [`JoinOutcome::AlreadyJoined`].
    pub async fn join<S, A, D>(
        &self,
        definition: &StateDefinition,
        trigger: &CounterTriggerMetadata,
        env: &StateEnv<'_, S, A, D>,
    ) -> Result<JoinOutcome, ParallelError>
    where
        S: StateStore,
        A: CounterTriggerAdmin,
        D: Scheduler,
    {
        let metadata_key = &trigger.workflow_instance_metadata_storage_key;
        let Some(stored) = env
            .store
            .get(metadata_key)
            .await
            .map_err(storage_failure("get", metadata_key))?
        else {
            info!(
                state = %definition.name(),
                execution_id = %trigger.execution_id,
                "parallel join already completed"
            );
            return Ok(JoinOutcome::AlreadyJoined);
        };

        let metadata: ExecutionMetadata = serde_json::from_value(stored)
            .map_err(|e| ParallelError::MetadataCorrupt(format!("'{metadata_key}': {e}")))?;
        let record = metadata
            .parallel_info(definition.name(), &trigger.execution_id)
            .ok_or_else(|| ParallelError::RecordNotFound {
                state: definition.name().to_string(),
                execution_id: trigger.execution_id.clone(),
            })?;

        let set_key = &record.branch_output_keys_set_key;
        let tracked = env
            .store
            .retrieve_set(set_key)
            .await
            .map_err(storage_failure("retrieve_set", set_key))?;
        if tracked.is_empty() {
            return Err(ParallelError::EmptyBranchSet(set_key.clone()));
        }

        let finished = trigger.counter_value.unsigned_abs();
        let is_final = finished == record.join_threshold();

        let mut outputs = Vec::with_capacity(record.branch_output_keys.len());
        let mut consumed = Vec::new();
        for key in &record.branch_output_keys {
            if tracked.contains(key) {
                outputs.push(self.await_branch_output(env.store, key).await?);
                consumed.push(key.as_str());
            } else {
                outputs.push(Value::Null);
            }
        }

        if is_final {
            self.cleanup(record, metadata_key, &consumed, env).await?;
        }

        let output = Value::Array(outputs);
        let body = definition.body();
        if let Some(next) = &body.next {
            env.scheduler.add_dynamic_next(next, output.clone());
        }
        if body.end {
            env.scheduler.add_dynamic_next(END_TARGET, output.clone());
        }

        info!(
            state = %definition.name(),
            execution_id = %trigger.execution_id,
            finished,
            is_final,
            "parallel join dispatched"
        );
        Ok(JoinOutcome::Joined { output, is_final })
    }

    /// Read a tracked branch output, polling while its write lags the counter.
    async fn await_branch_output<S: StateStore>(
        &self,
        store: &S,
        key: &str,
    ) -> Result<Value, ParallelError> {
        for attempt in 1..=self.poll_max_attempts {
            if let Some(value) = store.get(key).await.map_err(storage_failure("get", key))? {
                return Ok(value);
            }
            debug!(key = %key, attempt, "branch output not written yet");
            tokio::time::sleep(self.poll_interval).await;
        }
        Err(ParallelError::BranchOutputTimeout {
            key: key.to_string(),
            attempts: self.poll_max_attempts,
        })
    }

    async fn cleanup<S, A, D>(
        &self,
        record: &ParallelExecutionRecord,
        metadata_key: &str,
        consumed: &[&str],
        env: &StateEnv<'_, S, A, D>,
    ) -> Result<(), ParallelError>
    where
        S: StateStore,
        A: CounterTriggerAdmin,
        D: Scheduler,
    {
        let counter = &record.counter_name;
        env.store
            .delete_counter(counter)
            .await
            .map_err(storage_failure("delete_counter", counter))?;
        let trigger_key = counter_metadata_key(counter);
        env.triggers
            .delete_trigger(&trigger_key)
            .await
            .map_err(storage_failure("delete_trigger", &trigger_key))?;
        env.store
            .delete(metadata_key)
            .await
            .map_err(storage_failure("delete", metadata_key))?;
        for key in consumed {
            env.store
                .delete(key)
                .await
                .map_err(storage_failure("delete", key))?;
        }
        let set_key = &record.branch_output_keys_set_key;
        env.store
            .delete_set(set_key)
            .await
            .map_err(storage_failure("delete_set", set_key))?;

        debug!(counter = %counter, keys = consumed.len(), "parallel resources deleted");
        Ok(())
    }
}

/// Log a storage failure before it propagates.
fn storage_failure<'a>(
    operation: &'static str,
    key: &'a str,
) -> impl FnOnce(StorageError) -> ParallelError + 'a {
    move |e| {
        error!(operation, key = %key, error = %e, "storage operation failed");
        ParallelError::Storage(e)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
