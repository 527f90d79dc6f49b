//! Run context handed to every state invocation.
//!
//! `RunContext` identifies the workflow run and carries its metadata bag.
//! `StateEnv` bundles the external collaborators a state may touch.
//! `ParallelKeys` derives the deterministic storage key names of a fan-out.

use serde::{Deserialize, Serialize};
use statecraft_types::metadata::ExecutionMetadata;
use uuid::Uuid;

use crate::scheduler::Scheduler;
use crate::storage::counter_trigger::CounterTriggerAdmin;
use crate::storage::state_store::StateStore;

// ---------------------------------------------------------------------------
// RunContext
// ---------------------------------------------------------------------------

/// Identity and metadata of the run a state executes in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    /// Run key shared by every state of the run, including Parallel branches.
    pub execution_id: String,
    /// Workflow-scoped topic of the state; prefixes generated storage keys.
    pub topic: String,
    /// Address the storage layer calls back when a join trigger fires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub metadata: ExecutionMetadata,
}

impl RunContext {
    pub fn new(execution_id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            topic: topic.into(),
            endpoint: None,
            metadata: ExecutionMetadata::default(),
        }
    }

    /// Start a new run with a fresh time-ordered execution id.
    pub fn start(topic: impl Into<String>) -> Self {
        Self::new(Uuid::now_v7().to_string(), topic)
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_metadata(mut self, metadata: ExecutionMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Same run, re-targeted at another state's topic.
    pub fn for_topic(&self, topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..self.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// StateEnv
// ---------------------------------------------------------------------------

/// External collaborators available to a state invocation.
pub struct StateEnv<'a, S, A, D> {
    pub store: &'a S,
    pub triggers: &'a A,
    pub scheduler: &'a D,
}

impl<'a, S, A, D> StateEnv<'a, S, A, D>
where
    S: StateStore,
    A: CounterTriggerAdmin,
    D: Scheduler,
{
    pub fn new(store: &'a S, triggers: &'a A, scheduler: &'a D) -> Self {
        Self {
            store,
            triggers,
            scheduler,
        }
    }
}

// ---------------------------------------------------------------------------
// ParallelKeys
// ---------------------------------------------------------------------------

/// Storage key names of one Parallel fan-out, all prefixed `<topic>_<executionId>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParallelKeys {
    prefix: String,
}

impl ParallelKeys {
    pub fn new(topic: &str, execution_id: &str) -> Self {
        Self {
            prefix: format!("{topic}_{execution_id}"),
        }
    }

    pub fn for_run(run: &RunContext) -> Self {
        Self::new(&run.topic, &run.execution_id)
    }

    /// Output key of the 1-based `branch`.
    pub fn branch_output(&self, branch: usize) -> String {
        format!("{}_branch_{branch}", self.prefix)
    }

    pub fn counter(&self) -> String {
        format!("{}_counter", self.prefix)
    }

    /// Trigger-table key of the counter's registration.
    pub fn counter_metadata(&self) -> String {
        counter_metadata_key(&self.counter())
    }

    pub fn workflow_metadata(&self) -> String {
        format!("{}_workflow_metadata", self.prefix)
    }

    pub fn output_keys_set(&self) -> String {
        format!("{}_outputkeys_set", self.prefix)
    }
}

/// Trigger-table key for `counter_name`.
pub fn counter_metadata_key(counter_name: &str) -> String {
    format!("{counter_name}_metadata")
}
