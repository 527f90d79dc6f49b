//! Run-scoped execution metadata and Parallel-state bookkeeping records.
//!
//! Metadata travels with every state invocation of a run and is persisted as
//! a flat JSON object whenever it has to cross a branch boundary. The reserved
//! `__`-prefixed keys and the `<state>_<execution>_parallel_info` entries are
//! given typed fields and accessors here; anything else is kept verbatim.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Suffix of the metadata key holding a Parallel state's record.
pub const PARALLEL_INFO_SUFFIX: &str = "_parallel_info";

// ---------------------------------------------------------------------------
// StateAction
// ---------------------------------------------------------------------------

/// Value of the reserved `__state_action` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateAction {
    /// The invocation is the join of a Parallel state, triggered by its counter.
    PostParallelProcessing,
    /// Any action this interpreter does not act on.
    #[serde(other)]
    Other,
}

// ---------------------------------------------------------------------------
// ParallelExecutionRecord
// ---------------------------------------------------------------------------

/// Bookkeeping for one Parallel fan-out, stored in the run metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ParallelExecutionRecord {
    /// Distributed counter incremented by each finished branch.
    pub counter_name: String,
    /// Output key per branch, in branch order.
    pub branch_output_keys: Vec<String>,
    /// Set tracking which branch output keys have been written.
    pub branch_output_keys_set_key: String,
    /// Counter values at which the join is triggered; the last is final.
    pub klist: Vec<u64>,
    pub total_branches: usize,
    pub execution_id: String,
    pub function_topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl ParallelExecutionRecord {
    /// Counter value at which all branches are done.
    pub fn join_threshold(&self) -> u64 {
        self.klist
            .last()
            .copied()
            .unwrap_or(self.total_branches as u64)
    }

    /// Output key of the 1-based `branch`, if it exists.
    pub fn branch_output_key(&self, branch: usize) -> Option<&str> {
        branch
            .checked_sub(1)
            .and_then(|idx| self.branch_output_keys.get(idx))
            .map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// CounterTriggerMetadata
// ---------------------------------------------------------------------------

/// Trigger registration stored next to a Parallel counter.
///
/// When the counter reaches a `Klist` threshold the storage layer invokes the
/// Parallel state again with this document as input, `CounterValue` filled in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CounterTriggerMetadata {
    #[serde(rename = "__state_action")]
    pub state_action: StateAction,
    #[serde(rename = "__async_execution", default)]
    pub async_execution: bool,
    /// Key under which the full run metadata was persisted at fan-out.
    pub workflow_instance_metadata_storage_key: String,
    #[serde(default)]
    pub counter_value: i64,
    pub klist: Vec<u64>,
    pub total_branches: usize,
    pub execution_id: String,
    pub function_topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

// ---------------------------------------------------------------------------
// ExecutionMetadata
// ---------------------------------------------------------------------------

/// A metadata entry that is not one of the reserved keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataEntry {
    ParallelInfo(ParallelExecutionRecord),
    Value(Value),
}

/// Run-scoped key/value bag threaded through state invocations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    /// Reserved `__state_action` key.
    #[serde(rename = "__state_action", default, skip_serializing_if = "Option::is_none")]
    pub state_action: Option<StateAction>,
    /// Reserved `__async_execution` key, copied into trigger metadata at fan-out.
    #[serde(rename = "__async_execution", default)]
    pub async_execution: bool,
    #[serde(flatten)]
    entries: BTreeMap<String, MetadataEntry>,
}

impl ExecutionMetadata {
    /// Metadata key of the record for `state_name` in execution `execution_id`.
    pub fn parallel_info_key(state_name: &str, execution_id: &str) -> String {
        format!("{state_name}_{execution_id}{PARALLEL_INFO_SUFFIX}")
    }

    /// Whether this invocation is a Parallel join.
    pub fn is_post_parallel(&self) -> bool {
        self.state_action == Some(StateAction::PostParallelProcessing)
    }

    pub fn parallel_info(
        &self,
        state_name: &str,
        execution_id: &str,
    ) -> Option<&ParallelExecutionRecord> {
        match self
            .entries
            .get(&Self::parallel_info_key(state_name, execution_id))
        {
            Some(MetadataEntry::ParallelInfo(record)) => Some(record),
            _ => None,
        }
    }

    pub fn set_parallel_info(
        &mut self,
        state_name: &str,
        execution_id: &str,
        record: ParallelExecutionRecord,
    ) {
        self.entries.insert(
            Self::parallel_info_key(state_name, execution_id),
            MetadataEntry::ParallelInfo(record),
        );
    }

    pub fn get(&self, key: &str) -> Option<&MetadataEntry> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), MetadataEntry::Value(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> ParallelExecutionRecord {
        ParallelExecutionRecord {
            counter_name: "fan_run1_counter".to_string(),
            branch_output_keys: vec![
                "fan_run1_branch_1".to_string(),
                "fan_run1_branch_2".to_string(),
            ],
            branch_output_keys_set_key: "fan_run1_outputkeys_set".to_string(),
            klist: vec![2],
            total_branches: 2,
            execution_id: "run1".to_string(),
            function_topic: "fan".to_string(),
            endpoint: None,
        }
    }

    #[test]
    fn test_metadata_parses_reserved_and_parallel_entries() {
        let raw = json!({
            "__state_action": "post_parallel_processing",
            "__async_execution": true,
            "Fan_run1_parallel_info": serde_json::to_value(record()).unwrap(),
            "caller": "scheduler"
        });
        let metadata: ExecutionMetadata = serde_json::from_value(raw).unwrap();
        assert!(metadata.is_post_parallel());
        assert!(metadata.async_execution);
        assert_eq!(metadata.parallel_info("Fan", "run1"), Some(&record()));
        assert_eq!(
            metadata.get("caller"),
            Some(&MetadataEntry::Value(json!("scheduler")))
        );
    }

    #[test]
    fn test_metadata_serializes_flat() {
        let mut metadata = ExecutionMetadata::default();
        metadata.set_parallel_info("Fan", "run1", record());
        metadata.insert("trace", json!(7));

        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(value["__async_execution"], json!(false));
        assert_eq!(
            value["Fan_run1_parallel_info"]["CounterName"],
            json!("fan_run1_counter")
        );
        assert_eq!(value["trace"], json!(7));
        assert!(value.get("__state_action").is_none());
    }

    #[test]
    fn test_unknown_state_action_is_other() {
        let metadata: ExecutionMetadata =
            serde_json::from_value(json!({"__state_action": "resume"})).unwrap();
        assert_eq!(metadata.state_action, Some(StateAction::Other));
        assert!(!metadata.is_post_parallel());
    }

    #[test]
    fn test_record_threshold_and_branch_keys() {
        let record = record();
        assert_eq!(record.join_threshold(), 2);
        assert_eq!(record.branch_output_key(1), Some("fan_run1_branch_1"));
        assert_eq!(record.branch_output_key(0), None);
        assert_eq!(record.branch_output_key(3), None);
    }

    #[test]
    fn test_counter_trigger_metadata_field_names() {
        let trigger: CounterTriggerMetadata = serde_json::from_value(json!({
            "__state_action": "post_parallel_processing",
            "WorkflowInstanceMetadataStorageKey": "fan_run1_workflow_metadata",
            "CounterValue": 2,
            "Klist": [2],
            "TotalBranches": 2,
            "ExecutionId": "run1",
            "FunctionTopic": "fan"
        }))
        .unwrap();
        assert_eq!(trigger.state_action, StateAction::PostParallelProcessing);
        assert_eq!(trigger.counter_value, 2);
        assert!(!trigger.async_execution);
    }
}
