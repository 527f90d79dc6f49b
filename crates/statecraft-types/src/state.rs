//! State definition types.
//!
//! A state arrives at the interpreter as a JSON document in Amazon States
//! Language shape (`"Type": "Task"`, `"Next": ...`, `"Retry": [...]`). This
//! module holds the serde representation of that document; parsing and
//! validation live in `statecraft-core`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::UnknownStateType;

/// Type name used by the scheduler for a bare task that carries no definition body.
pub const BARE_TASK_TYPE: &str = "Task_SAND";

// ---------------------------------------------------------------------------
// State type
// ---------------------------------------------------------------------------

/// The kind of state being interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateType {
    #[default]
    #[serde(alias = "Task_SAND")]
    Task,
    Choice,
    Pass,
    Succeed,
    Fail,
    Wait,
    Parallel,
}

impl StateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateType::Task => "Task",
            StateType::Choice => "Choice",
            StateType::Pass => "Pass",
            StateType::Succeed => "Succeed",
            StateType::Fail => "Fail",
            StateType::Wait => "Wait",
            StateType::Parallel => "Parallel",
        }
    }
}

impl fmt::Display for StateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StateType {
    type Err = UnknownStateType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Task" | BARE_TASK_TYPE => Ok(StateType::Task),
            "Choice" => Ok(StateType::Choice),
            "Pass" => Ok(StateType::Pass),
            "Succeed" => Ok(StateType::Succeed),
            "Fail" => Ok(StateType::Fail),
            "Wait" => Ok(StateType::Wait),
            "Parallel" => Ok(StateType::Parallel),
            other => Err(UnknownStateType(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Path specifier
// ---------------------------------------------------------------------------

/// Value of an `InputPath`, `ResultPath` or `OutputPath` field.
///
/// - `"$"` is [`PathSpec::Identity`] (also the default when the field is absent)
/// - JSON `null` is [`PathSpec::Empty`]
/// - any other string is a JSON-path expression
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PathSpec {
    #[default]
    Identity,
    Empty,
    Path(String),
}

impl PathSpec {
    pub fn is_identity(&self) -> bool {
        matches!(self, PathSpec::Identity)
    }
}

impl From<Option<String>> for PathSpec {
    fn from(value: Option<String>) -> Self {
        match value {
            None => PathSpec::Empty,
            Some(path) if path == "$" => PathSpec::Identity,
            Some(path) => PathSpec::Path(path),
        }
    }
}

impl Serialize for PathSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PathSpec::Identity => serializer.serialize_str("$"),
            PathSpec::Empty => serializer.serialize_none(),
            PathSpec::Path(path) => serializer.serialize_str(path),
        }
    }
}

impl<'de> Deserialize<'de> for PathSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<String>::deserialize(deserializer).map(PathSpec::from)
    }
}

// ---------------------------------------------------------------------------
// Retry / Catch policies
// ---------------------------------------------------------------------------

/// One `Retry` entry of a Task state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RetryPolicy {
    /// Error names (type names or messages) this retrier handles.
    pub error_equals: Vec<String>,
    /// Number of re-invocations after the first failure (default 1).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry, in seconds (default 1).
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: f64,
    /// Multiplier applied to the delay on each subsequent retry (default 1.0).
    #[serde(default = "default_backoff_rate")]
    pub backoff_rate: f64,
}

fn default_max_attempts() -> u32 {
    1
}

fn default_interval_seconds() -> f64 {
    1.0
}

fn default_backoff_rate() -> f64 {
    1.0
}

impl RetryPolicy {
    /// Delay before the `retry`-th re-invocation (1-based):
    /// `interval * backoff^(retry - 1)`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let secs = self.interval_seconds * self.backoff_rate.powi(exponent);
        if secs.is_nan() || secs <= 0.0 {
            return Duration::ZERO;
        }
        // Too large for a Duration (including +inf) saturates.
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

/// One `Catch` entry of a Task state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CatchPolicy {
    pub error_equals: Vec<String>,
    /// State that receives the error payload.
    pub next: String,
    /// Overrides the state's `ResultPath` when this catcher fires.
    #[serde(default)]
    pub result_path: PathSpec,
}

// ---------------------------------------------------------------------------
// Parallel lineage
// ---------------------------------------------------------------------------

/// One branch of a Parallel state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BranchDefinition {
    /// First state of the branch; dispatched at fan-out.
    pub start_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub states: Option<Value>,
}

/// Lineage carried by a branch's terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ParentParallelInfo {
    /// Name of the owning Parallel state.
    pub name: String,
    /// 1-based index of this branch within the Parallel state.
    pub branch_counter: usize,
}

// ---------------------------------------------------------------------------
// State body
// ---------------------------------------------------------------------------

/// Typed view of a state definition document.
///
/// Every state type shares this struct; fields that do not apply to a type
/// are simply absent. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StateBody {
    #[serde(rename = "Type", default, skip_serializing_if = "Option::is_none")]
    pub state_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(default)]
    pub end: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    #[serde(default)]
    pub input_path: PathSpec,
    #[serde(default)]
    pub output_path: PathSpec,
    #[serde(default)]
    pub result_path: PathSpec,

    // Task
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry: Vec<RetryPolicy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub catch: Vec<CatchPolicy>,

    // Choice
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    // Pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    // Fail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,

    // Wait
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconds: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconds_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_path: Option<String>,

    // Parallel
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<BranchDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_count: Option<usize>,

    // Branch terminal states
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_parallel_info: Option<ParentParallelInfo>,
}
