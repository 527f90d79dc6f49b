//! InputPath / ResultPath / OutputPath transforms.
//!
//! Three pure functions over JSON values. A [`PathSpec::Identity`] (`"$"`,
//! also the default) passes data through, [`PathSpec::Empty`] (`null`)
//! yields `{}` for input and output and discards the task result for
//! ResultPath.

use serde_json::{Map, Value};
use statecraft_types::state::PathSpec;
use thiserror::Error;

use super::json_path::JsonPath;

/// Errors from the data-flow transforms.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("invalid JSON path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("InputPath '{0}' matched nothing in the state input")]
    InputPath(String),

    #[error("ResultPath error: {0}")]
    ResultPath(String),

    #[error("OutputPath '{0}' matched nothing in the state result")]
    OutputPath(String),
}

/// Derive the task input from the raw state input.
pub fn apply_input_path(spec: &PathSpec, raw: &Value) -> Result<Value, PathError> {
    match spec {
        PathSpec::Identity => Ok(raw.clone()),
        PathSpec::Empty => Ok(Value::Object(Map::new())),
        PathSpec::Path(expr) => {
            let path = JsonPath::compile(expr)?;
            path.first(raw)
                .cloned()
                .ok_or_else(|| PathError::InputPath(expr.clone()))
        }
    }
}

/// Combine the raw state input with the task output.
///
/// For a JSON-path, the final field segment names the key that receives the
/// result. If the path already matches inside `task_output`, that match is
/// used as the value; otherwise the whole output is. The pair is merged into
/// a copy of `raw`, and existing keys of `raw` win on collision.
pub fn apply_result_path(
    spec: &PathSpec,
    raw: &Value,
    task_output: &Value,
) -> Result<Value, PathError> {
    match spec {
        PathSpec::Identity => Ok(task_output.clone()),
        PathSpec::Empty => Ok(raw.clone()),
        PathSpec::Path(expr) => {
            let path = JsonPath::compile(expr)?;
            let key = path.last_field().ok_or_else(|| {
                PathError::ResultPath(format!("'{expr}' does not end in a field name"))
            })?;
            let Value::Object(raw_fields) = raw else {
                return Err(PathError::ResultPath(format!(
                    "cannot merge into non-object state input for '{expr}'"
                )));
            };

            let value = path.first(task_output).unwrap_or(task_output).clone();
            let mut merged = Map::with_capacity(raw_fields.len() + 1);
            merged.insert(key.to_string(), value);
            for (k, v) in raw_fields {
                merged.insert(k.clone(), v.clone());
            }
            Ok(Value::Object(merged))
        }
    }
}

/// Select the state output from the merged state.
pub fn apply_output_path(spec: &PathSpec, merged: &Value) -> Result<Value, PathError> {
    match spec {
        PathSpec::Identity => Ok(merged.clone()),
        PathSpec::Empty => Ok(Value::Object(Map::new())),
        PathSpec::Path(expr) => {
            let path = JsonPath::compile(expr)?;
            path.first(merged)
                .cloned()
                .ok_or_else(|| PathError::OutputPath(expr.clone()))
        }
    }
}
