//! State definition parsing and validation.
//!
//! The scheduler hands the interpreter a declared type name, the state name
//! and the state's JSON document. Parsing happens once per invocation and the
//! resulting [`StateDefinition`] is never mutated afterwards.

use serde_json::Value;
use statecraft_types::error::UnknownStateType;
use statecraft_types::state::{BARE_TASK_TYPE, StateBody, StateType};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while parsing a state definition.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    /// The document is not valid JSON or does not fit the state shape.
    #[error("parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    UnknownStateType(#[from] UnknownStateType),

    /// The declared type differs from the document's `Type` field.
    #[error("state '{state}' declared as '{declared}' but its definition has Type {found:?}")]
    TypeMismatch {
        state: String,
        declared: String,
        found: Option<String>,
    },

    #[error("validation error: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// StateDefinition
// ---------------------------------------------------------------------------

/// A parsed, validated state.
#[derive(Debug, Clone, PartialEq)]
pub struct StateDefinition {
    name: String,
    state_type: StateType,
    raw: Value,
    body: StateBody,
}

impl StateDefinition {
    /// Parse a state document.
    ///
    /// `Task_SAND` names a bare task: the document is not read and every
    /// field takes its default.
    pub fn parse(type_name: &str, name: &str, document: &str) -> Result<Self, DefinitionError> {
        if type_name == BARE_TASK_TYPE {
            return Ok(Self::bare_task(name));
        }
        let raw: Value =
            serde_json::from_str(document).map_err(|e| DefinitionError::Parse(e.to_string()))?;
        Self::from_value(type_name, name, raw)
    }

    /// Build a definition from an already-decoded document.
    pub fn from_value(type_name: &str, name: &str, raw: Value) -> Result<Self, DefinitionError> {
        let state_type: StateType = type_name.parse()?;
        if type_name == BARE_TASK_TYPE {
            return Ok(Self::bare_task(name));
        }

        let body: StateBody = serde_json::from_value(raw.clone())
            .map_err(|e| DefinitionError::Parse(format!("state '{name}': {e}")))?;

        if body.state_type.as_deref() != Some(type_name) {
            return Err(DefinitionError::TypeMismatch {
                state: name.to_string(),
                declared: type_name.to_string(),
                found: body.state_type.clone(),
            });
        }

        let definition = Self {
            name: name.to_string(),
            state_type,
            raw,
            body,
        };
        definition.validate()?;
        Ok(definition)
    }

    fn bare_task(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state_type: StateType::Task,
            raw: Value::Object(serde_json::Map::new()),
            body: StateBody::default(),
        }
    }

    fn validate(&self) -> Result<(), DefinitionError> {
        if self.state_type == StateType::Parallel {
            let declared = self.body.branch_count.ok_or_else(|| {
                DefinitionError::Validation(format!(
                    "Parallel state '{}' is missing BranchCount",
                    self.name
                ))
            })?;
            if declared != self.body.branches.len() {
                return Err(DefinitionError::Validation(format!(
                    "Parallel state '{}' declares BranchCount {declared} but has {} branches",
                    self.name,
                    self.body.branches.len()
                )));
            }
            if declared == 0 {
                return Err(DefinitionError::Validation(format!(
                    "Parallel state '{}' has no branches",
                    self.name
                )));
            }
        }

        if self
            .body
            .parent_parallel_info
            .as_ref()
            .is_some_and(|lineage| lineage.branch_counter == 0)
        {
            return Err(DefinitionError::Validation(format!(
                "state '{}' has BranchCounter 0; branch indices are 1-based",
                self.name
            )));
        }

        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state_type(&self) -> StateType {
        self.state_type
    }

    /// The document as received.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn body(&self) -> &StateBody {
        &self.body
    }

    /// Whether this state ends a Parallel branch and must record its output.
    pub fn is_branch_terminal(&self) -> bool {
        self.body.end && self.body.parent_parallel_info.is_some()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use statecraft_types::state::PathSpec;

    #[test]
    fn test_parse_task_with_policies() {
        let doc = r#"{
            "Type": "Task",
            "Next": "Check",
            "InputPath": "$.order",
            "Retry": [{"ErrorEquals": ["States.ALL"], "MaxAttempts": 2}],
            "Catch": [{"ErrorEquals": ["ValueError"], "Next": "Recover"}]
        }"#;
        let def = StateDefinition::parse("Task", "Charge", doc).unwrap();
        assert_eq!(def.name(), "Charge");
        assert_eq!(def.state_type(), StateType::Task);
        assert_eq!(def.body().next.as_deref(), Some("Check"));
        assert_eq!(def.body().input_path, PathSpec::Path("$.order".to_string()));
        assert_eq!(def.body().retry[0].max_attempts, 2);
        assert_eq!(def.body().catch[0].next, "Recover");
        assert_eq!(def.raw()["Type"], json!("Task"));
    }

    #[test]
    fn test_bare_task_skips_document() {
        let def = StateDefinition::parse("Task_SAND", "Echo", "not json").unwrap();
        assert_eq!(def.state_type(), StateType::Task);
        assert!(def.body().input_path.is_identity());
        assert!(def.body().retry.is_empty());
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let err = StateDefinition::parse("Pass", "P", r#"{"Type": "Task"}"#).unwrap_err();
        assert!(matches!(err, DefinitionError::TypeMismatch { .. }));

        let err = StateDefinition::parse("Pass", "P", r#"{"End": true}"#).unwrap_err();
        assert!(matches!(err, DefinitionError::TypeMismatch { found: None, .. }));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let err = StateDefinition::parse("Map", "M", r#"{"Type": "Map"}"#).unwrap_err();
        assert_eq!(
            err,
            DefinitionError::UnknownStateType(UnknownStateType("Map".to_string()))
        );
        assert_eq!(err.clone(), err);
    }

    #[test]
    fn test_malformed_json_rejected() {
        let err = StateDefinition::parse("Pass", "P", "{").unwrap_err();
        assert!(matches!(err, DefinitionError::Parse(_)));
    }

    #[test]
    fn test_parallel_branch_count_must_match() {
        let doc = json!({
            "Type": "Parallel",
            "BranchCount": 3,
            "Branches": [{"StartAt": "A"}, {"StartAt": "B"}]
        });
        let err = StateDefinition::from_value("Parallel", "Fan", doc).unwrap_err();
        assert!(matches!(err, DefinitionError::Validation(_)));

        let doc = json!({
            "Type": "Parallel",
            "BranchCount": 2,
            "Branches": [{"StartAt": "A"}, {"StartAt": "B"}],
            "Next": "After"
        });
        let def = StateDefinition::from_value("Parallel", "Fan", doc).unwrap();
        assert_eq!(def.body().branches.len(), 2);
    }

    #[test]
    fn test_parallel_requires_branch_count() {
        let doc = json!({"Type": "Parallel", "Branches": [{"StartAt": "A"}]});
        let err = StateDefinition::from_value("Parallel", "Fan", doc).unwrap_err();
        assert!(matches!(err, DefinitionError::Validation(_)));
    }

    #[test]
    fn test_branch_terminal_detection() {
        let doc = json!({
            "Type": "Pass",
            "End": true,
            "ParentParallelInfo": {"Name": "Fan", "BranchCounter": 1}
        });
        let def = StateDefinition::from_value("Pass", "Last", doc).unwrap();
        assert!(def.is_branch_terminal());

        let doc = json!({
            "Type": "Pass",
            "End": true,
            "ParentParallelInfo": {"Name": "Fan", "BranchCounter": 0}
        });
        let err = StateDefinition::from_value("Pass", "Last", doc).unwrap_err();
        assert!(matches!(err, DefinitionError::Validation(_)));
    }
}
