//! Scheduler collaborator trait.
//!
//! The scheduler owns dispatch; the interpreter only asks for follow-up
//! invocations. Fan-out calls it once per branch.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A follow-up invocation requested from the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicNext {
    pub next: String,
    pub value: Value,
}

impl DynamicNext {
    pub fn new(next: impl Into<String>, value: Value) -> Self {
        Self {
            next: next.into(),
            value,
        }
    }
}

/// Requests that a state be invoked next with the given input.
pub trait Scheduler: Send + Sync {
    fn add_dynamic_next(&self, next: &str, input: Value);
}
