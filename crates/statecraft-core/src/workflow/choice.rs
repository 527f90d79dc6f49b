//! Choice rule compiler and evaluator.
//!
//! Each entry of a Choice state's `Choices` list compiles into a tree of
//! [`ConditionNode`]s. All trees share one arena; combinators reference their
//! children by arena index. Evaluation walks the trees in declaration order
//! and returns the `Next` of the first one that holds.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use super::json_path::JsonPath;
use crate::scheduler::DynamicNext;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChoiceError {
    #[error("no choice rule matched and no Default is set")]
    NoChoiceMatched,

    #[error("invalid choice rule: {0}")]
    InvalidRule(String),

    #[error("choice variable '{0}' matched nothing in the state input")]
    VariableNotFound(String),
}

// ---------------------------------------------------------------------------
// Operators and operands
// ---------------------------------------------------------------------------

/// Leaf comparison operators. `And`, `Or` and `Not` are combinators and live
/// in [`ConditionNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonOperator {
    BooleanEquals,
    NumericEquals,
    NumericGreaterThan,
    NumericGreaterThanEquals,
    NumericLessThan,
    NumericLessThanEquals,
    StringEquals,
    StringGreaterThan,
    StringGreaterThanEquals,
    StringLessThan,
    StringLessThanEquals,
    TimestampEquals,
    TimestampGreaterThan,
    TimestampGreaterThanEquals,
    TimestampLessThan,
    TimestampLessThanEquals,
}

impl ComparisonOperator {
    pub const ALL: [ComparisonOperator; 16] = [
        Self::BooleanEquals,
        Self::NumericEquals,
        Self::NumericGreaterThan,
        Self::NumericGreaterThanEquals,
        Self::NumericLessThan,
        Self::NumericLessThanEquals,
        Self::StringEquals,
        Self::StringGreaterThan,
        Self::StringGreaterThanEquals,
        Self::StringLessThan,
        Self::StringLessThanEquals,
        Self::TimestampEquals,
        Self::TimestampGreaterThan,
        Self::TimestampGreaterThanEquals,
        Self::TimestampLessThan,
        Self::TimestampLessThanEquals,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BooleanEquals => "BooleanEquals",
            Self::NumericEquals => "NumericEquals",
            Self::NumericGreaterThan => "NumericGreaterThan",
            Self::NumericGreaterThanEquals => "NumericGreaterThanEquals",
            Self::NumericLessThan => "NumericLessThan",
            Self::NumericLessThanEquals => "NumericLessThanEquals",
            Self::StringEquals => "StringEquals",
            Self::StringGreaterThan => "StringGreaterThan",
            Self::StringGreaterThanEquals => "StringGreaterThanEquals",
            Self::StringLessThan => "StringLessThan",
            Self::StringLessThanEquals => "StringLessThanEquals",
            Self::TimestampEquals => "TimestampEquals",
            Self::TimestampGreaterThan => "TimestampGreaterThan",
            Self::TimestampGreaterThanEquals => "TimestampGreaterThanEquals",
            Self::TimestampLessThan => "TimestampLessThan",
            Self::TimestampLessThanEquals => "TimestampLessThanEquals",
        }
    }

    /// Whether `ordering` (actual compared to operand) satisfies the operator.
    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            Self::BooleanEquals | Self::NumericEquals | Self::StringEquals | Self::TimestampEquals => {
                ordering == Ordering::Equal
            }
            Self::NumericGreaterThan | Self::StringGreaterThan | Self::TimestampGreaterThan => {
                ordering == Ordering::Greater
            }
            Self::NumericGreaterThanEquals
            | Self::StringGreaterThanEquals
            | Self::TimestampGreaterThanEquals => ordering != Ordering::Less,
            Self::NumericLessThan | Self::StringLessThan | Self::TimestampLessThan => {
                ordering == Ordering::Less
            }
            Self::NumericLessThanEquals
            | Self::StringLessThanEquals
            | Self::TimestampLessThanEquals => ordering != Ordering::Greater,
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComparisonOperator {
    type Err = ChoiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| ChoiceError::InvalidRule(format!("unknown operator '{s}'")))
    }
}

/// Typed literal a leaf compares against.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Boolean(bool),
    Number(f64),
    String(String),
    Timestamp(DateTime<FixedOffset>),
}

impl Operand {
    fn for_operator(op: ComparisonOperator, literal: &Value) -> Result<Self, ChoiceError> {
        let wrong_type = |expected: &str| {
            ChoiceError::InvalidRule(format!("{op} expects a {expected} operand, got {literal}"))
        };
        match op {
            ComparisonOperator::BooleanEquals => {
                literal.as_bool().map(Operand::Boolean).ok_or_else(|| wrong_type("boolean"))
            }
            ComparisonOperator::NumericEquals
            | ComparisonOperator::NumericGreaterThan
            | ComparisonOperator::NumericGreaterThanEquals
            | ComparisonOperator::NumericLessThan
            | ComparisonOperator::NumericLessThanEquals => {
                literal.as_f64().map(Operand::Number).ok_or_else(|| wrong_type("number"))
            }
            ComparisonOperator::StringEquals
            | ComparisonOperator::StringGreaterThan
            | ComparisonOperator::StringGreaterThanEquals
            | ComparisonOperator::StringLessThan
            | ComparisonOperator::StringLessThanEquals => literal
                .as_str()
                .map(|s| Operand::String(s.to_string()))
                .ok_or_else(|| wrong_type("string")),
            ComparisonOperator::TimestampEquals
            | ComparisonOperator::TimestampGreaterThan
            | ComparisonOperator::TimestampGreaterThanEquals
            | ComparisonOperator::TimestampLessThan
            | ComparisonOperator::TimestampLessThanEquals => literal
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(Operand::Timestamp)
                .ok_or_else(|| wrong_type("RFC 3339 timestamp")),
        }
    }

    /// Order `actual` against this operand. `None` when `actual` has the
    /// wrong JSON type, which makes the comparison false.
    fn compare(&self, actual: &Value) -> Option<Ordering> {
        match self {
            Operand::Boolean(expected) => actual.as_bool().map(|b| b.cmp(expected)),
            Operand::Number(expected) => actual.as_f64().and_then(|n| n.partial_cmp(expected)),
            Operand::String(expected) => actual.as_str().map(|s| s.cmp(expected.as_str())),
            Operand::Timestamp(expected) => actual
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|ts| ts.cmp(expected)),
        }
    }
}

// ---------------------------------------------------------------------------
// Condition tree
// ---------------------------------------------------------------------------

/// A leaf comparison: `Variable <operator> operand`.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub variable: JsonPath,
    pub operator: ComparisonOperator,
    pub operand: Operand,
}

/// One node of the rule arena.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionNode {
    Leaf(Comparison),
    And(Vec<usize>),
    Or(Vec<usize>),
    Not(usize),
}

/// Root of one compiled rule and the state it routes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceRule {
    pub root: usize,
    pub next: String,
}

/// All compiled rules of a Choice state.
#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceRules {
    nodes: Vec<ConditionNode>,
    rules: Vec<ChoiceRule>,
    default: Option<String>,
}

impl ChoiceRules {
    /// Compile a `Choices` list. Every top-level rule needs a `Next`.
    pub fn compile(choices: &[Value], default: Option<&str>) -> Result<Self, ChoiceError> {
        let mut rules = ChoiceRules {
            nodes: Vec::new(),
            rules: Vec::with_capacity(choices.len()),
            default: default.map(str::to_string),
        };

        for (idx, choice) in choices.iter().enumerate() {
            let fields = as_rule_object(choice)?;
            let next = fields
                .get("Next")
                .and_then(Value::as_str)
                .ok_or_else(|| ChoiceError::InvalidRule(format!("choice {idx} has no Next")))?
                .to_string();
            let root = rules.build(fields)?;
            rules.rules.push(ChoiceRule { root, next });
        }

        debug!(
            rules = rules.rules.len(),
            nodes = rules.nodes.len(),
            has_default = rules.default.is_some(),
            "compiled choice rules"
        );
        Ok(rules)
    }

    /// Add the subtree for `fields` and return its root index.
    fn build(&mut self, fields: &Map<String, Value>) -> Result<usize, ChoiceError> {
        if let Some(children) = fields.get("And") {
            let children = self.build_children("And", children)?;
            return Ok(self.push(ConditionNode::And(children)));
        }
        if let Some(children) = fields.get("Or") {
            let children = self.build_children("Or", children)?;
            return Ok(self.push(ConditionNode::Or(children)));
        }
        if let Some(inner) = fields.get("Not") {
            let Value::Object(inner) = inner else {
                return Err(ChoiceError::InvalidRule("Not must be an object".to_string()));
            };
            let child = self.build(inner)?;
            return Ok(self.push(ConditionNode::Not(child)));
        }
        let leaf = Self::build_leaf(fields)?;
        Ok(self.push(ConditionNode::Leaf(leaf)))
    }

    fn build_children(&mut self, name: &str, children: &Value) -> Result<Vec<usize>, ChoiceError> {
        let items = children
            .as_array()
            .filter(|items| !items.is_empty())
            .ok_or_else(|| ChoiceError::InvalidRule(format!("{name} must be a non-empty array")))?;
        items
            .iter()
            .map(|child| {
                let child = as_rule_object(child)?;
                self.build(child)
            })
            .collect()
    }

    fn build_leaf(fields: &Map<String, Value>) -> Result<Comparison, ChoiceError> {
        let variable = fields
            .get("Variable")
            .and_then(Value::as_str)
            .ok_or_else(|| ChoiceError::InvalidRule("comparison has no Variable".to_string()))?;
        let variable = JsonPath::compile(variable)
            .map_err(|e| ChoiceError::InvalidRule(e.to_string()))?;

        let (operator, literal) = fields
            .iter()
            .find_map(|(key, value)| {
                ComparisonOperator::from_str(key)
                    .ok()
                    .map(|op| (op, value))
            })
            .ok_or_else(|| {
                ChoiceError::InvalidRule(format!(
                    "comparison on '{variable}' has no known operator"
                ))
            })?;
        let operand = Operand::for_operator(operator, literal)?;

        Ok(Comparison {
            variable,
            operator,
            operand,
        })
    }

    fn push(&mut self, node: ConditionNode) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn rules(&self) -> &[ChoiceRule] {
        &self.rules
    }

    pub fn node(&self, idx: usize) -> Option<&ConditionNode> {
        self.nodes.get(idx)
    }

    pub fn default_next(&self) -> Option<&str> {
        self.default.as_deref()
    }

    /// Pick the next state for `input`.
    pub fn evaluate(&self, input: &Value) -> Result<String, ChoiceError> {
        for (idx, rule) in self.rules.iter().enumerate() {
            if self.eval_node(rule.root, input)? {
                debug!(rule = idx, next = %rule.next, "choice rule matched");
                return Ok(rule.next.clone());
            }
        }
        match &self.default {
            Some(default) => {
                debug!(next = %default, "no choice rule matched, using Default");
                Ok(default.clone())
            }
            None => Err(ChoiceError::NoChoiceMatched),
        }
    }

    fn eval_node(&self, idx: usize, input: &Value) -> Result<bool, ChoiceError> {
        let node = self
            .nodes
            .get(idx)
            .ok_or_else(|| ChoiceError::InvalidRule(format!("dangling node index {idx}")))?;
        match node {
            ConditionNode::Leaf(cmp) => {
                let actual = cmp
                    .variable
                    .first(input)
                    .ok_or_else(|| ChoiceError::VariableNotFound(cmp.variable.to_string()))?;
                Ok(cmp
                    .operand
                    .compare(actual)
                    .is_some_and(|ordering| cmp.operator.accepts(ordering)))
            }
            ConditionNode::And(children) => {
                for child in children {
                    if !self.eval_node(*child, input)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            ConditionNode::Or(children) => {
                for child in children {
                    if self.eval_node(*child, input)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            ConditionNode::Not(child) => Ok(!self.eval_node(*child, input)?),
        }
    }
}

fn as_rule_object(value: &Value) -> Result<&Map<String, Value>, ChoiceError> {
    value
        .as_object()
        .ok_or_else(|| ChoiceError::InvalidRule(format!("rule must be an object, got {value}")))
}

/// Scheduler dispatch list for a Choice state that picked `next`.
pub fn choice_results(next: &str, value: Value) -> Vec<DynamicNext> {
    vec![DynamicNext::new(next, value)]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
