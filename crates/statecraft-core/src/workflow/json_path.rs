//! JSON-path expressions used by data-flow paths, Choice variables and Wait
//! paths.
//!
//! Supported syntax: `$`, `.field`, `['field']`, `["field"]`, `[n]`, `[*]`
//! and `.*`. Every expression starts at the root `$`.

use std::fmt;

use serde_json::Value;

use super::paths::PathError;

/// One step of a compiled path.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Field(String),
    Index(usize),
    Wildcard,
}

/// A compiled JSON-path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    expression: String,
    segments: Vec<Segment>,
}

impl JsonPath {
    /// Compile an expression, rejecting anything outside the supported syntax.
    pub fn compile(expression: &str) -> Result<Self, PathError> {
        let invalid = |reason: &str| PathError::InvalidPath {
            path: expression.to_string(),
            reason: reason.to_string(),
        };

        let Some(mut rest) = expression.trim().strip_prefix('$') else {
            return Err(invalid("must start with '$'"));
        };

        let mut segments = Vec::new();
        while !rest.is_empty() {
            if let Some(after_dot) = rest.strip_prefix('.') {
                if let Some(after_star) = after_dot.strip_prefix('*') {
                    segments.push(Segment::Wildcard);
                    rest = after_star;
                    continue;
                }
                let end = after_dot
                    .find(['.', '['])
                    .unwrap_or(after_dot.len());
                if end == 0 {
                    return Err(invalid("empty field name"));
                }
                segments.push(Segment::Field(after_dot[..end].to_string()));
                rest = &after_dot[end..];
            } else if let Some(after_bracket) = rest.strip_prefix('[') {
                let (segment, remaining) = Self::parse_bracket(after_bracket).ok_or_else(|| {
                    invalid("malformed bracket selector")
                })?;
                segments.push(segment);
                rest = remaining;
            } else {
                return Err(invalid("expected '.' or '['"));
            }
        }

        Ok(Self {
            expression: expression.to_string(),
            segments,
        })
    }

    /// Parse the inside of `[...]`; `input` starts right after the `[`.
    fn parse_bracket(input: &str) -> Option<(Segment, &str)> {
        if let Some(rest) = input.strip_prefix("*]") {
            return Some((Segment::Wildcard, rest));
        }
        if let Some(quote) = input.chars().next().filter(|c| *c == '\'' || *c == '"') {
            let body = &input[1..];
            let close = body.find(quote)?;
            let rest = body[close + 1..].strip_prefix(']')?;
            return Some((Segment::Field(body[..close].to_string()), rest));
        }
        let close = input.find(']')?;
        let index = input[..close].trim().parse::<usize>().ok()?;
        Some((Segment::Index(index), &input[close + 1..]))
    }

    /// Name of the final segment when it is a field selector.
    pub fn last_field(&self) -> Option<&str> {
        match self.segments.last() {
            Some(Segment::Field(name)) => Some(name),
            _ => None,
        }
    }

    /// All values matched by the path, in document order.
    pub fn select<'a>(&self, data: &'a Value) -> Vec<&'a Value> {
        let mut current = vec![data];
        for segment in &self.segments {
            let mut next = Vec::new();
            for value in current {
                match segment {
                    Segment::Field(name) => {
                        if let Some(v) = value.get(name.as_str()) {
                            next.push(v);
                        }
                    }
                    Segment::Index(idx) => {
                        if let Some(v) = value.as_array().and_then(|arr| arr.get(*idx)) {
                            next.push(v);
                        }
                    }
                    Segment::Wildcard => match value {
                        Value::Array(arr) => next.extend(arr.iter()),
                        Value::Object(obj) => next.extend(obj.values()),
                        _ => {}
                    },
                }
            }
            current = next;
        }
        current
    }

    /// First match, if any.
    pub fn first<'a>(&self, data: &'a Value) -> Option<&'a Value> {
        self.select(data).into_iter().next()
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}
