//! Wait state.
//!
//! The delay comes from exactly one of `Seconds`, `SecondsPath`,
//! `Timestamp` or `TimestampPath`, checked in that order. An elapsed literal
//! `Timestamp` is logged and skipped; an elapsed `TimestampPath` is an error.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use statecraft_types::state::StateBody;
use thiserror::Error;
use tracing::{debug, warn};

use super::json_path::JsonPath;

/// Literal timestamp format accepted by Wait states (always UTC).
pub const WAIT_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WaitError {
    #[error("Wait state needs one of Seconds, SecondsPath, Timestamp or TimestampPath")]
    MissingRequiredField,

    #[error("Wait path '{0}' matched nothing in the state input")]
    MissingPath(String),

    #[error("TimestampPath resolved to '{0}', which is already in the past")]
    PastTimestamp(String),

    #[error("invalid Wait value: {0}")]
    InvalidValue(String),
}

/// Compute how long the Wait state must block, as of `now`.
pub fn resolve_delay(
    body: &StateBody,
    input: &Value,
    now: DateTime<Utc>,
) -> Result<Duration, WaitError> {
    if let Some(seconds) = &body.seconds {
        return seconds_value(seconds);
    }

    if let Some(expr) = &body.seconds_path {
        let value = select(expr, input)?;
        return seconds_value(value);
    }

    if let Some(literal) = &body.timestamp {
        let until = parse_timestamp(literal)?;
        return Ok(match (until - now).to_std() {
            Ok(delay) => delay,
            Err(_) => {
                warn!(timestamp = %literal, "Wait Timestamp already elapsed, continuing");
                Duration::ZERO
            }
        });
    }

    if let Some(expr) = &body.timestamp_path {
        let value = select(expr, input)?;
        let literal = value
            .as_str()
            .ok_or_else(|| WaitError::InvalidValue(format!("'{expr}' is not a timestamp string")))?;
        let until = parse_timestamp(literal)?;
        return (until - now)
            .to_std()
            .map_err(|_| WaitError::PastTimestamp(literal.to_string()));
    }

    Err(WaitError::MissingRequiredField)
}

/// Block for the Wait state's delay.
pub async fn wait(body: &StateBody, input: &Value) -> Result<(), WaitError> {
    let delay = resolve_delay(body, input, Utc::now())?;
    debug!(delay_ms = delay.as_millis() as u64, "waiting");
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    Ok(())
}

fn select<'a>(expr: &str, input: &'a Value) -> Result<&'a Value, WaitError> {
    let path = JsonPath::compile(expr).map_err(|e| WaitError::InvalidValue(e.to_string()))?;
    path.first(input)
        .ok_or_else(|| WaitError::MissingPath(expr.to_string()))
}

/// Seconds as a non-negative number, or a string holding one, that fits a `Duration`.
fn seconds_value(value: &Value) -> Result<Duration, WaitError> {
    let seconds = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    seconds
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| WaitError::InvalidValue(format!("{value} is not a number of seconds")))
}

fn parse_timestamp(literal: &str) -> Result<DateTime<Utc>, WaitError> {
    NaiveDateTime::parse_from_str(literal, WAIT_TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| WaitError::InvalidValue(format!("'{literal}': {e}")))
}
