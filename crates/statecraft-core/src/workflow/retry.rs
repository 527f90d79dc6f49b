//! Retry / Catch policy executor around a single task invocation.
//!
//! - No policy: invoke once and propagate any failure unchanged.
//! - Retry: every failure re-selects the first matching retrier. Each
//!   retrier has its own budget of `MaxAttempts` re-invocations, spaced by
//!   `IntervalSeconds * BackoffRate^(n-1)`.
//! - Catch: when no retrier applies, or one is exhausted, the first matching
//!   catcher routes the error to its `Next` state.

use serde_json::{Value, json};
use statecraft_types::state::{CatchPolicy, PathSpec, RetryPolicy};
use tracing::{debug, error, warn};

use super::invoker::{TaskInvocationError, TaskInvoker};
use crate::scheduler::Scheduler;

/// Matches every error.
pub const STATES_ALL: &str = "States.ALL";

/// Matches any failure of the task invocation itself.
pub const STATES_TASK_FAILED: &str = "States.TaskFailed";

/// `Cause` of the failure value returned when retries run out with no catcher.
pub const RETRY_EXHAUSTED_CAUSE: &str = "not caught by retry policy";

/// `Cause` of the package returned when a catcher handles the error.
pub const CAUGHT_CAUSE: &str = "caught by catch policy";

// ---------------------------------------------------------------------------
// TaskOutcome
// ---------------------------------------------------------------------------

/// Result of running a task under its policies.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// The task returned a value.
    Success(Value),
    /// A retrier ran out of attempts and no catcher is configured.
    /// Carries `{"Error": <message>, "Cause": "not caught by retry policy"}`.
    RetriesExhausted(Value),
    /// A catcher handled the error and the payload was dispatched to `next`.
    Caught {
        next: String,
        result_path: PathSpec,
        output: Value,
    },
}

/// Whether an `ErrorEquals` list matches `err`.
pub fn error_matches(error_equals: &[String], err: &TaskInvocationError) -> bool {
    error_equals.iter().any(|name| {
        name == STATES_ALL
            || name == STATES_TASK_FAILED
            || *name == err.error_type
            || *name == err.message
    })
}

// ---------------------------------------------------------------------------
// RetryCatchExecutor
// ---------------------------------------------------------------------------

/// Applies a Task state's Retry and Catch lists to its invocations.
pub struct RetryCatchExecutor<'a> {
    state_name: &'a str,
    retriers: &'a [RetryPolicy],
    catchers: &'a [CatchPolicy],
}

impl<'a> RetryCatchExecutor<'a> {
    pub fn new(state_name: &'a str, retriers: &'a [RetryPolicy], catchers: &'a [CatchPolicy]) -> Self {
        Self {
            state_name,
            retriers,
            catchers,
        }
    }

    /// Run the task, retrying and catching per policy.
    ///
    /// Errors are returned only when no policy handles the failure.
    pub async fn execute<T, D>(
        &self,
        invoker: &T,
        input: &Value,
        scheduler: &D,
    ) -> Result<TaskOutcome, TaskInvocationError>
    where
        T: TaskInvoker,
        D: Scheduler,
    {
        if self.retriers.is_empty() && self.catchers.is_empty() {
            return invoker.invoke(input).await.map(TaskOutcome::Success);
        }

        let mut retries_used = vec![0u32; self.retriers.len()];
        let mut invocations = 0u32;

        let last_error = loop {
            invocations += 1;
            let err = match invoker.invoke(input).await {
                Ok(output) => {
                    debug!(state = %self.state_name, invocations, "task succeeded");
                    return Ok(TaskOutcome::Success(output));
                }
                Err(err) => err,
            };

            let Some(idx) = self
                .retriers
                .iter()
                .position(|policy| error_matches(&policy.error_equals, &err))
            else {
                debug!(state = %self.state_name, error = %err, "no retrier matches");
                break err;
            };

            let policy = &self.retriers[idx];
            if retries_used[idx] >= policy.max_attempts {
                if self.catchers.is_empty() {
                    error!(
                        state = %self.state_name,
                        retrier = idx,
                        error = %err,
                        "retries exhausted and no catcher configured"
                    );
                    return Ok(TaskOutcome::RetriesExhausted(json!({
                        "Error": err.message,
                        "Cause": RETRY_EXHAUSTED_CAUSE,
                    })));
                }
                break err;
            }

            retries_used[idx] += 1;
            let delay = policy.delay_for_retry(retries_used[idx]);
            warn!(
                state = %self.state_name,
                retrier = idx,
                attempt = retries_used[idx],
                max_attempts = policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying task"
            );
            tokio::time::sleep(delay).await;
        };

        self.catch(last_error, invoker, scheduler)
    }

    fn catch<T, D>(
        &self,
        err: TaskInvocationError,
        invoker: &T,
        scheduler: &D,
    ) -> Result<TaskOutcome, TaskInvocationError>
    where
        T: TaskInvoker,
        D: Scheduler,
    {
        let Some(catcher) = self
            .catchers
            .iter()
            .find(|policy| error_matches(&policy.error_equals, &err))
        else {
            return Err(err);
        };

        error!(
            state = %self.state_name,
            next = %catcher.next,
            error = %err,
            "task error caught"
        );
        scheduler.add_dynamic_next(&catcher.next, invoker.catch_payload(&err.message));

        Ok(TaskOutcome::Caught {
            next: catcher.next.clone(),
            result_path: catcher.result_path.clone(),
            output: json!({
                "Error": err.message,
                "Cause": CAUGHT_CAUSE,
            }),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
