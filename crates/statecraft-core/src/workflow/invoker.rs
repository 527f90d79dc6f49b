//! Task invocation.
//!
//! A Task state's business logic runs behind [`TaskInvoker`]. It either runs
//! in-process ([`InProcessInvoker`]) or in an external worker reached over a
//! duplex channel ([`super::delegate::DelegatedInvoker`]). [`BoxTaskInvoker`]
//! erases the concrete type so the runtime can be picked per state.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Error type name used for transport failures of delegated tasks.
pub const TRANSPORT_ERROR: &str = "States.Runtime";

/// A failed task invocation.
///
/// Retry and Catch policies match on `error_type` and on `message`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{error_type}: {message}")]
pub struct TaskInvocationError {
    pub error_type: String,
    pub message: String,
    pub trace: Option<String>,
}

impl TaskInvocationError {
    /// Failure raised by in-process business logic.
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            trace: None,
        }
    }

    /// Failure reported by an external worker's completion frame. The worker
    /// only names the error type, so it doubles as the message.
    pub fn worker_reported(error_type: impl Into<String>, trace: impl Into<String>) -> Self {
        let error_type = error_type.into();
        let trace = trace.into();
        Self {
            message: error_type.clone(),
            error_type,
            trace: (!trace.is_empty()).then_some(trace),
        }
    }

    /// The channel to an external worker broke or carried garbage.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(TRANSPORT_ERROR, message)
    }
}

// ---------------------------------------------------------------------------
// TaskInvoker
// ---------------------------------------------------------------------------

/// Runs a task's business logic once.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait TaskInvoker: Send + Sync {
    fn invoke(
        &self,
        input: &Value,
    ) -> impl Future<Output = Result<Value, TaskInvocationError>> + Send;

    /// Input handed to a catcher's `Next` state for an error `message`.
    fn catch_payload(&self, message: &str) -> Value {
        Value::String(message.to_string())
    }
}

/// Wraps an async closure as a task.
pub struct InProcessInvoker<F> {
    handler: F,
}

impl<F, Fut> InProcessInvoker<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, TaskInvocationError>> + Send,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F, Fut> TaskInvoker for InProcessInvoker<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, TaskInvocationError>> + Send,
{
    fn invoke(
        &self,
        input: &Value,
    ) -> impl Future<Output = Result<Value, TaskInvocationError>> + Send {
        (self.handler)(input.clone())
    }
}

/// Task without business logic: returns its input.
///
/// Used for bare tasks and for states that never invoke a task.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoInvoker;

impl TaskInvoker for EchoInvoker {
    async fn invoke(&self, input: &Value) -> Result<Value, TaskInvocationError> {
        Ok(input.clone())
    }
}

// ---------------------------------------------------------------------------
// BoxTaskInvoker
// ---------------------------------------------------------------------------

/// Object-safe version of [`TaskInvoker`] with boxed futures.
pub trait TaskInvokerDyn: Send + Sync {
    fn invoke_boxed<'a>(
        &'a self,
        input: &'a Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, TaskInvocationError>> + Send + 'a>>;

    fn catch_payload_dyn(&self, message: &str) -> Value;
}

impl<T: TaskInvoker> TaskInvokerDyn for T {
    fn invoke_boxed<'a>(
        &'a self,
        input: &'a Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, TaskInvocationError>> + Send + 'a>> {
        Box::pin(self.invoke(input))
    }

    fn catch_payload_dyn(&self, message: &str) -> Value {
        self.catch_payload(message)
    }
}

/// Type-erased task invoker for runtime selection (in-process vs delegated).
pub struct BoxTaskInvoker<'a> {
    inner: Box<dyn TaskInvokerDyn + 'a>,
}

impl<'a> BoxTaskInvoker<'a> {
    pub fn new<T: TaskInvoker + 'a>(invoker: T) -> Self {
        Self {
            inner: Box::new(invoker),
        }
    }
}

impl TaskInvoker for BoxTaskInvoker<'_> {
    async fn invoke(&self, input: &Value) -> Result<Value, TaskInvocationError> {
        self.inner.invoke_boxed(input).await
    }

    fn catch_payload(&self, message: &str) -> Value {
        self.inner.catch_payload_dyn(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_in_process_invoker_runs_closure() {
        let invoker = InProcessInvoker::new(|input: Value| async move {
            let n = input["n"].as_i64().unwrap_or(0);
            Ok::<_, TaskInvocationError>(json!({"n": n * 2}))
        });
        assert_eq!(invoker.invoke(&json!({"n": 21})).await.unwrap(), json!({"n": 42}));
        assert_eq!(invoker.catch_payload("boom"), json!("boom"));
    }

    #[tokio::test]
    async fn test_in_process_invoker_propagates_error() {
        let invoker = InProcessInvoker::new(|_input: Value| async move {
            Err::<Value, _>(TaskInvocationError::new("ValueError", "bad input"))
        });
        let err = invoker.invoke(&json!({})).await.unwrap_err();
        assert_eq!(err.error_type, "ValueError");
        assert_eq!(err.to_string(), "ValueError: bad input");
    }

    #[tokio::test]
    async fn test_box_invoker_delegates() {
        let boxed = BoxTaskInvoker::new(EchoInvoker);
        assert_eq!(boxed.invoke(&json!([1, 2])).await.unwrap(), json!([1, 2]));
        assert_eq!(boxed.catch_payload("oops"), json!("oops"));
    }

    #[tokio::test]
    async fn test_boxed_invokers_selected_at_runtime() {
        fn assert_send<F: Future + Send>(fut: F) -> F {
            fut
        }

        let failing = InProcessInvoker::new(|_input: Value| async move {
            Err::<Value, _>(TaskInvocationError::new("KeyError", "id"))
        });
        let invokers = [BoxTaskInvoker::new(EchoInvoker), BoxTaskInvoker::new(failing)];

        let input = json!({"id": 7});
        let ok = assert_send(invokers[0].invoke(&input)).await;
        assert_eq!(ok.unwrap(), json!({"id": 7}));
        let err = assert_send(invokers[1].invoke(&input)).await.unwrap_err();
        assert_eq!(err, TaskInvocationError::new("KeyError", "id"));
    }

    #[test]
    fn test_worker_reported_error_uses_type_as_message() {
        let err = TaskInvocationError::worker_reported("java.lang.IllegalStateException", "");
        assert_eq!(err.message, "java.lang.IllegalStateException");
        assert_eq!(err.trace, None);

        let err = TaskInvocationError::worker_reported("E", "at Foo.bar()");
        assert_eq!(err.trace.as_deref(), Some("at Foo.bar()"));
    }
}
