//! Duplex protocol spoken with external task workers.
//!
//! Frames are newline-delimited JSON. The interpreter writes the task input
//! as its first frame. The worker may then send any number of callback
//! requests against the storage and scheduler API, each answered on the same
//! stream, and finishes with a single completion frame. Reading frames and
//! serving callbacks run as two futures joined before the invocation returns.

use std::future::Future;
use std::io;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::invoker::{TaskInvocationError, TaskInvoker};
use crate::scheduler::Scheduler;
use crate::storage::state_store::StateStore;

/// Pending callback requests buffered between the reader and the server.
const CALLBACK_QUEUE_DEPTH: usize = 32;

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// A frame sent by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerFrame {
    Callback {
        id: u64,
        request: CallbackRequest,
    },
    Completed {
        #[serde(rename = "hasError")]
        has_error: bool,
        #[serde(rename = "functionResult", default)]
        function_result: Value,
        #[serde(rename = "errorType", default)]
        error_type: String,
        #[serde(rename = "errorTrace", default)]
        error_trace: String,
    },
}

/// Storage or scheduler operation requested by a running worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CallbackRequest {
    Get { key: String },
    Put { key: String, value: Value },
    Delete { key: String },
    CreateSet { key: String },
    AddSetEntry { key: String, member: String },
    RetrieveSet { key: String },
    DeleteSet { key: String },
    AddDynamicNext { next: String, value: Value },
}

/// Answer to a [`CallbackRequest`], correlated by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackResponse {
    pub id: u64,
    pub ok: bool,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// WorkerConnector
// ---------------------------------------------------------------------------

/// Opens the duplex stream to the worker that runs a task.
pub trait WorkerConnector: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    fn connect(&self) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Runs a task in an external worker, serving its callbacks from `store`
/// and `scheduler`.
pub struct DelegatedInvoker<'a, C, S, D> {
    connector: C,
    store: &'a S,
    scheduler: &'a D,
}

impl<'a, C, S, D> DelegatedInvoker<'a, C, S, D>
where
    C: WorkerConnector,
    S: StateStore,
    D: Scheduler,
{
    pub fn new(connector: C, store: &'a S, scheduler: &'a D) -> Self {
        Self {
            connector,
            store,
            scheduler,
        }
    }
}

impl<C, S, D> TaskInvoker for DelegatedInvoker<'_, C, S, D>
where
    C: WorkerConnector,
    S: StateStore,
    D: Scheduler,
{
    async fn invoke(&self, input: &Value) -> Result<Value, TaskInvocationError> {
        let stream = self.connector.connect().await.map_err(|e| {
            TaskInvocationError::transport(format!("cannot connect to worker: {e}"))
        })?;
        run_session(stream, input, self.store, self.scheduler).await
    }

    /// External runtimes expect catcher input wrapped in a `value` envelope.
    fn catch_payload(&self, message: &str) -> Value {
        serde_json::json!({ "value": message })
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Drive one invocation over an open stream.
pub async fn run_session<T, S, D>(
    stream: T,
    input: &Value,
    store: &S,
    scheduler: &D,
) -> Result<Value, TaskInvocationError>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
    S: StateStore,
    D: Scheduler,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    write_frame(&mut write_half, input)
        .await
        .map_err(|e| TaskInvocationError::transport(format!("cannot send task input: {e}")))?;

    let (tx, mut rx) = mpsc::channel::<(u64, CallbackRequest)>(CALLBACK_QUEUE_DEPTH);

    let reader = async move {
        let mut lines = BufReader::new(read_half).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    return Err(TaskInvocationError::transport(
                        "worker closed the channel before completing",
                    ));
                }
                Err(e) => {
                    return Err(TaskInvocationError::transport(format!(
                        "cannot read worker frame: {e}"
                    )));
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            let frame: WorkerFrame = match serde_json::from_str(&line) {
                Ok(frame) => frame,
                Err(e) => {
                    return Err(TaskInvocationError::transport(format!(
                        "malformed worker frame: {e}"
                    )));
                }
            };
            match frame {
                WorkerFrame::Callback { id, request } => {
                    if tx.send((id, request)).await.is_err() {
                        return Err(TaskInvocationError::transport(
                            "callback server stopped before the worker completed",
                        ));
                    }
                }
                WorkerFrame::Completed {
                    has_error,
                    function_result,
                    error_type,
                    error_trace,
                } => {
                    return if has_error {
                        Err(TaskInvocationError::worker_reported(error_type, error_trace))
                    } else {
                        Ok(function_result)
                    };
                }
            }
        }
    };

    let server = async move {
        let mut served = 0u64;
        while let Some((id, request)) = rx.recv().await {
            let response = serve_callback(id, request, store, scheduler).await;
            if let Err(e) = write_frame(&mut write_half, &response).await {
                return Err(e);
            }
            served += 1;
        }
        debug!(callbacks = served, "worker callback server finished");
        Ok::<_, io::Error>(write_half)
    };

    let (completion, served) = tokio::join!(reader, server);

    match served {
        Ok(mut write_half) => {
            if let Err(e) = write_half.shutdown().await {
                debug!(error = %e, "worker channel already closed");
            }
        }
        Err(e) => {
            warn!(error = %e, "failed to answer worker callback");
            completion?;
            return Err(TaskInvocationError::transport(format!(
                "cannot answer worker callback: {e}"
            )));
        }
    }

    completion
}

async fn write_frame<W, T>(writer: &mut W, frame: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut bytes = serde_json::to_vec(frame).map_err(io::Error::other)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await
}

async fn serve_callback<S, D>(
    id: u64,
    request: CallbackRequest,
    store: &S,
    scheduler: &D,
) -> CallbackResponse
where
    S: StateStore,
    D: Scheduler,
{
    let result = match request {
        CallbackRequest::Get { key } => store.get(&key).await.map(|v| v.unwrap_or(Value::Null)),
        CallbackRequest::Put { key, value } => store.put(&key, &value).await.map(|_| Value::Null),
        CallbackRequest::Delete { key } => store.delete(&key).await.map(|_| Value::Null),
        CallbackRequest::CreateSet { key } => store.create_set(&key).await.map(|_| Value::Null),
        CallbackRequest::AddSetEntry { key, member } => store
            .add_set_entry(&key, &member)
            .await
            .map(|_| Value::Null),
        CallbackRequest::RetrieveSet { key } => store
            .retrieve_set(&key)
            .await
            .map(|set| Value::Array(set.into_iter().map(Value::String).collect())),
        CallbackRequest::DeleteSet { key } => store.delete_set(&key).await.map(|_| Value::Null),
        CallbackRequest::AddDynamicNext { next, value } => {
            scheduler.add_dynamic_next(&next, value);
            Ok(Value::Null)
        }
    };

    match result {
        Ok(value) => CallbackResponse {
            id,
            ok: true,
            value,
            error: None,
        },
        Err(e) => {
            warn!(callback_id = id, error = %e, "worker callback failed");
            CallbackResponse {
                id,
                ok: false,
                value: Value::Null,
                error: Some(e.to_string()),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use serde_json::json;
    use tokio::io::DuplexStream;

    use crate::testing::{MockScheduler, MockStore};

    /// Scripted worker: reads the input frame, sends each callback and waits
    /// for its answer, then sends `completion`. Returns what it observed.
    async fn scripted_worker(
        stream: DuplexStream,
        callbacks: Vec<Value>,
        completion: Value,
    ) -> (Value, Vec<CallbackResponse>) {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut lines = BufReader::new(read_half).lines();
        let input: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();

        let mut responses = Vec::new();
        for callback in callbacks {
            write_frame(&mut write_half, &callback).await.unwrap();
            let line = lines.next_line().await.unwrap().unwrap();
            responses.push(serde_json::from_str(&line).unwrap());
        }
        write_frame(&mut write_half, &completion).await.unwrap();
        // The interpreter shuts its write half down once it has the result.
        assert!(lines.next_line().await.unwrap().is_none());
        (input, responses)
    }

    #[tokio::test]
    async fn test_session_returns_function_result() {
        let (ours, theirs) = tokio::io::duplex(4096);
        let store = MockStore::default();
        let scheduler = MockScheduler::default();

        let worker = tokio::spawn(scripted_worker(
            theirs,
            vec![],
            json!({"type": "completed", "hasError": false, "functionResult": {"sum": 3}}),
        ));
        let result = run_session(ours, &json!({"a": 1, "b": 2}), &store, &scheduler)
            .await
            .unwrap();

        assert_eq!(result, json!({"sum": 3}));
        let (input, responses) = worker.await.unwrap();
        assert_eq!(input, json!({"a": 1, "b": 2}));
        assert!(responses.is_empty());
    }

    #[tokio::test]
    async fn test_session_serves_callbacks_in_order() {
        let (ours, theirs) = tokio::io::duplex(4096);
        let store = MockStore::default();
        let scheduler = MockScheduler::default();

        let callbacks = vec![
            json!({"type": "callback", "id": 1, "request": {"op": "put", "key": "k", "value": 7}}),
            json!({"type": "callback", "id": 2, "request": {"op": "get", "key": "k"}}),
            json!({"type": "callback", "id": 3, "request": {"op": "create_set", "key": "s"}}),
            json!({"type": "callback", "id": 4, "request": {"op": "add_set_entry", "key": "s", "member": "x"}}),
            json!({"type": "callback", "id": 5, "request": {"op": "retrieve_set", "key": "s"}}),
            json!({"type": "callback", "id": 6, "request": {"op": "add_dynamic_next", "next": "Notify", "value": {"n": 1}}}),
            json!({"type": "callback", "id": 7, "request": {"op": "create_counter_typo", "key": "c"}}),
        ];
        // The last callback is malformed, so the session fails before completion.
        let worker = tokio::spawn(async move {
            let (read_half, mut write_half) = tokio::io::split(theirs);
            let mut lines = BufReader::new(read_half).lines();
            lines.next_line().await.unwrap().unwrap();
            let mut responses: Vec<CallbackResponse> = Vec::new();
            for callback in &callbacks[..6] {
                write_frame(&mut write_half, callback).await.unwrap();
                let line = lines.next_line().await.unwrap().unwrap();
                responses.push(serde_json::from_str(&line).unwrap());
            }
            write_frame(&mut write_half, &callbacks[6]).await.unwrap();
            responses
        });

        let err = run_session(ours, &json!({}), &store, &scheduler)
            .await
            .unwrap_err();
        assert!(err.message.contains("malformed worker frame"));

        let responses = worker.await.unwrap();
        let ids: Vec<u64> = responses.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);
        assert!(responses.iter().all(|r| r.ok));
        assert_eq!(responses[1].value, json!(7));
        assert_eq!(responses[4].value, json!(["x"]));
        assert_eq!(
            scheduler.dispatched.lock().unwrap().clone(),
            vec![("Notify".to_string(), json!({"n": 1}))]
        );
    }

    #[tokio::test]
    async fn test_session_answers_missing_key_with_null() {
        let (ours, theirs) = tokio::io::duplex(4096);
        let store = MockStore::default();
        let scheduler = MockScheduler::default();

        let worker = tokio::spawn(scripted_worker(
            theirs,
            vec![json!({
                "type": "callback",
                "id": 9,
                "request": {"op": "get", "key": "missing"}
            })],
            json!({"type": "completed", "hasError": false, "functionResult": null}),
        ));
        run_session(ours, &json!(null), &store, &scheduler).await.unwrap();
        let (_, responses) = worker.await.unwrap();
        assert_eq!(responses[0].id, 9);
        assert!(responses[0].ok);
        assert_eq!(responses[0].value, Value::Null);
    }

    #[tokio::test]
    async fn test_session_surfaces_worker_error() {
        let (ours, theirs) = tokio::io::duplex(4096);
        let store = MockStore::default();
        let scheduler = MockScheduler::default();

        let worker = tokio::spawn(scripted_worker(
            theirs,
            vec![],
            json!({
                "type": "completed",
                "hasError": true,
                "errorType": "java.lang.ArithmeticException",
                "errorTrace": "at Divide.handle(Divide.java:12)"
            }),
        ));
        let err = run_session(ours, &json!({}), &store, &scheduler)
            .await
            .unwrap_err();
        worker.await.unwrap();

        assert_eq!(err.error_type, "java.lang.ArithmeticException");
        assert_eq!(err.trace.as_deref(), Some("at Divide.handle(Divide.java:12)"));
    }

    #[tokio::test]
    async fn test_session_fails_when_worker_hangs_up() {
        let (ours, theirs) = tokio::io::duplex(4096);
        let store = MockStore::default();
        let scheduler = MockScheduler::default();

        let worker = tokio::spawn(async move {
            let mut lines = BufReader::new(theirs).lines();
            lines.next_line().await.unwrap();
        });
        let err = run_session(ours, &json!({}), &store, &scheduler)
            .await
            .unwrap_err();
        worker.await.unwrap();
        assert_eq!(err.error_type, crate::workflow::invoker::TRANSPORT_ERROR);
    }

    struct DuplexConnector {
        stream: Mutex<Option<DuplexStream>>,
    }

    impl WorkerConnector for DuplexConnector {
        type Stream = DuplexStream;

        async fn connect(&self) -> io::Result<DuplexStream> {
            self.stream
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, "used"))
        }
    }

    #[tokio::test]
    async fn test_delegated_invoker_connects_and_wraps_catch_payload() {
        let (ours, theirs) = tokio::io::duplex(4096);
        let store = MockStore::default();
        let scheduler = MockScheduler::default();
        let invoker = DelegatedInvoker::new(
            DuplexConnector {
                stream: Mutex::new(Some(ours)),
            },
            &store,
            &scheduler,
        );

        let worker = tokio::spawn(scripted_worker(
            theirs,
            vec![],
            json!({"type": "completed", "hasError": false, "functionResult": "done"}),
        ));
        assert_eq!(invoker.invoke(&json!(1)).await.unwrap(), json!("done"));
        worker.await.unwrap();

        let err = invoker.invoke(&json!(1)).await.unwrap_err();
        assert!(err.message.contains("cannot connect"));
        assert_eq!(invoker.catch_payload("boom"), json!({"value": "boom"}));
    }
}
