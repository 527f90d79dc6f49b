//! Unix-domain-socket connector for delegated task workers.
//!
//! Each Task state backed by an external runtime has a worker listening on
//! `<socket_dir>/worker_<state>.uds`. Workers may still be starting when the
//! first invocation arrives, so connecting retries with linear backoff.

use std::io;
use std::path::{Path, PathBuf};

use statecraft_core::workflow::delegate::WorkerConnector;
use statecraft_types::config::WorkerConfig;
use tokio::net::UnixStream;

/// Opens the socket of one state's worker.
#[derive(Debug, Clone)]
pub struct UnixSocketConnector {
    path: PathBuf,
    config: WorkerConfig,
}

impl UnixSocketConnector {
    /// Connector for the worker of `state_name` under `config.socket_dir`.
    pub fn for_state(config: &WorkerConfig, state_name: &str) -> Self {
        Self {
            path: config.socket_path(state_name),
            config: config.clone(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl WorkerConnector for UnixSocketConnector {
    type Stream = UnixStream;

    async fn connect(&self) -> io::Result<UnixStream> {
        let attempts = self.config.connect_attempts.max(1);
        let mut attempt = 1;
        loop {
            match UnixStream::connect(&self.path).await {
                Ok(stream) => {
                    tracing::debug!(path = %self.path.display(), attempt, "connected to worker");
                    return Ok(stream);
                }
                Err(err) if attempt >= attempts => {
                    tracing::error!(
                        path = %self.path.display(),
                        attempts,
                        error = %err,
                        "worker unreachable"
                    );
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.config.connect_backoff(attempt);
                    tracing::warn!(
                        path = %self.path.display(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "worker connection failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
