//! Interpreter configuration types.
//!
//! `InterpreterConfig` represents `statecraft.toml`, which tunes the Parallel
//! join poll loop and how delegated tasks reach their external worker.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level interpreter configuration.
///
/// All fields have defaults, so an empty file is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpreterConfig {
    /// Delay between reads of a branch output that is tracked but not yet written.
    #[serde(default = "default_join_poll_interval_ms")]
    pub join_poll_interval_ms: u64,

    /// Reads attempted per branch output before the join gives up.
    #[serde(default = "default_join_poll_max_attempts")]
    pub join_poll_max_attempts: u32,

    #[serde(default)]
    pub worker: WorkerConfig,
}

fn default_join_poll_interval_ms() -> u64 {
    100
}

fn default_join_poll_max_attempts() -> u32 {
    600
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            join_poll_interval_ms: default_join_poll_interval_ms(),
            join_poll_max_attempts: default_join_poll_max_attempts(),
            worker: WorkerConfig::default(),
        }
    }
}

impl InterpreterConfig {
    pub fn join_poll_interval(&self) -> Duration {
        Duration::from_millis(self.join_poll_interval_ms)
    }
}

/// Connection settings for delegated task workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Directory holding the `worker_<state>.uds` sockets.
    #[serde(default = "default_socket_dir")]
    pub socket_dir: PathBuf,

    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,

    /// Linear backoff step; attempt `n` waits `n * step` after failing.
    #[serde(default = "default_connect_backoff_ms")]
    pub connect_backoff_ms: u64,
}

fn default_socket_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

fn default_connect_attempts() -> u32 {
    10
}

fn default_connect_backoff_ms() -> u64 {
    50
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            socket_dir: default_socket_dir(),
            connect_attempts: default_connect_attempts(),
            connect_backoff_ms: default_connect_backoff_ms(),
        }
    }
}

impl WorkerConfig {
    /// Socket path of the worker serving `state_name`.
    pub fn socket_path(&self, state_name: &str) -> PathBuf {
        self.socket_dir.join(format!("worker_{state_name}.uds"))
    }

    /// Delay after the `attempt`-th failed connection (1-based).
    pub fn connect_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.connect_backoff_ms.saturating_mul(u64::from(attempt)))
    }
}
