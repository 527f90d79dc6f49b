//! State interpreter: everything needed to evaluate one state of a run.
//!
//! - `context` -- run context, collaborator bundle, storage key naming
//! - `definition` -- state document parsing and validation
//! - `json_path` -- compiled JSON-path expressions
//! - `paths` -- InputPath / ResultPath / OutputPath transforms
//! - `choice` -- Choice rule compiler and evaluator
//! - `invoker` -- task invocation trait, in-process and delegated invokers
//! - `delegate` -- duplex protocol spoken with external task workers
//! - `retry` -- Retry / Catch policy executor around a task invocation
//! - `parallel` -- Parallel fan-out, branch terminal writes, and join
//! - `wait` -- Wait state duration resolution
//! - `interpreter` -- per-state pipeline tying the above together

pub mod choice;
pub mod context;
pub mod definition;
pub mod delegate;
pub mod interpreter;
pub mod invoker;
pub mod json_path;
pub mod parallel;
pub mod paths;
pub mod retry;
pub mod wait;
