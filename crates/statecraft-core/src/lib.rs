//! State interpreter logic and collaborator trait definitions for Statecraft.
//!
//! This crate defines the "ports" (storage, counter trigger, scheduler and
//! worker connection traits) that the infrastructure layer implements, plus
//! everything needed to evaluate one state of a workflow run. It depends only
//! on `statecraft-types` -- never on `statecraft-infra`.

pub mod scheduler;
pub mod storage;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;
