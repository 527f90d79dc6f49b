//! Storage abstractions for Statecraft.
//!
//! Defines the key/value, set and counter store used by Parallel states and
//! delegated tasks, plus the administrative handle for counter triggers.
//! Implementations live in statecraft-infra.

pub mod counter_trigger;
pub mod state_store;
