//! Shared domain types for Statecraft.
//!
//! This crate contains the serde shapes that cross the interpreter boundary:
//! state definition bodies, retry/catch policies, path specifiers, run-scoped
//! execution metadata, persisted Parallel records, and interpreter
//! configuration.
//!
//! Zero infrastructure dependencies -- only serde, serde_json, thiserror.

pub mod config;
pub mod error;
pub mod metadata;
pub mod state;
