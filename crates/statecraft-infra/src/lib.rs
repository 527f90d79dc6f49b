//! Infrastructure layer for Statecraft.
//!
//! Contains implementations of the collaborator traits defined in
//! `statecraft-core`: an in-memory state store with counter triggers, an
//! in-memory scheduler queue, the Unix-socket worker connector, and the
//! TOML configuration loader.

pub mod config;
pub mod memory;
pub mod worker;
