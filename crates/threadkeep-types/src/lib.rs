//! Shared domain types for ThreadKeep.
//!
//! This crate contains the domain types used across the workspace: the
//! threaded `Chat` record, listing pages, thread trees, configuration, and
//! the error enums.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod chat;
pub mod config;
pub mod error;
