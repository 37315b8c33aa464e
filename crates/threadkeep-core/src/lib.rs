//! Business logic and the store port for ThreadKeep.
//!
//! This crate defines the `ThreadStore` port that the infrastructure layer
//! implements, plus an in-process implementation for tests and ephemeral
//! use. It depends only on `threadkeep-types`, never on `threadkeep-infra`
//! or any database crate.

pub mod chat;
pub mod store;
