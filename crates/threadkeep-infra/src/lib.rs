//! Infrastructure layer for ThreadKeep.
//!
//! Contains the SQLite implementation of the `ThreadStore` port defined in
//! `threadkeep-core`, plus configuration loading and data directory
//! resolution.

pub mod config;
pub mod sqlite;
