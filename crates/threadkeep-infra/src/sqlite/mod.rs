//! SQLite storage layer.
//!
//! A `ThreadStore` backed by SQLite with WAL mode and split read/write
//! connection pools.

pub mod pool;
pub mod store;
