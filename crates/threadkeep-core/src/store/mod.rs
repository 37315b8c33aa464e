//! Key-value / sorted-set store port.
//!
//! Defines the interface ThreadKeep consumes from its backing store: hash
//! records, sorted-set indexes ranged by rank, and batched command
//! submission. Implementations live in `memory` (in-process) and in
//! threadkeep-infra (SQLite).

pub mod memory;
pub mod pipeline;

use std::collections::HashMap;

use threadkeep_types::error::StoreError;

/// A single write command submitted in a batch.
///
/// Every command is atomic on its own. A batch of commands is not.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Set (merge) fields on a hash record, creating it if absent.
    HSet {
        key: String,
        fields: Vec<(String, String)>,
    },
    /// Remove a key of any type.
    Del { key: String },
    /// Add or re-score a sorted-set member.
    ZAdd {
        key: String,
        score: f64,
        member: String,
    },
    /// Remove a sorted-set member.
    ZRem { key: String, member: String },
    /// Add `member` to `children_key` and, only if it was not already a member
    /// and `parent_key` exists, increment `field` on `parent_key` by one.
    AttachChild {
        children_key: String,
        member: String,
        score: f64,
        parent_key: String,
        field: String,
    },
    /// Remove `member` from `children_key` and, only if it was a member and
    /// `parent_key` exists, decrement `field` on `parent_key` by one.
    DetachChild {
        children_key: String,
        member: String,
        parent_key: String,
        field: String,
    },
}

impl Command {
    /// Short command name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::HSet { .. } => "HSET",
            Command::Del { .. } => "DEL",
            Command::ZAdd { .. } => "ZADD",
            Command::ZRem { .. } => "ZREM",
            Command::AttachChild { .. } => "ATTACHCHILD",
            Command::DetachChild { .. } => "DETACHCHILD",
        }
    }
}

/// Per-command result of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandReply {
    Ok,
    /// Count of affected members, keys, or counted children.
    Integer(i64),
}

/// Store interface consumed by the chat service.
///
/// Uses native async fn in traits (RPITIT, Rust 2024 edition).
/// Implementations: [`memory::MemoryThreadStore`] and `SqliteThreadStore`
/// in threadkeep-infra.
pub trait ThreadStore: Send + Sync {
    /// All fields of a hash record. Returns an empty map when the key is absent.
    fn hgetall(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<HashMap<String, String>, StoreError>> + Send;

    /// Members of a sorted set by rank, inclusive on both ends.
    ///
    /// Negative ranks count from the end (`-1` is the last member). With
    /// `rev`, ranks are taken over the set ordered by descending score.
    fn zrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
        rev: bool,
    ) -> impl std::future::Future<Output = Result<Vec<String>, StoreError>> + Send;

    /// Execute a batch in submission order.
    ///
    /// Stops at the first failing command and returns its error; commands
    /// applied before it stay applied.
    fn exec(
        &self,
        commands: Vec<Command>,
    ) -> impl std::future::Future<Output = Result<Vec<CommandReply>, StoreError>> + Send;

    /// Round-trip check against the store.
    fn ping(&self) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;
}

/// Resolve rank bounds against a set of `len` members.
///
/// Returns the inclusive `(start, stop)` index pair, or `None` when the range
/// is empty.
pub fn rank_bounds(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    if len == 0 {
        return None;
    }
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_bounds_full_range() {
        assert_eq!(rank_bounds(5, 0, -1), Some((0, 4)));
    }

    #[test]
    fn rank_bounds_clamps_stop_past_end() {
        assert_eq!(rank_bounds(3, 1, 10), Some((1, 2)));
    }

    #[test]
    fn rank_bounds_negative_start() {
        assert_eq!(rank_bounds(5, -2, -1), Some((3, 4)));
        assert_eq!(rank_bounds(5, -10, 1), Some((0, 1)));
    }

    #[test]
    fn rank_bounds_empty_cases() {
        assert_eq!(rank_bounds(0, 0, -1), None);
        assert_eq!(rank_bounds(3, 3, 5), None);
        assert_eq!(rank_bounds(3, 2, 1), None);
        assert_eq!(rank_bounds(3, 0, -4), None);
    }

    #[test]
    fn command_names() {
        let cmd = Command::Del {
            key: "chat:a".to_string(),
        };
        assert_eq!(cmd.name(), "DEL");
    }
}
