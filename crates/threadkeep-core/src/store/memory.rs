//! In-process `ThreadStore` backed by a mutex-guarded key space.
//!
//! Mirrors the semantics of a remote key-value / sorted-set store closely
//! enough to run the full chat service against it: hashes and sorted sets
//! live under string keys, each command is applied under the lock on its
//! own, and a batch is never applied as a unit.
//!
//! Fault injection (`set_unavailable`, `fail_after`) lets tests observe
//! partial batch application and distinguish an unreachable store from an
//! absent record.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use threadkeep_types::error::StoreError;

use super::{Command, CommandReply, ThreadStore, rank_bounds};

enum Entry {
    Hash(HashMap<String, String>),
    ZSet(HashMap<String, f64>),
}

#[derive(Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
    unavailable: bool,
    /// Number of commands still allowed to apply before an injected failure.
    fail_after: Option<usize>,
}

/// Shared in-memory store. Cloning yields another handle to the same data.
#[derive(Clone, Default)]
pub struct MemoryThreadStore {
    inner: Arc<Mutex<Keyspace>>,
}

impl MemoryThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `StoreError::Unavailable` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut ks) = self.inner.lock() {
            ks.unavailable = unavailable;
        }
    }

    /// Let the next `n` batched commands apply, then fail the one after.
    ///
    /// The injection is one-shot: it clears itself once it fires.
    pub fn fail_after(&self, n: usize) {
        if let Ok(mut ks) = self.inner.lock() {
            ks.fail_after = Some(n);
        }
    }

    /// Snapshot of all keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = match self.inner.lock() {
            Ok(ks) => ks.entries.keys().cloned().collect(),
            Err(_) => Vec::new(),
        };
        keys.sort();
        keys
    }

    /// Number of members in a sorted set (0 when absent).
    pub async fn zcard(&self, key: &str) -> Result<u64, StoreError> {
        let ks = self.lock()?;
        Ok(ks.zset(key)?.map(|z| z.len() as u64).unwrap_or(0))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner
            .lock()
            .map(|ks| ks.entries.contains_key(key))
            .unwrap_or(false)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Keyspace>, StoreError> {
        let ks = self
            .inner
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))?;
        if ks.unavailable {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(ks)
    }
}

impl Keyspace {
    fn hash(&self, key: &str) -> Result<Option<&HashMap<String, String>>, StoreError> {
        match self.entries.get(key) {
            Some(Entry::Hash(h)) => Ok(Some(h)),
            Some(Entry::ZSet(_)) => Err(StoreError::WrongType(key.to_string())),
            None => Ok(None),
        }
    }

    fn hash_mut(&mut self, key: &str) -> Result<&mut HashMap<String, String>, StoreError> {
        match self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Hash(HashMap::new()))
        {
            Entry::Hash(h) => Ok(h),
            Entry::ZSet(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn zset(&self, key: &str) -> Result<Option<&HashMap<String, f64>>, StoreError> {
        match self.entries.get(key) {
            Some(Entry::ZSet(z)) => Ok(Some(z)),
            Some(Entry::Hash(_)) => Err(StoreError::WrongType(key.to_string())),
            None => Ok(None),
        }
    }

    fn zset_mut(&mut self, key: &str) -> Result<&mut HashMap<String, f64>, StoreError> {
        match self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::ZSet(HashMap::new()))
        {
            Entry::ZSet(z) => Ok(z),
            Entry::Hash(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn counter(&self, key: &str, field: &str) -> Result<i64, StoreError> {
        match self.hash(key)?.and_then(|h| h.get(field)) {
            Some(value) => value.parse().map_err(|_| {
                StoreError::Command(format!("hash value at '{key}.{field}' is not an integer"))
            }),
            None => Ok(0),
        }
    }

    fn incr(&mut self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        let next = self.counter(key, field)? + delta;
        self.hash_mut(key)?.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    fn zadd(&mut self, key: &str, score: f64, member: &str) -> Result<bool, StoreError> {
        Ok(self
            .zset_mut(key)?
            .insert(member.to_string(), score)
            .is_none())
    }

    fn zrem(&mut self, key: &str, member: &str) -> Result<bool, StoreError> {
        let (removed, now_empty) = match self.entries.get_mut(key) {
            Some(Entry::ZSet(z)) => (z.remove(member).is_some(), z.is_empty()),
            Some(Entry::Hash(_)) => return Err(StoreError::WrongType(key.to_string())),
            None => (false, false),
        };
        if now_empty {
            self.entries.remove(key);
        }
        Ok(removed)
    }

    fn apply(&mut self, command: &Command) -> Result<CommandReply, StoreError> {
        match command {
            Command::HSet { key, fields } => {
                if fields.is_empty() {
                    return Ok(CommandReply::Ok);
                }
                let hash = self.hash_mut(key)?;
                for (field, value) in fields {
                    hash.insert(field.clone(), value.clone());
                }
                Ok(CommandReply::Ok)
            }
            Command::Del { key } => {
                let removed = self.entries.remove(key).is_some();
                Ok(CommandReply::Integer(removed as i64))
            }
            Command::ZAdd { key, score, member } => {
                Ok(CommandReply::Integer(self.zadd(key, *score, member)? as i64))
            }
            Command::ZRem { key, member } => {
                Ok(CommandReply::Integer(self.zrem(key, member)? as i64))
            }
            Command::AttachChild {
                children_key,
                member,
                score,
                parent_key,
                field,
            } => {
                // Validate both keys before touching either.
                self.zset(children_key)?;
                let parent_exists = self.hash(parent_key)?.is_some();
                if parent_exists {
                    self.counter(parent_key, field)?;
                }
                let inserted = self.zadd(children_key, *score, member)?;
                if inserted && parent_exists {
                    self.incr(parent_key, field, 1)?;
                    Ok(CommandReply::Integer(1))
                } else {
                    Ok(CommandReply::Integer(0))
                }
            }
            Command::DetachChild {
                children_key,
                member,
                parent_key,
                field,
            } => {
                self.zset(children_key)?;
                let parent_exists = self.hash(parent_key)?.is_some();
                if parent_exists {
                    self.counter(parent_key, field)?;
                }
                let removed = self.zrem(children_key, member)?;
                if removed && parent_exists {
                    self.incr(parent_key, field, -1)?;
                    Ok(CommandReply::Integer(1))
                } else {
                    Ok(CommandReply::Integer(0))
                }
            }
        }
    }
}

fn by_score(a: &(&String, &f64), b: &(&String, &f64)) -> Ordering {
    a.1.partial_cmp(b.1)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.0.cmp(b.0))
}

impl ThreadStore for MemoryThreadStore {
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let ks = self.lock()?;
        Ok(ks.hash(key)?.cloned().unwrap_or_default())
    }

    async fn zrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
        rev: bool,
    ) -> Result<Vec<String>, StoreError> {
        let ks = self.lock()?;
        let Some(zset) = ks.zset(key)? else {
            return Ok(Vec::new());
        };
        let mut ordered: Vec<(&String, &f64)> = zset.iter().collect();
        ordered.sort_by(by_score);
        if rev {
            ordered.reverse();
        }
        Ok(match rank_bounds(ordered.len(), start, stop) {
            Some((from, to)) => ordered[from..=to]
                .iter()
                .map(|(member, _)| (*member).clone())
                .collect(),
            None => Vec::new(),
        })
    }

    async fn exec(&self, commands: Vec<Command>) -> Result<Vec<CommandReply>, StoreError> {
        let mut replies = Vec::with_capacity(commands.len());
        for command in &commands {
            // One lock per command: other callers may interleave between commands.
            let mut ks = self.lock()?;
            if let Some(remaining) = ks.fail_after {
                if remaining == 0 {
                    ks.fail_after = None;
                    return Err(StoreError::Command(format!(
                        "injected failure at {}",
                        command.name()
                    )));
                }
                ks.fail_after = Some(remaining - 1);
            }
            replies.push(ks.apply(command)?);
        }
        Ok(replies)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }
}
