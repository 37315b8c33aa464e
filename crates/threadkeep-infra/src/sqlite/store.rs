//! SQLite implementation of the `ThreadStore` port.
//!
//! Hashes live in `kv_hash` (one row per field) and sorted sets in
//! `kv_zset` (one row per member). Each command runs in its own short
//! transaction on the writer pool; a batch is never wrapped as a whole, so
//! a failing command leaves the earlier ones applied.

use std::collections::HashMap;

use sqlx::Row;
use sqlx::sqlite::SqliteConnection;
use threadkeep_core::store::{Command, CommandReply, ThreadStore, rank_bounds};
use threadkeep_types::error::StoreError;
use tracing::debug;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `ThreadStore`.
#[derive(Clone)]
pub struct SqliteThreadStore {
    pool: DatabasePool,
}

impl SqliteThreadStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    /// Number of members in a sorted set (0 when absent).
    pub async fn zcard(&self, key: &str) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM kv_zset WHERE key = ?")
            .bind(key)
            .fetch_one(&self.pool.reader)
            .await
            .map_err(store_err)?;
        Ok(count.max(0) as u64)
    }

    async fn apply(&self, command: &Command) -> Result<CommandReply, StoreError> {
        let mut tx = self.pool.writer.begin().await.map_err(store_err)?;
        let reply = apply_in(&mut *tx, command).await?;
        tx.commit().await.map_err(store_err)?;
        Ok(reply)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Connection-level failures mean the store is unreachable; anything else is
/// a failed command.
fn store_err(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
        _ => StoreError::Command(err.to_string()),
    }
}

async fn hash_exists(conn: &mut SqliteConnection, key: &str) -> Result<bool, StoreError> {
    let found: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM kv_hash WHERE key = ?)")
        .bind(key)
        .fetch_one(&mut *conn)
        .await
        .map_err(store_err)?;
    Ok(found != 0)
}

async fn zset_exists(conn: &mut SqliteConnection, key: &str) -> Result<bool, StoreError> {
    let found: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM kv_zset WHERE key = ?)")
        .bind(key)
        .fetch_one(&mut *conn)
        .await
        .map_err(store_err)?;
    Ok(found != 0)
}

async fn expect_hash(conn: &mut SqliteConnection, key: &str) -> Result<(), StoreError> {
    if zset_exists(conn, key).await? {
        return Err(StoreError::WrongType(key.to_string()));
    }
    Ok(())
}

async fn expect_zset(conn: &mut SqliteConnection, key: &str) -> Result<(), StoreError> {
    if hash_exists(conn, key).await? {
        return Err(StoreError::WrongType(key.to_string()));
    }
    Ok(())
}

/// Integer value of a hash field; absent counts as 0.
async fn counter(conn: &mut SqliteConnection, key: &str, field: &str) -> Result<i64, StoreError> {
    let value: Option<String> =
        sqlx::query_scalar("SELECT value FROM kv_hash WHERE key = ? AND field = ?")
            .bind(key)
            .bind(field)
            .fetch_optional(&mut *conn)
            .await
            .map_err(store_err)?;
    match value {
        Some(value) => value.parse().map_err(|_| {
            StoreError::Command(format!("hash value at '{key}.{field}' is not an integer"))
        }),
        None => Ok(0),
    }
}

async fn hset_field(
    conn: &mut SqliteConnection,
    key: &str,
    field: &str,
    value: &str,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"INSERT INTO kv_hash (key, field, value) VALUES (?, ?, ?)
           ON CONFLICT (key, field) DO UPDATE SET value = excluded.value"#,
    )
    .bind(key)
    .bind(field)
    .bind(value)
    .execute(&mut *conn)
    .await
    .map_err(store_err)?;
    Ok(())
}

async fn incr(
    conn: &mut SqliteConnection,
    key: &str,
    field: &str,
    delta: i64,
) -> Result<i64, StoreError> {
    let next = counter(conn, key, field).await? + delta;
    hset_field(conn, key, field, &next.to_string()).await?;
    Ok(next)
}

/// Add or re-score a member. Returns true when the member is new.
async fn zadd(
    conn: &mut SqliteConnection,
    key: &str,
    score: f64,
    member: &str,
) -> Result<bool, StoreError> {
    let existing: Option<f64> =
        sqlx::query_scalar("SELECT score FROM kv_zset WHERE key = ? AND member = ?")
            .bind(key)
            .bind(member)
            .fetch_optional(&mut *conn)
            .await
            .map_err(store_err)?;
    sqlx::query(
        r#"INSERT INTO kv_zset (key, member, score) VALUES (?, ?, ?)
           ON CONFLICT (key, member) DO UPDATE SET score = excluded.score"#,
    )
    .bind(key)
    .bind(member)
    .bind(score)
    .execute(&mut *conn)
    .await
    .map_err(store_err)?;
    Ok(existing.is_none())
}

/// Remove a member. Returns true when it was present.
async fn zrem(conn: &mut SqliteConnection, key: &str, member: &str) -> Result<bool, StoreError> {
    let result = sqlx::query("DELETE FROM kv_zset WHERE key = ? AND member = ?")
        .bind(key)
        .bind(member)
        .execute(&mut *conn)
        .await
        .map_err(store_err)?;
    Ok(result.rows_affected() > 0)
}

async fn apply_in(conn: &mut SqliteConnection, command: &Command) -> Result<CommandReply, StoreError> {
    match command {
        Command::HSet { key, fields } => {
            if fields.is_empty() {
                return Ok(CommandReply::Ok);
            }
            expect_hash(conn, key).await?;
            for (field, value) in fields {
                hset_field(conn, key, field, value).await?;
            }
            Ok(CommandReply::Ok)
        }
        Command::Del { key } => {
            let hashes = sqlx::query("DELETE FROM kv_hash WHERE key = ?")
                .bind(key)
                .execute(&mut *conn)
                .await
                .map_err(store_err)?;
            let sets = sqlx::query("DELETE FROM kv_zset WHERE key = ?")
                .bind(key)
                .execute(&mut *conn)
                .await
                .map_err(store_err)?;
            let removed = hashes.rows_affected() + sets.rows_affected() > 0;
            Ok(CommandReply::Integer(removed as i64))
        }
        Command::ZAdd { key, score, member } => {
            expect_zset(conn, key).await?;
            Ok(CommandReply::Integer(zadd(conn, key, *score, member).await? as i64))
        }
        Command::ZRem { key, member } => {
            expect_zset(conn, key).await?;
            Ok(CommandReply::Integer(zrem(conn, key, member).await? as i64))
        }
        Command::AttachChild {
            children_key,
            member,
            score,
            parent_key,
            field,
        } => {
            expect_zset(conn, children_key).await?;
            expect_hash(conn, parent_key).await?;
            let parent_exists = hash_exists(conn, parent_key).await?;
            if parent_exists {
                counter(conn, parent_key, field).await?;
            }
            let inserted = zadd(conn, children_key, *score, member).await?;
            if inserted && parent_exists {
                incr(conn, parent_key, field, 1).await?;
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
            expect_zset(conn, children_key).await?;
            expect_hash(conn, parent_key).await?;
            let parent_exists = hash_exists(conn, parent_key).await?;
            if parent_exists {
                counter(conn, parent_key, field).await?;
            }
            let removed = zrem(conn, children_key, member).await?;
            if removed && parent_exists {
                incr(conn, parent_key, field, -1).await?;
                Ok(CommandReply::Integer(1))
            } else {
                Ok(CommandReply::Integer(0))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ThreadStore implementation
// ---------------------------------------------------------------------------

impl ThreadStore for SqliteThreadStore {
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let rows = sqlx::query("SELECT field, value FROM kv_hash WHERE key = ?")
            .bind(key)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(store_err)?;

        if rows.is_empty() {
            let mut conn = self.pool.reader.acquire().await.map_err(store_err)?;
            expect_hash(&mut *conn, key).await?;
            return Ok(HashMap::new());
        }

        rows.iter()
            .map(|row| -> Result<(String, String), StoreError> {
                let field: String = row.try_get("field").map_err(store_err)?;
                let value: String = row.try_get("value").map_err(store_err)?;
                Ok((field, value))
            })
            .collect()
    }

    async fn zrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
        rev: bool,
    ) -> Result<Vec<String>, StoreError> {
        let (offset, count) = if start >= 0 && stop >= 0 {
            if start > stop {
                return Ok(Vec::new());
            }
            (start, (stop - start).saturating_add(1))
        } else {
            let len = self.zcard(key).await? as usize;
            match rank_bounds(len, start, stop) {
                Some((from, to)) => (from as i64, (to - from + 1) as i64),
                None => return Ok(Vec::new()),
            }
        };

        let sql = if rev {
            "SELECT member FROM kv_zset WHERE key = ? ORDER BY score DESC, member DESC LIMIT ? OFFSET ?"
        } else {
            "SELECT member FROM kv_zset WHERE key = ? ORDER BY score ASC, member ASC LIMIT ? OFFSET ?"
        };
        let members: Vec<String> = sqlx::query_scalar(sql)
            .bind(key)
            .bind(count)
            .bind(offset)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(store_err)?;

        if members.is_empty() {
            let mut conn = self.pool.reader.acquire().await.map_err(store_err)?;
            expect_zset(&mut *conn, key).await?;
        }
        Ok(members)
    }

    async fn exec(&self, commands: Vec<Command>) -> Result<Vec<CommandReply>, StoreError> {
        let mut replies = Vec::with_capacity(commands.len());
        for command in &commands {
            match self.apply(command).await {
                Ok(reply) => replies.push(reply),
                Err(e) => {
                    debug!(
                        command = command.name(),
                        applied = replies.len(),
                        error = %e,
                        "Batch aborted"
                    );
                    return Err(e);
                }
            }
        }
        Ok(replies)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool.reader)
            .await
            .map_err(store_err)?;
        Ok(())
    }
}
