//! Chat record store: hash encoding, decoding, and single-record access.
//!
//! A chat lives in one hash at `chat:{id}`. Every field is stored as a
//! string and the message sequence as a JSON array blob. `childrenCount` is
//! written only by the attach/detach commands, never by an upsert.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use futures_util::future::try_join_all;
use serde_json::{Map, Value};
use threadkeep_types::chat::Chat;
use threadkeep_types::config::MessageBlobPolicy;
use threadkeep_types::error::ChatError;
use tracing::warn;

use super::keys::KeySpace;
use super::normalize::normalize;
use crate::store::ThreadStore;
use crate::store::pipeline::Pipeline;

/// Hash field holding the denormalized child counter.
pub const CHILDREN_COUNT_FIELD: &str = "childrenCount";

/// Canonical stored form of a timestamp: RFC 3339, millisecond precision, `Z`.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Encode a chat into hash fields for an upsert.
///
/// `parentId` is written as `""` for roots and `sharePath` only when set.
pub fn encode(chat: &Chat) -> Result<Vec<(String, String)>, ChatError> {
    let mut fields = vec![
        ("id".to_string(), chat.id.clone()),
        ("title".to_string(), chat.title.clone()),
        ("path".to_string(), chat.path.clone()),
        ("userId".to_string(), chat.user_id.clone()),
        ("messages".to_string(), serde_json::to_string(&chat.messages)?),
        (
            "parentId".to_string(),
            chat.parent_id.clone().unwrap_or_default(),
        ),
        ("rootId".to_string(), chat.root_id.clone()),
        ("depth".to_string(), chat.depth.to_string()),
        ("createdAt".to_string(), format_timestamp(chat.created_at)),
        ("updatedAt".to_string(), format_timestamp(chat.updated_at)),
        (
            "lastActivityAt".to_string(),
            format_timestamp(chat.last_activity_at),
        ),
    ];
    if let Some(share_path) = &chat.share_path {
        fields.push(("sharePath".to_string(), share_path.clone()));
    }
    Ok(fields)
}

/// Reads and writes single chat records.
#[derive(Debug, Clone)]
pub struct ChatRecords {
    keys: KeySpace,
    blob_policy: MessageBlobPolicy,
}

impl ChatRecords {
    pub fn new(keys: KeySpace, blob_policy: MessageBlobPolicy) -> Self {
        Self { keys, blob_policy }
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    /// The same records read with unreadable message blobs degraded to empty.
    ///
    /// For paths that only need the threading fields and never write the
    /// decoded messages back, so a corrupt blob cannot block them.
    pub fn for_threading(&self) -> ChatRecords {
        ChatRecords {
            keys: self.keys.clone(),
            blob_policy: MessageBlobPolicy::Degrade,
        }
    }

    /// Decode a stored hash into a normalized chat.
    ///
    /// `id` fills in the record id when the hash lacks one.
    pub fn decode(&self, id: &str, fields: HashMap<String, String>) -> Result<Chat, ChatError> {
        let mut raw: Map<String, Value> = Map::with_capacity(fields.len() + 1);
        for (field, value) in fields {
            if field == "messages" {
                let messages = self.decode_messages(id, &value)?;
                raw.insert(field, Value::Array(messages));
            } else {
                raw.insert(field, Value::String(value));
            }
        }
        if !matches!(raw.get("id"), Some(Value::String(s)) if !s.is_empty()) {
            raw.insert("id".to_string(), Value::String(id.to_string()));
        }
        Ok(normalize(&raw))
    }

    fn decode_messages(&self, id: &str, blob: &str) -> Result<Vec<Value>, ChatError> {
        if blob.trim().is_empty() {
            return Ok(Vec::new());
        }
        let failure = match serde_json::from_str::<Value>(blob) {
            Ok(Value::Array(messages)) => return Ok(messages),
            Ok(other) => format!("expected a JSON array, found {}", json_kind(&other)),
            Err(e) => e.to_string(),
        };
        match self.blob_policy {
            MessageBlobPolicy::Degrade => {
                warn!(chat_id = %id, error = %failure, "Unreadable message blob, reading as empty");
                Ok(Vec::new())
            }
            MessageBlobPolicy::Strict => Err(ChatError::Serialization(format!(
                "messages of chat '{id}': {failure}"
            ))),
        }
    }

    /// Fetch one chat. Absent records are `ChatError::NotFound`.
    pub async fn get<S: ThreadStore>(&self, store: &S, id: &str) -> Result<Chat, ChatError> {
        self.find(store, id).await?.ok_or(ChatError::NotFound)
    }

    /// Fetch one chat, with absence as `None`.
    pub async fn find<S: ThreadStore>(&self, store: &S, id: &str) -> Result<Option<Chat>, ChatError> {
        let fields = store.hgetall(&self.keys.record(id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        self.decode(id, fields).map(Some)
    }

    /// Fetch a chat only if it has been shared. Unshared chats read as absent.
    pub async fn get_shared<S: ThreadStore>(&self, store: &S, id: &str) -> Result<Chat, ChatError> {
        let chat = self.get(store, id).await?;
        if chat.share_path.is_none() {
            return Err(ChatError::NotFound);
        }
        Ok(chat)
    }

    /// Fetch several chats concurrently, preserving order and skipping ids
    /// whose record no longer exists.
    pub async fn get_many<S: ThreadStore>(
        &self,
        store: &S,
        ids: &[String],
    ) -> Result<Vec<Chat>, ChatError> {
        let fetches = ids.iter().map(|id| {
            let key = self.keys.record(id);
            async move { store.hgetall(&key).await.map(|fields| (id, fields)) }
        });
        let mut chats = Vec::with_capacity(ids.len());
        for (id, fields) in try_join_all(fetches).await? {
            if fields.is_empty() {
                warn!(chat_id = %id, "Index member without a record, skipping");
                continue;
            }
            chats.push(self.decode(id, fields)?);
        }
        Ok(chats)
    }

    /// Queue the record write for `chat`.
    pub fn upsert(&self, pipeline: &mut Pipeline, chat: &Chat) -> Result<(), ChatError> {
        pipeline.hset(self.keys.record(&chat.id), encode(chat)?);
        Ok(())
    }

    /// Queue removal of the record for `id`.
    pub fn delete(&self, pipeline: &mut Pipeline, id: &str) {
        pipeline.del(self.keys.record(id));
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
