//! Threading normalizer.
//!
//! Turns a raw, possibly legacy or partially typed chat record into a fully
//! typed `Chat`. This is the single ingress point where the legacy
//! "no parent" spellings (`null`, missing, `""`, `"null"`) collapse into
//! `None`; nothing downstream re-checks them.
//!
//! Normalization is idempotent: feeding the serialized output back in
//! yields the same `Chat`.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use threadkeep_types::chat::Chat;

/// Normalize a raw record against the current time.
pub fn normalize(raw: &Map<String, Value>) -> Chat {
    normalize_at(raw, Utc::now())
}

/// Normalize a raw record, using `now` where no timestamp can be recovered.
pub fn normalize_at(raw: &Map<String, Value>, now: DateTime<Utc>) -> Chat {
    let id = text(raw.get("id"));
    let root_id = match text(raw.get("rootId")) {
        r if r.is_empty() => id.clone(),
        r => r,
    };

    let created = timestamp(raw.get("createdAt"));
    let created_at = created.unwrap_or(now);
    let updated_at = timestamp(raw.get("updatedAt")).or(created).unwrap_or(now);
    let last_activity_at = timestamp(raw.get("lastActivityAt"))
        .or(created)
        .unwrap_or(now);

    let messages = match raw.get("messages") {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    };

    Chat {
        title: text(raw.get("title")),
        path: text(raw.get("path")),
        share_path: Some(text(raw.get("sharePath"))).filter(|s| !s.is_empty()),
        user_id: text(raw.get("userId")),
        messages,
        parent_id: parent_id(raw.get("parentId")),
        root_id,
        depth: count(raw.get("depth")),
        children_count: count(raw.get("childrenCount")),
        created_at,
        updated_at,
        last_activity_at,
        id,
    }
}

/// Apply the same threading rules to an already typed chat.
///
/// Used at the write boundary, where callers hand in a `Chat` that may
/// still carry a sentinel parent id or an empty root id.
pub fn normalize_chat(mut chat: Chat) -> Chat {
    chat.parent_id = chat.parent_id.filter(|p| !is_null_sentinel(p));
    if chat.root_id.is_empty() {
        chat.root_id = chat.id.clone();
    }
    if chat.share_path.as_deref() == Some("") {
        chat.share_path = None;
    }
    chat
}

fn is_null_sentinel(value: &str) -> bool {
    value.is_empty() || value == "null"
}

fn parent_id(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !is_null_sentinel(s) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Non-negative integer with numeric-coercion rules: an empty string is 0,
/// anything non-finite or non-numeric is 0, negatives clamp to 0 and
/// fractions truncate.
fn count(value: Option<&Value>) -> u32 {
    let number = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                Some(0.0)
            } else {
                s.parse::<f64>().ok()
            }
        }
        Some(Value::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    match number {
        Some(n) if n.is_finite() => n.trunc().clamp(0.0, u32::MAX as f64) as u32,
        _ => 0,
    }
}

/// RFC 3339 text, epoch milliseconds, or numeric text holding epoch
/// milliseconds. Anything else counts as absent.
fn timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value {
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| s.parse::<i64>().ok().and_then(from_millis))
        }
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
            .and_then(from_millis),
        _ => None,
    }
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn raw(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("fixture must be an object"),
        }
    }

    fn roundtrip(chat: &Chat) -> Chat {
        let value = serde_json::to_value(chat).unwrap();
        normalize_at(&raw(value), now())
    }

    #[test]
    fn null_sentinels_all_mean_no_parent() {
        let spellings = [
            json!({"id": "a", "parentId": null}),
            json!({"id": "a"}),
            json!({"id": "a", "parentId": ""}),
            json!({"id": "a", "parentId": "null"}),
        ];
        for fixture in spellings {
            let chat = normalize_at(&raw(fixture.clone()), now());
            assert_eq!(chat.parent_id, None, "fixture {fixture}");
            assert_eq!(chat.root_id, "a");
        }
    }

    #[test]
    fn idempotent_for_every_sentinel_spelling() {
        let fixtures = [
            json!({"id": "a", "parentId": null, "depth": "0"}),
            json!({"id": "a"}),
            json!({"id": "a", "parentId": "", "childrenCount": "3"}),
            json!({"id": "a", "parentId": "null", "createdAt": "2024-01-02T03:04:05.678Z"}),
            json!({"id": "b", "parentId": "a", "rootId": "a", "depth": 1, "lastActivityAt": 1_700_000_123_456_i64}),
        ];
        for fixture in fixtures {
            let once = normalize_at(&raw(fixture.clone()), now());
            let twice = roundtrip(&once);
            assert_eq!(once, twice, "fixture {fixture}");
        }
    }

    #[test]
    fn numeric_fields_accept_strings() {
        let chat = normalize_at(
            &raw(json!({"id": "b", "depth": "2", "childrenCount": "7"})),
            now(),
        );
        assert_eq!(chat.depth, 2);
        assert_eq!(chat.children_count, 7);
    }

    #[test]
    fn non_finite_or_negative_counts_default_to_zero() {
        let chat = normalize_at(
            &raw(json!({"id": "b", "depth": "abc", "childrenCount": -3})),
            now(),
        );
        assert_eq!(chat.depth, 0);
        assert_eq!(chat.children_count, 0);

        let chat = normalize_at(&raw(json!({"id": "b", "depth": "Infinity"})), now());
        assert_eq!(chat.depth, 0);

        let chat = normalize_at(&raw(json!({"id": "b", "depth": 2.9})), now());
        assert_eq!(chat.depth, 2);
    }

    #[test]
    fn timestamps_fall_back_to_created_then_now() {
        let created = "2024-05-01T10:00:00.000Z";
        let chat = normalize_at(&raw(json!({"id": "a", "createdAt": created})), now());
        let expected: DateTime<Utc> = created.parse().unwrap();
        assert_eq!(chat.created_at, expected);
        assert_eq!(chat.updated_at, expected);
        assert_eq!(chat.last_activity_at, expected);

        let chat = normalize_at(&raw(json!({"id": "a"})), now());
        assert_eq!(chat.created_at, now());
        assert_eq!(chat.updated_at, now());
        assert_eq!(chat.last_activity_at, now());
    }

    #[test]
    fn unparsable_timestamp_counts_as_absent() {
        let created = "2024-05-01T10:00:00.000Z";
        let chat = normalize_at(
            &raw(json!({"id": "a", "createdAt": created, "lastActivityAt": "yesterday"})),
            now(),
        );
        assert_eq!(chat.last_activity_at, created.parse::<DateTime<Utc>>().unwrap());
    }

    #[test]
    fn epoch_millis_timestamps() {
        let chat = normalize_at(
            &raw(json!({"id": "a", "createdAt": 1_700_000_000_000_i64, "updatedAt": "1700000001000"})),
            now(),
        );
        assert_eq!(chat.created_at, now());
        assert_eq!(chat.updated_at, now() + chrono::Duration::seconds(1));
    }

    #[test]
    fn empty_root_id_defaults_to_own_id() {
        let chat = normalize_at(&raw(json!({"id": "b", "rootId": "", "parentId": "a"})), now());
        assert_eq!(chat.root_id, "b");
        assert_eq!(chat.parent_id.as_deref(), Some("a"));
    }

    #[test]
    fn non_array_messages_become_empty() {
        let chat = normalize_at(&raw(json!({"id": "a", "messages": "not-an-array"})), now());
        assert!(chat.messages.is_empty());

        let chat = normalize_at(
            &raw(json!({"id": "a", "messages": [{"role": "user", "content": "hi"}]})),
            now(),
        );
        assert_eq!(chat.messages.len(), 1);
    }

    #[test]
    fn empty_share_path_is_unset() {
        let chat = normalize_at(&raw(json!({"id": "a", "sharePath": ""})), now());
        assert!(chat.share_path.is_none());
        let chat = normalize_at(&raw(json!({"id": "a", "sharePath": "/share/a"})), now());
        assert_eq!(chat.share_path.as_deref(), Some("/share/a"));
    }

    #[test]
    fn normalize_chat_strips_typed_sentinels() {
        let mut chat = Chat::new_root("a", "u1", "t", now());
        chat.parent_id = Some("null".to_string());
        chat.root_id = String::new();
        chat.share_path = Some(String::new());

        let chat = normalize_chat(chat);
        assert!(chat.is_root());
        assert_eq!(chat.root_id, "a");
        assert!(chat.share_path.is_none());
    }
}
