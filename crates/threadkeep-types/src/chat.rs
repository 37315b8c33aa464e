//! Chat record, page, and thread tree types for ThreadKeep.
//!
//! A `Chat` is the sole persisted entity. Chats form threads through
//! `parent_id`: a chat without a parent is a root, every other chat is a
//! reply-style child of another chat.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single persisted conversation.
///
/// `messages` are opaque message objects supplied by the caller; their order
/// is significant and preserved. `children_count` is a denormalized counter
/// maintained by the store, never recomputed from the children index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub title: String,
    pub path: String,
    /// Set once the chat has been made publicly viewable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_path: Option<String>,
    pub user_id: String,
    pub messages: Vec<serde_json::Value>,
    /// `None` marks a root.
    pub parent_id: Option<String>,
    /// Root ancestor of the thread; equals `id` for roots.
    pub root_id: String,
    pub depth: u32,
    pub children_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Drives recency ordering in every index.
    pub last_activity_at: DateTime<Utc>,
}

impl Chat {
    /// Generate a fresh, time-sortable chat id.
    pub fn generate_id() -> String {
        Uuid::now_v7().to_string()
    }

    /// Build a fresh root chat with no messages.
    pub fn new_root(
        id: impl Into<String>,
        user_id: impl Into<String>,
        title: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let id = id.into();
        Self {
            path: format!("/search/{id}"),
            root_id: id.clone(),
            id,
            title: title.into(),
            share_path: None,
            user_id: user_id.into(),
            messages: Vec::new(),
            parent_id: None,
            depth: 0,
            children_count: 0,
            created_at: now,
            updated_at: now,
            last_activity_at: now,
        }
    }

    /// Build a fresh reply to `parent`, placed one level below it in the same thread.
    pub fn new_reply(
        parent: &Chat,
        id: impl Into<String>,
        user_id: impl Into<String>,
        title: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut chat = Self::new_root(id, user_id, title, now);
        chat.parent_id = Some(parent.id.clone());
        chat.root_id = parent.root_id.clone();
        chat.depth = parent.depth + 1;
        chat
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Append a message and bump the activity timestamps.
    pub fn push_message(&mut self, message: serde_json::Value, now: DateTime<Utc>) {
        self.messages.push(message);
        self.touch(now);
    }

    /// Mark the chat as active at `now`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.last_activity_at = now;
    }
}

/// One page of a recency-ordered chat listing.
///
/// `next_offset` is set whenever the page came back full. A full page that
/// happens to be the last one is followed by an empty page with no offset.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPage {
    pub chats: Vec<Chat>,
    pub next_offset: Option<usize>,
}

impl ChatPage {
    /// The empty terminal page.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// A chat together with its loaded descendants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadNode {
    pub chat: Chat,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ThreadNode>,
}

impl ThreadNode {
    pub fn leaf(chat: Chat) -> Self {
        Self {
            chat,
            children: Vec::new(),
        }
    }

    /// Total number of chats in this subtree, including the node itself.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(ThreadNode::size).sum::<usize>()
    }
}

/// Structured result of a delete or clear.
///
/// Serializes to `{}` on success and `{"error": "..."}` on failure.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OperationOutcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationOutcome {
    pub fn ok() -> Self {
        Self { error: None }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_new_root_is_its_own_root() {
        let chat = Chat::new_root("a", "u1", "First", at(100));
        assert!(chat.is_root());
        assert_eq!(chat.root_id, "a");
        assert_eq!(chat.depth, 0);
        assert_eq!(chat.path, "/search/a");
        assert_eq!(chat.last_activity_at, at(100));
    }

    #[test]
    fn test_new_reply_inherits_thread_placement() {
        let root = Chat::new_root("a", "u1", "First", at(100));
        let reply = Chat::new_reply(&root, "b", "u1", "Follow-up", at(200));
        assert_eq!(reply.parent_id.as_deref(), Some("a"));
        assert_eq!(reply.root_id, "a");
        assert_eq!(reply.depth, 1);

        let nested = Chat::new_reply(&reply, "c", "u1", "Deeper", at(300));
        assert_eq!(nested.root_id, "a");
        assert_eq!(nested.depth, 2);
    }

    #[test]
    fn test_push_message_bumps_activity() {
        let mut chat = Chat::new_root("a", "u1", "First", at(100));
        chat.push_message(serde_json::json!({"role": "user", "content": "hi"}), at(500));
        assert_eq!(chat.messages.len(), 1);
        assert_eq!(chat.updated_at, at(500));
        assert_eq!(chat.last_activity_at, at(500));
        assert_eq!(chat.created_at, at(100));
    }

    #[test]
    fn test_chat_serializes_camel_case() {
        let chat = Chat::new_root("a", "u1", "First", at(100));
        let json = serde_json::to_value(&chat).unwrap();
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["rootId"], "a");
        assert!(json["parentId"].is_null());
        assert!(json.get("sharePath").is_none());
        assert_eq!(json["childrenCount"], 0);
    }

    #[test]
    fn test_operation_outcome_serialization() {
        assert_eq!(serde_json::to_string(&OperationOutcome::ok()).unwrap(), "{}");
        let err = OperationOutcome::error("No chats to clear");
        assert!(!err.is_ok());
        assert_eq!(
            serde_json::to_string(&err).unwrap(),
            r#"{"error":"No chats to clear"}"#
        );
    }

    #[test]
    fn test_thread_node_size() {
        let root = Chat::new_root("a", "u1", "First", at(100));
        let child = Chat::new_reply(&root, "b", "u1", "Reply", at(200));
        let grandchild = Chat::new_reply(&child, "c", "u1", "Reply", at(300));
        let tree = ThreadNode {
            chat: root,
            children: vec![ThreadNode {
                chat: child,
                children: vec![ThreadNode::leaf(grandchild)],
            }],
        };
        assert_eq!(tree.size(), 3);
    }

    #[test]
    fn test_generate_id_is_unique() {
        let a = Chat::generate_id();
        let b = Chat::generate_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }

    #[test]
    fn test_chat_page_empty() {
        let page = ChatPage::empty();
        assert!(page.chats.is_empty());
        assert!(page.next_offset.is_none());
        let json = serde_json::to_value(&page).unwrap();
        assert!(json["nextOffset"].is_null());
    }
}
