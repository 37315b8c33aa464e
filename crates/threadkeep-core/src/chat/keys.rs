//! Key naming for chat records and their ordering indexes.

/// Prefix of every chat record key; index members are record keys.
pub const RECORD_PREFIX: &str = "chat:";

/// Builds store keys under a version segment for the per-user indexes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    version: String,
}

impl KeySpace {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }

    /// Hash record of one chat: `chat:{id}`. Also the member name in indexes.
    pub fn record(&self, chat_id: &str) -> String {
        format!("{RECORD_PREFIX}{chat_id}")
    }

    /// Every chat owned by the user.
    pub fn all_chats(&self, user_id: &str) -> String {
        format!("user:{}:chat:{user_id}", self.version)
    }

    /// Root chats owned by the user.
    pub fn root_chats(&self, user_id: &str) -> String {
        format!("user:{}:chat:{user_id}:roots", self.version)
    }

    /// Direct children of one chat.
    pub fn children(&self, chat_id: &str) -> String {
        format!("{RECORD_PREFIX}{chat_id}:children")
    }

    /// Chat id of an index member, if it is a record key.
    pub fn id_from_member(member: &str) -> Option<&str> {
        member
            .strip_prefix(RECORD_PREFIX)
            .filter(|id| !id.is_empty())
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new("v2")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout() {
        let keys = KeySpace::default();
        assert_eq!(keys.record("a"), "chat:a");
        assert_eq!(keys.all_chats("u1"), "user:v2:chat:u1");
        assert_eq!(keys.root_chats("u1"), "user:v2:chat:u1:roots");
        assert_eq!(keys.children("a"), "chat:a:children");
    }

    #[test]
    fn version_segment_is_configurable() {
        let keys = KeySpace::new("v3");
        assert_eq!(keys.all_chats("u1"), "user:v3:chat:u1");
        // Record and children keys are not versioned
        assert_eq!(keys.record("a"), "chat:a");
    }

    #[test]
    fn member_roundtrip() {
        let keys = KeySpace::default();
        assert_eq!(KeySpace::id_from_member(&keys.record("abc-123")), Some("abc-123"));
        assert_eq!(KeySpace::id_from_member("user:v2:chat:u1"), None);
        assert_eq!(KeySpace::id_from_member("chat:"), None);
    }
}
