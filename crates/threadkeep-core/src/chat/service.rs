//! Chat persistence service.
//!
//! Every operation takes the caller's `user_id` explicitly. Each comes in a
//! typed `try_*` form that keeps "absent" and "store unreachable" apart, and
//! a caller-facing form: reads fall back to empty or `None` with a warning,
//! deletes and clears report `OperationOutcome`, and `save_chat` propagates.

use std::collections::HashSet;

use chrono::Utc;
use threadkeep_types::chat::{Chat, ChatPage, OperationOutcome, ThreadNode};
use threadkeep_types::config::{OrphanPolicy, ThreadKeepConfig};
use threadkeep_types::error::ChatError;
use tracing::{debug, info, warn};

use super::index::IndexMaintainer;
use super::keys::KeySpace;
use super::normalize::normalize_chat;
use super::propagation::ParentPropagation;
use super::record::{CHILDREN_COUNT_FIELD, ChatRecords};
use super::thread;
use crate::store::pipeline::Pipeline;
use crate::store::{CommandReply, ThreadStore};

/// Service owning threaded chat persistence over a [`ThreadStore`].
///
/// Generic over the store so threadkeep-core never depends on
/// threadkeep-infra.
pub struct ChatService<S: ThreadStore> {
    store: S,
    records: ChatRecords,
    index: IndexMaintainer,
    propagation: ParentPropagation,
    orphan_policy: OrphanPolicy,
    default_page_size: usize,
    max_tree_depth: u32,
}

impl<S: ThreadStore> ChatService<S> {
    pub fn new(store: S, config: &ThreadKeepConfig) -> Self {
        let keys = KeySpace::new(config.store.key_version.clone());
        Self {
            store,
            records: ChatRecords::new(keys.clone(), config.threading.message_blob_policy),
            index: IndexMaintainer::new(keys.clone()),
            propagation: ParentPropagation::new(keys),
            orphan_policy: config.threading.orphan_policy,
            default_page_size: config.threading.default_page_size,
            max_tree_depth: config.threading.max_tree_depth,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn default_page_size(&self) -> usize {
        self.default_page_size
    }

    fn keys(&self) -> &KeySpace {
        self.records.keys()
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    /// Fetch a chat owned by `user_id`.
    pub async fn try_get_chat(&self, id: &str, user_id: &str) -> Result<Chat, ChatError> {
        self.owned(&self.records, id, user_id).await
    }

    async fn owned(&self, records: &ChatRecords, id: &str, user_id: &str) -> Result<Chat, ChatError> {
        let chat = records.get(&self.store, id).await?;
        if chat.user_id != user_id {
            return Err(ChatError::Unauthorized);
        }
        Ok(chat)
    }

    pub async fn get_chat(&self, id: &str, user_id: &str) -> Option<Chat> {
        swallow(self.try_get_chat(id, user_id).await, "get_chat", id)
    }

    /// Fetch a publicly shared chat for any caller.
    pub async fn try_get_shared_chat(&self, id: &str) -> Result<Chat, ChatError> {
        self.records.get_shared(&self.store, id).await
    }

    pub async fn get_shared_chat(&self, id: &str) -> Option<Chat> {
        swallow(self.try_get_shared_chat(id).await, "get_shared_chat", id)
    }

    /// Every chat of the user, newest `lastActivityAt` first.
    pub async fn try_get_chats(&self, user_id: &str) -> Result<Vec<Chat>, ChatError> {
        let ids = self
            .index
            .all(&self.store, &self.keys().all_chats(user_id))
            .await?;
        self.records.get_many(&self.store, &ids).await
    }

    pub async fn get_chats(&self, user_id: &str) -> Vec<Chat> {
        swallow(self.try_get_chats(user_id).await, "get_chats", user_id).unwrap_or_default()
    }

    /// One page over all chats of the user.
    pub async fn try_get_chats_page(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<ChatPage, ChatError> {
        self.page_over(&self.keys().all_chats(user_id), limit, offset)
            .await
    }

    pub async fn get_chats_page(&self, user_id: &str, limit: usize, offset: usize) -> ChatPage {
        swallow(
            self.try_get_chats_page(user_id, limit, offset).await,
            "get_chats_page",
            user_id,
        )
        .unwrap_or_default()
    }

    /// One page over the user's thread roots.
    pub async fn try_get_thread_roots_page(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<ChatPage, ChatError> {
        self.page_over(&self.keys().root_chats(user_id), limit, offset)
            .await
    }

    pub async fn get_thread_roots_page(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> ChatPage {
        swallow(
            self.try_get_thread_roots_page(user_id, limit, offset).await,
            "get_thread_roots_page",
            user_id,
        )
        .unwrap_or_default()
    }

    async fn page_over(&self, key: &str, limit: usize, offset: usize) -> Result<ChatPage, ChatError> {
        let page = self.index.page(&self.store, key, limit, offset).await?;
        let chats = self.records.get_many(&self.store, &page.ids).await?;
        Ok(ChatPage {
            chats,
            next_offset: page.next_offset,
        })
    }

    /// Direct children of a chat owned by `user_id`, newest first.
    pub async fn try_get_children(&self, id: &str, user_id: &str) -> Result<Vec<Chat>, ChatError> {
        let parent = self.try_get_chat(id, user_id).await?;
        let children = thread::children(&self.records, &self.index, &self.store, &parent.id).await?;
        Ok(children
            .into_iter()
            .filter(|c| c.user_id == user_id)
            .collect())
    }

    pub async fn get_children(&self, id: &str, user_id: &str) -> Vec<Chat> {
        swallow(self.try_get_children(id, user_id).await, "get_children", id).unwrap_or_default()
    }

    /// Ancestors of a chat, from the thread root down to its direct parent.
    pub async fn try_get_ancestors(&self, id: &str, user_id: &str) -> Result<Vec<Chat>, ChatError> {
        let chat = self.try_get_chat(id, user_id).await?;
        thread::ancestors(&self.records, &self.store, &chat).await
    }

    pub async fn get_ancestors(&self, id: &str, user_id: &str) -> Vec<Chat> {
        swallow(self.try_get_ancestors(id, user_id).await, "get_ancestors", id).unwrap_or_default()
    }

    /// The thread below `id` as a tree, limited to the configured depth.
    pub async fn try_get_thread_tree(&self, id: &str, user_id: &str) -> Result<ThreadNode, ChatError> {
        let root = self.try_get_chat(id, user_id).await?;
        thread::tree(
            &self.records,
            &self.index,
            &self.store,
            root,
            self.max_tree_depth,
        )
        .await
    }

    pub async fn get_thread_tree(&self, id: &str, user_id: &str) -> Option<ThreadNode> {
        swallow(self.try_get_thread_tree(id, user_id).await, "get_thread_tree", id)
    }

    // ---------------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------------

    /// Persist a chat: record, index membership, and the parent update,
    /// submitted as one batch.
    ///
    /// Roots are pinned to `rootId == id` and `depth == 0`. A child without
    /// its own placement, or one whose parent changed, takes the parent's
    /// root and sits one level below it; the subtree of a moved chat is
    /// rebased to match. Store failures propagate.
    pub async fn save_chat(&self, chat: Chat, user_id: &str) -> Result<Vec<CommandReply>, ChatError> {
        let mut chat = normalize_chat(chat);
        if chat.id.is_empty() {
            return Err(ChatError::ConstraintViolation(
                "chat id must not be empty".to_string(),
            ));
        }
        if chat.user_id.is_empty() {
            chat.user_id = user_id.to_string();
        } else if chat.user_id != user_id {
            return Err(ChatError::Unauthorized);
        }
        if chat.parent_id.as_deref() == Some(chat.id.as_str()) {
            return Err(ChatError::ConstraintViolation(format!(
                "chat '{}' cannot be its own parent",
                chat.id
            )));
        }

        // Only threading fields are read back here, so a stored chat with an
        // unreadable message blob can still be overwritten.
        let records = self.records.for_threading();
        let existing = records.find(&self.store, &chat.id).await?;
        if let Some(existing) = &existing {
            if existing.user_id != user_id {
                return Err(ChatError::Unauthorized);
            }
        }
        let moved = existing
            .as_ref()
            .is_some_and(|e| e.parent_id != chat.parent_id);

        let parent = match &chat.parent_id {
            None => {
                chat.root_id = chat.id.clone();
                chat.depth = 0;
                None
            }
            Some(parent_id) => {
                let parent = records.find(&self.store, parent_id).await?;
                match &parent {
                    Some(parent) if parent.user_id != user_id => {
                        return Err(ChatError::Unauthorized);
                    }
                    Some(parent) => {
                        if moved && thread::is_in_chain(&records, &self.store, &chat.id, parent).await?
                        {
                            return Err(ChatError::ConstraintViolation(format!(
                                "chat '{}' cannot reply to its own descendant '{}'",
                                chat.id, parent.id
                            )));
                        }
                        let unplaced =
                            (chat.root_id.is_empty() || chat.root_id == chat.id) && chat.depth == 0;
                        if unplaced || moved {
                            chat.root_id = parent.root_id.clone();
                            chat.depth = parent.depth + 1;
                        }
                    }
                    None => {
                        warn!(
                            chat_id = %chat.id,
                            parent_id = %parent_id,
                            "Parent chat not found, indexing child without propagation"
                        );
                    }
                }
                parent
            }
        };

        let replaced = existing
            .as_ref()
            .filter(|e| e.root_id != chat.root_id || e.depth != chat.depth);
        let subtree = match replaced {
            Some(existing) => {
                thread::descendants(&records, &self.index, &self.store, existing).await?
            }
            None => Vec::new(),
        };

        let mut pipeline = Pipeline::new();
        self.records.upsert(&mut pipeline, &chat)?;
        if let Some(existing) = existing.as_ref().filter(|_| moved) {
            debug!(chat_id = %chat.id, "Chat moved within its threads, detaching old placement");
            self.index.detach_placement(&mut pipeline, existing);
        }
        self.index.on_save(&mut pipeline, &chat);
        self.propagation
            .on_save(&mut pipeline, &chat, parent.as_ref());
        thread::rebase(&records, &mut pipeline, &chat, &subtree);

        let replies = pipeline.execute(&self.store).await?;
        info!(
            chat_id = %chat.id,
            user_id = %user_id,
            parent_id = chat.parent_id.as_deref().unwrap_or(""),
            created = existing.is_none(),
            rebased = subtree.len(),
            "Saved chat"
        );
        Ok(replies)
    }

    /// Delete a chat owned by `user_id`, detach it from every index, and
    /// apply the orphan policy to its subtree.
    ///
    /// Message blobs are never decoded strictly here, so a chat with an
    /// unreadable blob can still be deleted.
    pub async fn try_delete_chat(&self, id: &str, user_id: &str) -> Result<(), ChatError> {
        let records = self.records.for_threading();
        let chat = self.owned(&records, id, user_id).await?;
        let parent = match &chat.parent_id {
            Some(parent_id) => records.find(&self.store, parent_id).await?,
            None => None,
        };
        let descendants = thread::descendants(&records, &self.index, &self.store, &chat).await?;

        let mut pipeline = Pipeline::new();
        self.records.delete(&mut pipeline, &chat.id);
        self.index.on_delete(&mut pipeline, &chat);
        self.propagation
            .on_delete(&mut pipeline, parent.as_ref(), Utc::now());
        thread::apply_orphan_policy(
            self.orphan_policy,
            &self.records,
            &self.index,
            &mut pipeline,
            &chat,
            &descendants,
        );
        pipeline.execute(&self.store).await?;

        info!(
            chat_id = %chat.id,
            user_id = %user_id,
            orphan_policy = %self.orphan_policy,
            descendants = descendants.len(),
            "Deleted chat"
        );
        Ok(())
    }

    pub async fn delete_chat(&self, id: &str, user_id: &str) -> OperationOutcome {
        match self.try_delete_chat(id, user_id).await {
            Ok(()) => OperationOutcome::ok(),
            Err(ChatError::NotFound) => OperationOutcome::error("Chat not found"),
            Err(ChatError::Unauthorized) => OperationOutcome::error("Unauthorized"),
            Err(e) => {
                warn!(chat_id = %id, error = %e, "Failed to delete chat");
                OperationOutcome::error("Failed to delete chat")
            }
        }
    }

    /// Remove every chat of the user. Returns how many index members were
    /// cleared; an empty index is `ChatError::NotFound`.
    ///
    /// Cleared children whose parent belongs to someone else are detached
    /// from that parent so its counter stays accurate.
    pub async fn try_clear_chats(&self, user_id: &str) -> Result<usize, ChatError> {
        let all_key = self.keys().all_chats(user_id);
        let ids = self.index.all(&self.store, &all_key).await?;
        if ids.is_empty() {
            return Err(ChatError::NotFound);
        }
        let chats = self
            .records
            .for_threading()
            .get_many(&self.store, &ids)
            .await?;
        let cleared: HashSet<&str> = ids.iter().map(String::as_str).collect();

        let mut pipeline = Pipeline::new();
        for chat in &chats {
            self.records.delete(&mut pipeline, &chat.id);
            pipeline.del(self.keys().children(&chat.id));
            if let Some(parent_id) = &chat.parent_id {
                if !cleared.contains(parent_id.as_str()) {
                    pipeline.detach_child(
                        self.keys().children(parent_id),
                        self.keys().record(&chat.id),
                        self.keys().record(parent_id),
                        CHILDREN_COUNT_FIELD,
                    );
                }
            }
        }
        pipeline.del(all_key);
        pipeline.del(self.keys().root_chats(user_id));
        pipeline.execute(&self.store).await?;

        info!(user_id = %user_id, count = ids.len(), "Cleared chats");
        Ok(ids.len())
    }

    pub async fn clear_chats(&self, user_id: &str) -> OperationOutcome {
        match self.try_clear_chats(user_id).await {
            Ok(_) => OperationOutcome::ok(),
            Err(ChatError::NotFound) => OperationOutcome::error("No chats to clear"),
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Failed to clear chats");
                OperationOutcome::error("Failed to clear chats")
            }
        }
    }

    /// Make a chat publicly viewable at `/share/{id}`.
    ///
    /// Only the `sharePath` field is written, so sharing never rewrites the
    /// rest of the record. Sharing an already shared chat is a no-op.
    pub async fn try_share_chat(&self, id: &str, user_id: &str) -> Result<Chat, ChatError> {
        let mut chat = self.try_get_chat(id, user_id).await?;
        if chat.share_path.is_some() {
            return Ok(chat);
        }
        let share_path = format!("/share/{}", chat.id);
        let mut pipeline = Pipeline::new();
        pipeline.hset(
            self.keys().record(&chat.id),
            vec![("sharePath".to_string(), share_path.clone())],
        );
        pipeline.execute(&self.store).await?;

        info!(chat_id = %chat.id, user_id = %user_id, "Shared chat");
        chat.share_path = Some(share_path);
        Ok(chat)
    }

    pub async fn share_chat(&self, id: &str, user_id: &str) -> Option<Chat> {
        swallow(self.try_share_chat(id, user_id).await, "share_chat", id)
    }

    /// Check that the store answers.
    pub async fn health(&self) -> Result<(), ChatError> {
        self.store.ping().await.map_err(ChatError::from)
    }
}

/// Collapse a typed result into the caller-facing `Option`.
///
/// Absence and ownership mismatches are expected and stay quiet; anything
/// else is logged before it is swallowed.
fn swallow<T>(result: Result<T, ChatError>, operation: &str, subject: &str) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(ChatError::NotFound) | Err(ChatError::Unauthorized) => None,
        Err(e) => {
            warn!(operation, subject, error = %e, "Read failed, returning empty result");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryThreadStore;
    use chrono::{DateTime, TimeZone};
    use serde_json::json;
    use threadkeep_types::config::MessageBlobPolicy;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn service() -> ChatService<MemoryThreadStore> {
        ChatService::new(MemoryThreadStore::new(), &ThreadKeepConfig::default())
    }

    fn service_with(policy: OrphanPolicy) -> ChatService<MemoryThreadStore> {
        let mut config = ThreadKeepConfig::default();
        config.threading.orphan_policy = policy;
        ChatService::new(MemoryThreadStore::new(), &config)
    }

    fn ids(chats: &[Chat]) -> Vec<&str> {
        chats.iter().map(|c| c.id.as_str()).collect()
    }

    fn root(id: &str, secs: i64) -> Chat {
        Chat::new_root(id, "u1", format!("Chat {id}"), at(secs))
    }

    /// A bare child payload: parent link only, placement left to the service.
    fn child(id: &str, parent: &str, secs: i64) -> Chat {
        let mut chat = root(id, secs);
        chat.parent_id = Some(parent.to_string());
        chat
    }

    #[tokio::test]
    async fn scenario_reply_counts_orders_and_detaches() {
        let svc = service();
        svc.save_chat(root("a", 100), "u1").await.unwrap();
        svc.save_chat(child("b", "a", 200), "u1").await.unwrap();

        let a = svc.get_chat("a", "u1").await.unwrap();
        assert_eq!(a.children_count, 1);
        assert_eq!(a.last_activity_at, at(200));
        assert_eq!(ids(&svc.get_chats("u1").await), ["b", "a"]);

        let b = svc.get_chat("b", "u1").await.unwrap();
        assert_eq!((b.root_id.as_str(), b.depth), ("a", 1));

        assert!(svc.delete_chat("b", "u1").await.is_ok());
        let a = svc.get_chat("a", "u1").await.unwrap();
        assert_eq!(a.children_count, 0);
        assert_eq!(ids(&svc.get_chats("u1").await), ["a"]);
    }

    #[tokio::test]
    async fn scenario_clear_then_nothing_to_clear() {
        let svc = service();
        svc.save_chat(root("a", 100), "u1").await.unwrap();
        svc.save_chat(child("b", "a", 200), "u1").await.unwrap();
        svc.save_chat(root("c", 300), "u1").await.unwrap();

        assert_eq!(svc.clear_chats("u1").await, OperationOutcome::ok());
        assert!(svc.get_chats("u1").await.is_empty());
        assert_eq!(
            svc.clear_chats("u1").await,
            OperationOutcome::error("No chats to clear")
        );
        assert!(svc.store().keys().is_empty());
    }

    #[tokio::test]
    async fn resaving_a_child_does_not_overcount() {
        let svc = service();
        svc.save_chat(root("a", 100), "u1").await.unwrap();
        let mut b = child("b", "a", 200);
        svc.save_chat(b.clone(), "u1").await.unwrap();
        b.push_message(json!({"role": "user", "content": "more"}), at(300));
        svc.save_chat(b, "u1").await.unwrap();

        let a = svc.get_chat("a", "u1").await.unwrap();
        assert_eq!(a.children_count, 1);
        assert_eq!(a.last_activity_at, at(300));
    }

    #[tokio::test]
    async fn saving_a_stale_parent_keeps_its_counter() {
        let svc = service();
        let a = root("a", 100);
        svc.save_chat(a.clone(), "u1").await.unwrap();
        svc.save_chat(child("b", "a", 200), "u1").await.unwrap();
        svc.save_chat(a, "u1").await.unwrap();
        assert_eq!(svc.get_chat("a", "u1").await.unwrap().children_count, 1);
    }

    #[tokio::test]
    async fn roots_are_pinned_to_themselves() {
        let svc = service();
        let mut a = root("a", 100);
        a.root_id = "elsewhere".to_string();
        a.depth = 5;
        a.parent_id = Some("null".to_string());
        svc.save_chat(a, "u1").await.unwrap();

        let a = svc.get_chat("a", "u1").await.unwrap();
        assert!(a.is_root());
        assert_eq!((a.root_id.as_str(), a.depth), ("a", 0));
        let roots = svc.get_thread_roots_page("u1", 10, 0).await;
        assert_eq!(ids(&roots.chats), ["a"]);
    }

    #[tokio::test]
    async fn pagination_is_complete_and_descending() {
        let svc = service();
        for i in 0..7 {
            svc.save_chat(root(&format!("c{i}"), 100 + i), "u1")
                .await
                .unwrap();
        }

        let mut all = Vec::new();
        let mut offset = 0;
        loop {
            let page = svc.get_chats_page("u1", 3, offset).await;
            all.extend(page.chats);
            match page.next_offset {
                Some(next) => offset = next,
                None => break,
            }
        }
        assert_eq!(all.len(), 7);
        assert!(
            all.windows(2)
                .all(|w| w[0].last_activity_at > w[1].last_activity_at)
        );
        let unique: HashSet<&str> = all.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(unique.len(), 7);
    }

    #[tokio::test]
    async fn zero_limit_page_is_empty() {
        let svc = service();
        svc.save_chat(root("a", 100), "u1").await.unwrap();
        assert_eq!(svc.get_chats_page("u1", 0, 0).await, ChatPage::empty());
    }

    #[tokio::test]
    async fn offsets_past_any_rank_are_empty_pages() {
        let svc = service();
        svc.save_chat(root("a", 100), "u1").await.unwrap();
        assert_eq!(
            svc.get_chats_page("u1", 20, i64::MAX as usize).await,
            ChatPage::empty()
        );
        assert_eq!(
            svc.try_get_chats_page("u1", 1, usize::MAX).await.unwrap(),
            ChatPage::empty()
        );
        assert_eq!(
            svc.get_thread_roots_page("u1", usize::MAX, 1).await,
            ChatPage::empty()
        );
    }

    #[tokio::test]
    async fn share_visibility() {
        let svc = service();
        svc.save_chat(root("a", 100), "u1").await.unwrap();
        assert!(svc.get_shared_chat("a").await.is_none());

        let shared = svc.share_chat("a", "u1").await.unwrap();
        assert_eq!(shared.share_path.as_deref(), Some("/share/a"));
        let seen = svc.get_shared_chat("a").await.unwrap();
        assert_eq!(seen.share_path.as_deref(), Some("/share/a"));
    }

    #[tokio::test]
    async fn only_the_owner_can_share_read_or_delete() {
        let svc = service();
        svc.save_chat(root("a", 100), "u1").await.unwrap();

        assert!(svc.share_chat("a", "u2").await.is_none());
        assert!(svc.get_chat("a", "u2").await.is_none());
        assert!(matches!(
            svc.try_get_chat("a", "u2").await,
            Err(ChatError::Unauthorized)
        ));
        assert_eq!(
            svc.delete_chat("a", "u2").await,
            OperationOutcome::error("Unauthorized")
        );
        assert!(svc.get_chat("a", "u1").await.is_some());
    }

    #[tokio::test]
    async fn save_rejects_foreign_payloads() {
        let svc = service();
        let mut a = root("a", 100);
        a.user_id = "u2".to_string();
        assert!(matches!(
            svc.save_chat(a, "u1").await,
            Err(ChatError::Unauthorized)
        ));

        let mut anonymous = root("b", 100);
        anonymous.user_id = String::new();
        svc.save_chat(anonymous, "u1").await.unwrap();
        assert_eq!(svc.get_chat("b", "u1").await.unwrap().user_id, "u1");
    }

    #[tokio::test]
    async fn save_rejects_self_parent() {
        let svc = service();
        assert!(matches!(
            svc.save_chat(child("a", "a", 100), "u1").await,
            Err(ChatError::ConstraintViolation(_))
        ));
    }

    #[tokio::test]
    async fn missing_parent_still_indexes_child() {
        let svc = service();
        svc.save_chat(child("b", "ghost", 200), "u1").await.unwrap();

        assert_eq!(ids(&svc.get_chats("u1").await), ["b"]);
        assert!(svc.store().contains_key("chat:ghost:children"));
        assert!(!svc.store().contains_key("chat:ghost"));
    }

    #[tokio::test]
    async fn delete_of_missing_chat_reports_not_found() {
        let svc = service();
        assert_eq!(
            svc.delete_chat("nope", "u1").await,
            OperationOutcome::error("Chat not found")
        );
    }

    #[tokio::test]
    async fn delete_promotes_children_by_default() {
        let svc = service();
        svc.save_chat(root("a", 100), "u1").await.unwrap();
        svc.save_chat(child("b", "a", 200), "u1").await.unwrap();
        svc.save_chat(child("c", "b", 300), "u1").await.unwrap();
        svc.save_chat(child("d", "c", 400), "u1").await.unwrap();

        assert!(svc.delete_chat("b", "u1").await.is_ok());

        let c = svc.get_chat("c", "u1").await.unwrap();
        assert!(c.is_root());
        assert_eq!((c.root_id.as_str(), c.depth), ("c", 0));
        let d = svc.get_chat("d", "u1").await.unwrap();
        assert_eq!((d.root_id.as_str(), d.depth), ("c", 1));

        let roots = svc.get_thread_roots_page("u1", 10, 0).await;
        let mut root_ids = ids(&roots.chats);
        root_ids.sort();
        assert_eq!(root_ids, ["a", "c"]);
        assert_eq!(svc.get_chat("a", "u1").await.unwrap().children_count, 0);
    }

    #[tokio::test]
    async fn delete_cascades_when_configured() {
        let svc = service_with(OrphanPolicy::Cascade);
        svc.save_chat(root("a", 100), "u1").await.unwrap();
        svc.save_chat(child("b", "a", 200), "u1").await.unwrap();
        svc.save_chat(child("c", "b", 300), "u1").await.unwrap();

        assert!(svc.delete_chat("a", "u1").await.is_ok());
        assert!(svc.get_chats("u1").await.is_empty());
        assert!(svc.store().keys().is_empty());
    }

    #[tokio::test]
    async fn clear_detaches_from_foreign_parents() {
        let svc = service();
        svc.save_chat(root("p", 100), "u1").await.unwrap();
        svc.save_chat(child("b", "p", 200), "u1").await.unwrap();
        assert_eq!(svc.get_chat("p", "u1").await.unwrap().children_count, 1);

        // Hand p over to u2 so b's parent belongs to someone else
        let mut pipeline = Pipeline::new();
        pipeline
            .zrem("user:v2:chat:u1", "chat:p")
            .zrem("user:v2:chat:u1:roots", "chat:p")
            .hset("chat:p", vec![("userId".to_string(), "u2".to_string())])
            .zadd("user:v2:chat:u2", 200_000.0, "chat:p");
        pipeline.execute(svc.store()).await.unwrap();

        assert!(svc.clear_chats("u1").await.is_ok());
        let p = svc.get_chat("p", "u2").await.unwrap();
        assert_eq!(p.children_count, 0);
        assert!(!svc.store().contains_key("chat:p:children"));
    }

    #[tokio::test]
    async fn moving_a_chat_updates_both_parents() {
        let svc = service();
        svc.save_chat(root("a", 100), "u1").await.unwrap();
        svc.save_chat(root("x", 110), "u1").await.unwrap();
        let mut b = child("b", "a", 200);
        svc.save_chat(b.clone(), "u1").await.unwrap();

        b.parent_id = Some("x".to_string());
        b.root_id = String::new();
        b.depth = 0;
        svc.save_chat(b, "u1").await.unwrap();

        assert_eq!(svc.get_chat("a", "u1").await.unwrap().children_count, 0);
        assert_eq!(svc.get_chat("x", "u1").await.unwrap().children_count, 1);
        assert_eq!(ids(&svc.get_children("x", "u1").await), ["b"]);
        assert!(svc.get_children("a", "u1").await.is_empty());
    }

    #[tokio::test]
    async fn replying_to_a_descendant_is_rejected() {
        let svc = service();
        svc.save_chat(root("a", 100), "u1").await.unwrap();
        svc.save_chat(child("b", "a", 200), "u1").await.unwrap();
        svc.save_chat(child("c", "b", 300), "u1").await.unwrap();

        for parent in ["b", "c"] {
            let mut a = svc.get_chat("a", "u1").await.unwrap();
            a.parent_id = Some(parent.to_string());
            assert!(matches!(
                svc.save_chat(a, "u1").await,
                Err(ChatError::ConstraintViolation(_))
            ));
        }

        let a = svc.get_chat("a", "u1").await.unwrap();
        assert!(a.is_root());
        assert_eq!(a.children_count, 1);
        let roots = svc.get_thread_roots_page("u1", 10, 0).await;
        assert_eq!(ids(&roots.chats), ["a"]);
        assert_eq!(svc.get_chat("b", "u1").await.unwrap().children_count, 1);
    }

    #[tokio::test]
    async fn moving_a_chat_rebases_its_subtree() {
        let svc = service();
        svc.save_chat(root("a", 100), "u1").await.unwrap();
        svc.save_chat(root("x", 110), "u1").await.unwrap();
        svc.save_chat(child("b", "a", 200), "u1").await.unwrap();
        svc.save_chat(child("c", "b", 300), "u1").await.unwrap();

        // Stored placement travels with the payload; the new parent wins
        let mut b = svc.get_chat("b", "u1").await.unwrap();
        b.parent_id = Some("x".to_string());
        svc.save_chat(b.clone(), "u1").await.unwrap();

        let b_now = svc.get_chat("b", "u1").await.unwrap();
        assert_eq!((b_now.root_id.as_str(), b_now.depth), ("x", 1));
        let c = svc.get_chat("c", "u1").await.unwrap();
        assert_eq!((c.root_id.as_str(), c.depth), ("x", 2));
        assert_eq!(c.parent_id.as_deref(), Some("b"));

        // Detaching to a root restarts the thread at b
        b.parent_id = None;
        svc.save_chat(b, "u1").await.unwrap();
        let b_now = svc.get_chat("b", "u1").await.unwrap();
        assert_eq!((b_now.root_id.as_str(), b_now.depth), ("b", 0));
        let c = svc.get_chat("c", "u1").await.unwrap();
        assert_eq!((c.root_id.as_str(), c.depth), ("b", 1));
        assert_eq!(svc.get_chat("x", "u1").await.unwrap().children_count, 0);
        let roots = svc.get_thread_roots_page("u1", 10, 0).await;
        let mut root_ids = ids(&roots.chats);
        root_ids.sort_unstable();
        assert_eq!(root_ids, ["a", "b", "x"]);
    }

    #[tokio::test]
    async fn thread_navigation() {
        let svc = service();
        svc.save_chat(root("a", 100), "u1").await.unwrap();
        svc.save_chat(child("b", "a", 200), "u1").await.unwrap();
        svc.save_chat(child("c", "b", 300), "u1").await.unwrap();

        assert_eq!(ids(&svc.get_ancestors("c", "u1").await), ["a", "b"]);
        assert_eq!(ids(&svc.get_children("a", "u1").await), ["b"]);
        let tree = svc.get_thread_tree("a", "u1").await.unwrap();
        assert_eq!(tree.size(), 3);
        assert!(svc.get_thread_tree("a", "u2").await.is_none());
    }

    #[tokio::test]
    async fn unavailable_store_is_distinguishable_from_absence() {
        let svc = service();
        svc.save_chat(root("a", 100), "u1").await.unwrap();
        svc.store().set_unavailable(true);

        // Caller-facing reads look empty either way
        assert!(svc.get_chat("a", "u1").await.is_none());
        assert!(svc.get_chats("u1").await.is_empty());
        // Typed reads tell the two apart
        assert!(matches!(
            svc.try_get_chat("a", "u1").await,
            Err(ChatError::StoreUnavailable(_))
        ));
        assert!(matches!(
            svc.try_get_chats("u1").await,
            Err(ChatError::StoreUnavailable(_))
        ));
        assert!(svc.health().await.is_err());
        assert!(matches!(
            svc.save_chat(root("b", 200), "u1").await,
            Err(ChatError::StoreUnavailable(_))
        ));
        assert_eq!(
            svc.delete_chat("a", "u1").await,
            OperationOutcome::error("Failed to delete chat")
        );

        svc.store().set_unavailable(false);
        assert!(svc.health().await.is_ok());
        assert!(svc.try_get_chat("zzz", "u1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn partial_batch_failure_leaves_prefix_applied() {
        let svc = service();
        svc.save_chat(root("a", 100), "u1").await.unwrap();
        // Record write and allChats add land, the children attach fails
        svc.store().fail_after(2);
        assert!(svc.save_chat(child("b", "a", 200), "u1").await.is_err());

        assert!(svc.try_get_chat("b", "u1").await.is_ok());
        assert_eq!(ids(&svc.get_chats("u1").await), ["b", "a"]);
        assert!(svc.get_children("a", "u1").await.is_empty());
        assert_eq!(svc.get_chat("a", "u1").await.unwrap().children_count, 0);
    }

    #[tokio::test]
    async fn strict_blob_policy_surfaces_serialization_errors() {
        let mut config = ThreadKeepConfig::default();
        config.threading.message_blob_policy = MessageBlobPolicy::Strict;
        let svc = ChatService::new(MemoryThreadStore::new(), &config);
        svc.save_chat(root("a", 100), "u1").await.unwrap();

        let mut pipeline = Pipeline::new();
        pipeline.hset("chat:a", vec![("messages".to_string(), "oops".to_string())]);
        pipeline.execute(svc.store()).await.unwrap();

        assert!(matches!(
            svc.try_get_chat("a", "u1").await,
            Err(ChatError::Serialization(_))
        ));
        assert!(svc.get_chat("a", "u1").await.is_none());
    }

    #[tokio::test]
    async fn corrupt_blob_never_blocks_writes_under_strict_policy() {
        let mut config = ThreadKeepConfig::default();
        config.threading.message_blob_policy = MessageBlobPolicy::Strict;
        let svc = ChatService::new(MemoryThreadStore::new(), &config);
        svc.save_chat(root("a", 100), "u1").await.unwrap();
        svc.save_chat(child("b", "a", 200), "u1").await.unwrap();
        svc.save_chat(root("c", 300), "u1").await.unwrap();

        let mut pipeline = Pipeline::new();
        for key in ["chat:a", "chat:b", "chat:c"] {
            pipeline.hset(key, vec![("messages".to_string(), "oops".to_string())]);
        }
        pipeline.execute(svc.store()).await.unwrap();

        assert!(svc.delete_chat("b", "u1").await.is_ok());
        assert!(!svc.store().contains_key("chat:b"));

        // A fresh payload replaces the unreadable record
        svc.save_chat(root("c", 400), "u1").await.unwrap();
        assert!(svc.try_get_chat("c", "u1").await.is_ok());

        assert!(svc.clear_chats("u1").await.is_ok());
        assert!(svc.store().keys().is_empty());
    }
}
