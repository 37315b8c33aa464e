//! Recency indexes over chats.
//!
//! Three sorted-set families, all scored by `lastActivityAt` in epoch
//! milliseconds: every chat of a user, root chats of a user, and direct
//! children of a chat. Members are record keys.

use chrono::{DateTime, Utc};
use threadkeep_types::chat::Chat;
use threadkeep_types::error::StoreError;

use super::keys::KeySpace;
use super::record::CHILDREN_COUNT_FIELD;
use crate::store::ThreadStore;
use crate::store::pipeline::Pipeline;

/// Index score of a timestamp.
pub fn score(ts: DateTime<Utc>) -> f64 {
    ts.timestamp_millis() as f64
}

/// Chat ids of one page plus the offset of the next page, if any.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndexPage {
    pub ids: Vec<String>,
    pub next_offset: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct IndexMaintainer {
    keys: KeySpace,
}

impl IndexMaintainer {
    pub fn new(keys: KeySpace) -> Self {
        Self { keys }
    }

    /// Queue index membership for a saved chat.
    ///
    /// A child goes into its parent's children index through `AttachChild`,
    /// so the parent's counter moves only when the child is new there.
    pub fn on_save(&self, pipeline: &mut Pipeline, chat: &Chat) {
        let member = self.keys.record(&chat.id);
        let score = score(chat.last_activity_at);
        pipeline.zadd(self.keys.all_chats(&chat.user_id), score, member.clone());
        match &chat.parent_id {
            None => {
                pipeline.zadd(self.keys.root_chats(&chat.user_id), score, member);
            }
            Some(parent_id) => {
                pipeline.attach_child(
                    self.keys.children(parent_id),
                    member,
                    score,
                    self.keys.record(parent_id),
                    CHILDREN_COUNT_FIELD,
                );
            }
        }
    }

    /// Queue removal of a chat from the roots index or its parent's
    /// children index, whichever `chat.parent_id` places it in.
    pub fn detach_placement(&self, pipeline: &mut Pipeline, chat: &Chat) {
        let member = self.keys.record(&chat.id);
        match &chat.parent_id {
            None => {
                pipeline.zrem(self.keys.root_chats(&chat.user_id), member);
            }
            Some(parent_id) => {
                pipeline.detach_child(
                    self.keys.children(parent_id),
                    member,
                    self.keys.record(parent_id),
                    CHILDREN_COUNT_FIELD,
                );
            }
        }
    }

    /// Queue removal of a deleted chat from every index, including its own
    /// children index.
    pub fn on_delete(&self, pipeline: &mut Pipeline, chat: &Chat) {
        pipeline.zrem(
            self.keys.all_chats(&chat.user_id),
            self.keys.record(&chat.id),
        );
        self.detach_placement(pipeline, chat);
        pipeline.del(self.keys.children(&chat.id));
    }

    /// Newest-first page over an index by rank.
    ///
    /// `next_offset` is set only when the page came back full. A zero
    /// `limit`, or an offset past any representable rank, is an empty
    /// terminal page and never reaches the store.
    pub async fn page<S: ThreadStore>(
        &self,
        store: &S,
        key: &str,
        limit: usize,
        offset: usize,
    ) -> Result<IndexPage, StoreError> {
        let Some((start, stop)) = rank_window(limit, offset) else {
            return Ok(IndexPage::default());
        };
        let members = store.zrange(key, start, stop, true).await?;
        let next_offset = (members.len() == limit)
            .then(|| offset.checked_add(limit))
            .flatten();
        Ok(IndexPage {
            ids: member_ids(members),
            next_offset,
        })
    }

    /// Every chat id in an index, newest first.
    pub async fn all<S: ThreadStore>(&self, store: &S, key: &str) -> Result<Vec<String>, StoreError> {
        let members = store.zrange(key, 0, -1, true).await?;
        Ok(member_ids(members))
    }
}

/// Inclusive rank bounds for a page, `None` when the page is empty or
/// cannot be expressed as store ranks.
fn rank_window(limit: usize, offset: usize) -> Option<(i64, i64)> {
    if limit == 0 {
        return None;
    }
    let start = i64::try_from(offset).ok()?;
    let len = i64::try_from(limit).ok()?;
    let stop = start.checked_add(len - 1)?;
    Some((start, stop))
}

fn member_ids(members: Vec<String>) -> Vec<String> {
    members
        .iter()
        .filter_map(|m| KeySpace::id_from_member(m))
        .map(str::to_string)
        .collect()
}
