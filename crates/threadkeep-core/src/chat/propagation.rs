//! Single-hop parent updates on child saves and deletes.
//!
//! A saved reply bumps its parent to the reply's `lastActivityAt` in the
//! parent owner's indexes. Grandparents are not touched. The parent counter
//! itself moves inside `AttachChild`/`DetachChild` (see `index`).

use chrono::{DateTime, Utc};
use threadkeep_types::chat::Chat;

use super::index::score;
use super::keys::KeySpace;
use super::record::format_timestamp;
use crate::store::pipeline::Pipeline;

#[derive(Debug, Clone)]
pub struct ParentPropagation {
    keys: KeySpace,
}

impl ParentPropagation {
    pub fn new(keys: KeySpace) -> Self {
        Self { keys }
    }

    /// Queue the recency bump of `parent` for a saved `child`.
    ///
    /// Only advances: a child older than the parent's current activity
    /// leaves the parent where it is. Nothing is queued without a fetched
    /// parent, so a missing parent is never recreated as a partial record.
    pub fn on_save(&self, pipeline: &mut Pipeline, child: &Chat, parent: Option<&Chat>) {
        let Some(parent) = parent else {
            return;
        };
        if child.last_activity_at <= parent.last_activity_at {
            return;
        }
        let member = self.keys.record(&parent.id);
        let score = score(child.last_activity_at);
        pipeline.hset(
            member.clone(),
            vec![(
                "lastActivityAt".to_string(),
                format_timestamp(child.last_activity_at),
            )],
        );
        pipeline.zadd(self.keys.all_chats(&parent.user_id), score, member.clone());
        if parent.is_root() {
            pipeline.zadd(self.keys.root_chats(&parent.user_id), score, member);
        }
    }

    /// Queue the `updatedAt` refresh of `parent` after a child delete.
    pub fn on_delete(&self, pipeline: &mut Pipeline, parent: Option<&Chat>, now: DateTime<Utc>) {
        if let Some(parent) = parent {
            pipeline.hset(
                self.keys.record(&parent.id),
                vec![("updatedAt".to_string(), format_timestamp(now))],
            );
        }
    }
}
