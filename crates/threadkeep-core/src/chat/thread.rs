//! Thread traversal and the orphan policy applied on delete.
//!
//! Traversals follow the children indexes and keep a visited set, so a
//! corrupted parent link can never loop them.

use std::collections::{HashMap, HashSet, VecDeque};

use threadkeep_types::chat::{Chat, ThreadNode};
use threadkeep_types::config::OrphanPolicy;
use threadkeep_types::error::ChatError;
use tracing::warn;

use super::index::{IndexMaintainer, score};
use super::record::ChatRecords;
use crate::store::ThreadStore;
use crate::store::pipeline::Pipeline;

/// A chat reached during a subtree walk, with the id of the chat whose
/// children index it was found in.
#[derive(Debug, Clone, PartialEq)]
pub struct Descendant {
    pub parent: String,
    pub chat: Chat,
}

/// Direct children of `chat_id`, newest first.
pub async fn children<S: ThreadStore>(
    records: &ChatRecords,
    index: &IndexMaintainer,
    store: &S,
    chat_id: &str,
) -> Result<Vec<Chat>, ChatError> {
    let ids = index.all(store, &records.keys().children(chat_id)).await?;
    records.get_many(store, &ids).await
}

/// Every descendant of `root` in breadth-first order, excluding `root`.
pub async fn descendants<S: ThreadStore>(
    records: &ChatRecords,
    index: &IndexMaintainer,
    store: &S,
    root: &Chat,
) -> Result<Vec<Descendant>, ChatError> {
    let mut visited = HashSet::from([root.id.clone()]);
    let mut queue = VecDeque::from([root.id.clone()]);
    let mut found = Vec::new();

    while let Some(parent) = queue.pop_front() {
        for chat in children(records, index, store, &parent).await? {
            if !visited.insert(chat.id.clone()) {
                warn!(chat_id = %chat.id, parent_id = %parent, "Cycle in thread, skipping");
                continue;
            }
            queue.push_back(chat.id.clone());
            found.push(Descendant {
                parent: parent.clone(),
                chat,
            });
        }
    }
    Ok(found)
}

/// Ancestors of `chat` ordered from the thread root down to the direct
/// parent. Stops at a missing parent, a cycle, or a chat owned by someone
/// other than `chat.user_id`.
pub async fn ancestors<S: ThreadStore>(
    records: &ChatRecords,
    store: &S,
    chat: &Chat,
) -> Result<Vec<Chat>, ChatError> {
    let mut visited = HashSet::from([chat.id.clone()]);
    let mut chain = Vec::new();
    let mut next = chat.parent_id.clone();

    while let Some(parent_id) = next {
        if !visited.insert(parent_id.clone()) {
            warn!(chat_id = %chat.id, parent_id = %parent_id, "Cycle in ancestor chain, stopping");
            break;
        }
        let Some(parent) = records.find(store, &parent_id).await? else {
            break;
        };
        if parent.user_id != chat.user_id {
            break;
        }
        next = parent.parent_id.clone();
        chain.push(parent);
    }
    chain.reverse();
    Ok(chain)
}

/// True when `chat_id` already sits on the parent chain of `parent`, so
/// placing it under `parent` would close a loop.
///
/// Follows `parentId` links regardless of owner, stopping at a missing
/// parent or an existing loop.
pub async fn is_in_chain<S: ThreadStore>(
    records: &ChatRecords,
    store: &S,
    chat_id: &str,
    parent: &Chat,
) -> Result<bool, ChatError> {
    let mut visited = HashSet::from([parent.id.clone()]);
    if parent.id == chat_id {
        return Ok(true);
    }
    let mut next = parent.parent_id.clone();
    while let Some(id) = next {
        if id == chat_id {
            return Ok(true);
        }
        if !visited.insert(id.clone()) {
            break;
        }
        next = match records.find(store, &id).await? {
            Some(chat) => chat.parent_id,
            None => None,
        };
    }
    Ok(false)
}

/// Load the thread below `root` as a tree, at most `max_depth` levels deep.
///
/// Children are ordered newest first at every level.
pub async fn tree<S: ThreadStore>(
    records: &ChatRecords,
    index: &IndexMaintainer,
    store: &S,
    root: Chat,
    max_depth: u32,
) -> Result<ThreadNode, ChatError> {
    // Breadth-first load into a flat arena, then assemble bottom-up.
    let mut visited = HashSet::from([root.id.clone()]);
    let mut nodes: Vec<(Chat, Vec<usize>)> = vec![(root, Vec::new())];
    let mut queue = VecDeque::from([(0usize, 0u32)]);

    while let Some((slot, level)) = queue.pop_front() {
        if level >= max_depth {
            continue;
        }
        let parent_id = nodes[slot].0.id.clone();
        let owner = nodes[slot].0.user_id.clone();
        for chat in children(records, index, store, &parent_id).await? {
            if chat.user_id != owner || !visited.insert(chat.id.clone()) {
                continue;
            }
            let child_slot = nodes.len();
            nodes.push((chat, Vec::new()));
            nodes[slot].1.push(child_slot);
            queue.push_back((child_slot, level + 1));
        }
    }

    let mut built: HashMap<usize, ThreadNode> = HashMap::with_capacity(nodes.len());
    for (slot, (chat, child_slots)) in nodes.into_iter().enumerate().rev() {
        let children = child_slots
            .iter()
            .filter_map(|child| built.remove(child))
            .collect();
        built.insert(slot, ThreadNode { chat, children });
    }
    built.remove(&0).ok_or(ChatError::NotFound)
}

/// Queue what happens to the subtree of a deleted chat.
///
/// `descendants` must come from [`descendants`], so parents precede their
/// children.
pub fn apply_orphan_policy(
    policy: OrphanPolicy,
    records: &ChatRecords,
    index: &IndexMaintainer,
    pipeline: &mut Pipeline,
    deleted: &Chat,
    descendants: &[Descendant],
) {
    match policy {
        OrphanPolicy::Promote => promote(records, pipeline, deleted, descendants),
        OrphanPolicy::Cascade => {
            for Descendant { chat, .. } in descendants {
                records.delete(pipeline, &chat.id);
                pipeline.zrem(
                    records.keys().all_chats(&chat.user_id),
                    records.keys().record(&chat.id),
                );
                if chat.is_root() {
                    index.detach_placement(pipeline, chat);
                }
                pipeline.del(records.keys().children(&chat.id));
            }
        }
    }
}

/// Direct children become roots; deeper chats move to the new root with
/// their depth reduced to match.
fn promote(records: &ChatRecords, pipeline: &mut Pipeline, deleted: &Chat, descendants: &[Descendant]) {
    let keys = records.keys();
    let mut placement: HashMap<&str, (String, u32)> = HashMap::new();

    for Descendant { parent, chat } in descendants {
        if parent != &deleted.id {
            continue;
        }
        placement.insert(&chat.id, (chat.id.clone(), 0));
        pipeline.hset(
            keys.record(&chat.id),
            vec![
                ("parentId".to_string(), String::new()),
                ("rootId".to_string(), chat.id.clone()),
                ("depth".to_string(), "0".to_string()),
            ],
        );
        pipeline.zadd(
            keys.root_chats(&chat.user_id),
            score(chat.last_activity_at),
            keys.record(&chat.id),
        );
    }
    place_below(records, pipeline, placement, descendants);
}

/// Queue new `rootId`/`depth` values for the subtree of a chat that now
/// sits at `moved.root_id`, `moved.depth`.
pub fn rebase(records: &ChatRecords, pipeline: &mut Pipeline, moved: &Chat, descendants: &[Descendant]) {
    let placement = HashMap::from([(moved.id.as_str(), (moved.root_id.clone(), moved.depth))]);
    place_below(records, pipeline, placement, descendants);
}

/// Walk `descendants` (parents first) and place every chat one level
/// below its already placed parent. Chats whose parent is unplaced are
/// left alone.
fn place_below<'a>(
    records: &ChatRecords,
    pipeline: &mut Pipeline,
    mut placement: HashMap<&'a str, (String, u32)>,
    descendants: &'a [Descendant],
) {
    for Descendant { parent, chat } in descendants {
        if placement.contains_key(chat.id.as_str()) {
            continue;
        }
        let Some((root_id, depth)) = placement.get(parent.as_str()).cloned() else {
            continue;
        };
        let depth = depth + 1;
        pipeline.hset(
            records.keys().record(&chat.id),
            vec![
                ("rootId".to_string(), root_id.clone()),
                ("depth".to_string(), depth.to_string()),
            ],
        );
        placement.insert(&chat.id, (root_id, depth));
    }
}
