//! Batch builder for the store commands of one logical operation.
//!
//! A `Pipeline` collects the record write, the index mutations, and any
//! parent counter update, then submits them in a single `exec` call. The
//! store applies them in order with per-command atomicity only: a failure
//! part-way leaves the earlier commands applied and nothing rolls them back.

use threadkeep_types::error::StoreError;
use tracing::debug;

use super::{Command, CommandReply, ThreadStore};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    commands: Vec<Command>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hset(&mut self, key: impl Into<String>, fields: Vec<(String, String)>) -> &mut Self {
        self.commands.push(Command::HSet {
            key: key.into(),
            fields,
        });
        self
    }

    pub fn del(&mut self, key: impl Into<String>) -> &mut Self {
        self.commands.push(Command::Del { key: key.into() });
        self
    }

    pub fn zadd(&mut self, key: impl Into<String>, score: f64, member: impl Into<String>) -> &mut Self {
        self.commands.push(Command::ZAdd {
            key: key.into(),
            score,
            member: member.into(),
        });
        self
    }

    pub fn zrem(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.commands.push(Command::ZRem {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    /// See [`Command::AttachChild`].
    pub fn attach_child(
        &mut self,
        children_key: impl Into<String>,
        member: impl Into<String>,
        score: f64,
        parent_key: impl Into<String>,
        field: impl Into<String>,
    ) -> &mut Self {
        self.commands.push(Command::AttachChild {
            children_key: children_key.into(),
            member: member.into(),
            score,
            parent_key: parent_key.into(),
            field: field.into(),
        });
        self
    }

    /// See [`Command::DetachChild`].
    pub fn detach_child(
        &mut self,
        children_key: impl Into<String>,
        member: impl Into<String>,
        parent_key: impl Into<String>,
        field: impl Into<String>,
    ) -> &mut Self {
        self.commands.push(Command::DetachChild {
            children_key: children_key.into(),
            member: member.into(),
            parent_key: parent_key.into(),
            field: field.into(),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Submit the batch. An empty pipeline never reaches the store.
    pub async fn execute<S: ThreadStore>(self, store: &S) -> Result<Vec<CommandReply>, StoreError> {
        if self.commands.is_empty() {
            return Ok(Vec::new());
        }
        debug!(commands = self.commands.len(), "Executing pipeline");
        store.exec(self.commands).await
    }
}
