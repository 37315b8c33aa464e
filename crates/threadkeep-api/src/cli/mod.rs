//! CLI command definitions for the `tkeep` binary.
//!
//! Uses clap derive macros for argument parsing. Every command acting on
//! someone's chats needs `--user` (or `THREADKEEP_USER`).

pub mod chat;
pub mod render;
pub mod status;
pub mod thread;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// Inspect and manage threaded chat history.
#[derive(Parser)]
#[command(name = "tkeep", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Owner of the chats being read or written.
    #[arg(short, long, global = true, env = "THREADKEEP_USER")]
    pub user: Option<String>,

    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Detailed logs on stderr (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export trace spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// The `--user` value, required by every per-user command.
    pub fn require_user(&self) -> Result<&str> {
        self.user
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("No user given: pass --user or set THREADKEEP_USER"))
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// List every chat of the user, most recently active first.
    #[command(alias = "ls")]
    List,

    /// Show one page of the user's chats.
    Page {
        /// Page size (defaults to `default_page_size` from config.toml).
        #[arg(short, long)]
        limit: Option<usize>,

        /// Rank of the first chat on the page.
        #[arg(short, long, default_value = "0")]
        offset: usize,
    },

    /// Show one page of the user's thread roots.
    Roots {
        /// Page size (defaults to `default_page_size` from config.toml).
        #[arg(short, long)]
        limit: Option<usize>,

        /// Rank of the first root on the page.
        #[arg(short, long, default_value = "0")]
        offset: usize,
    },

    /// Show a chat with its messages.
    Show {
        /// Chat id.
        id: String,
    },

    /// Show a publicly shared chat (no --user needed).
    Shared {
        /// Chat id.
        id: String,
    },

    /// List the direct replies to a chat.
    Children {
        /// Chat id.
        id: String,
    },

    /// Show the chain from the thread root down to a chat's parent.
    Ancestors {
        /// Chat id.
        id: String,
    },

    /// Print the thread below a chat as a tree.
    Tree {
        /// Chat id.
        id: String,
    },

    /// Save a chat from a JSON document.
    Save {
        /// JSON file to read; stdin when omitted.
        file: Option<PathBuf>,
    },

    /// Start a new chat, optionally as a reply to another.
    New {
        /// Chat title.
        title: String,

        /// Id of the chat to reply to.
        #[arg(short, long)]
        parent: Option<String>,

        /// First user message.
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Delete a chat.
    #[command(alias = "rm")]
    Delete {
        /// Chat id.
        id: String,
    },

    /// Delete every chat of the user.
    Clear {
        /// Confirm the bulk delete.
        #[arg(long)]
        yes: bool,
    },

    /// Make a chat publicly viewable.
    Share {
        /// Chat id.
        id: String,
    },

    /// Check that the store answers.
    Health,
}
