//! Chat CLI commands: list, page, show, save, new, delete, clear, share.

use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use console::style;
use tokio::io::AsyncReadExt;

use threadkeep_core::chat::normalize::normalize;
use threadkeep_types::chat::{Chat, ChatPage};

use super::render::{
    format_relative_time, message_role, message_text, print_chat_table, short_id,
};
use crate::state::AppState;

/// List every chat of the user, most recently active first.
pub async fn list_chats(state: &AppState, user: &str, json: bool) -> Result<()> {
    let chats = state.chat_service.try_get_chats(user).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&chats)?);
        return Ok(());
    }

    print_chat_table(
        &chats,
        &format!(
            "No chats yet. Start one with: {}",
            style("tkeep new \"My first chat\"").yellow()
        ),
    );
    println!();
    Ok(())
}

/// Show one page of the user's chats.
pub async fn page_chats(
    state: &AppState,
    user: &str,
    limit: Option<usize>,
    offset: usize,
    json: bool,
) -> Result<()> {
    let limit = limit.unwrap_or_else(|| state.chat_service.default_page_size());
    let page = state
        .chat_service
        .try_get_chats_page(user, limit, offset)
        .await?;
    print_page(&page, "tkeep page", json)
}

/// Render a page with a hint for fetching the next one.
pub(crate) fn print_page(page: &ChatPage, command: &str, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(page)?);
        return Ok(());
    }

    print_chat_table(&page.chats, "Nothing on this page.");
    if let Some(next) = page.next_offset {
        println!(
            "  Next page: {}",
            style(format!("{command} --offset {next}")).yellow()
        );
    }
    println!();
    Ok(())
}

/// Show a chat with its messages.
pub async fn show_chat(state: &AppState, user: &str, id: &str, json: bool) -> Result<()> {
    let chat = state.chat_service.try_get_chat(id, user).await?;
    print_chat(&chat, json)
}

/// Show a publicly shared chat.
pub async fn show_shared_chat(state: &AppState, id: &str, json: bool) -> Result<()> {
    let chat = state.chat_service.try_get_shared_chat(id).await?;
    print_chat(&chat, json)
}

fn print_chat(chat: &Chat, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(chat)?);
        return Ok(());
    }

    println!();
    println!("  {}", style(&chat.title).cyan().bold());
    println!();
    println!("  {}  {}", style("ID:").bold(), style(&chat.id).dim());
    println!("  {}  {}", style("Path:").bold(), chat.path);
    if let Some(share_path) = &chat.share_path {
        println!("  {}  {}", style("Shared:").bold(), style(share_path).green());
    }
    match &chat.parent_id {
        Some(parent_id) => println!(
            "  {}  reply to {} (depth {}, thread {})",
            style("Thread:").bold(),
            style(parent_id).yellow(),
            chat.depth,
            short_id(&chat.root_id)
        ),
        None => println!("  {}  root", style("Thread:").bold()),
    }
    println!(
        "  {}  {}",
        style("Replies:").bold(),
        chat.children_count
    );
    println!(
        "  {}  {} (created {})",
        style("Active:").bold(),
        format_relative_time(&chat.last_activity_at),
        chat.created_at.format("%Y-%m-%d %H:%M")
    );
    println!();

    if chat.messages.is_empty() {
        println!("  {}", style("(no messages)").dim());
    } else {
        println!("  {}", style("── Messages ──").dim());
        for message in &chat.messages {
            println!(
                "  {} {}",
                style(format!("{}:", message_role(message))).bold(),
                message_text(message)
            );
        }
    }
    println!();
    Ok(())
}

/// Save a chat from a JSON document read from `file` or stdin.
///
/// The document goes through the same normalization as stored records, so
/// partial objects are accepted.
pub async fn save_chat(
    state: &AppState,
    user: &str,
    file: Option<&Path>,
    json: bool,
) -> Result<()> {
    let raw = match file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("Failed to read chat JSON from stdin")?;
            buf
        }
    };

    let value: serde_json::Value = serde_json::from_str(&raw).context("Chat is not valid JSON")?;
    let Some(object) = value.as_object() else {
        bail!("Chat JSON must be an object");
    };
    let chat = normalize(object);
    let id = chat.id.clone();

    let replies = state.chat_service.save_chat(chat, user).await?;
    tracing::debug!(chat_id = %id, commands = replies.len(), "Chat batch applied");

    let saved = state.chat_service.try_get_chat(&id, user).await?;
    print_saved(&saved, json)
}

/// Start a new chat, optionally as a reply to `parent`.
pub async fn new_chat(
    state: &AppState,
    user: &str,
    title: &str,
    parent: Option<&str>,
    message: Option<&str>,
    json: bool,
) -> Result<()> {
    let now = Utc::now();
    let mut chat = Chat::new_root(Chat::generate_id(), user, title, now);
    chat.parent_id = parent.map(str::to_string);
    if let Some(content) = message {
        chat.push_message(
            serde_json::json!({ "role": "user", "content": content }),
            now,
        );
    }
    let id = chat.id.clone();

    state.chat_service.save_chat(chat, user).await?;

    let saved = state.chat_service.try_get_chat(&id, user).await?;
    print_saved(&saved, json)
}

fn print_saved(chat: &Chat, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(chat)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Saved {}",
        style("✓").green().bold(),
        style(&chat.title).cyan()
    );
    println!("  {}  {}", style("ID:").bold(), style(&chat.id).dim());
    if let Some(parent_id) = &chat.parent_id {
        println!(
            "  {}  reply to {} at depth {}",
            style("Thread:").bold(),
            style(parent_id).yellow(),
            chat.depth
        );
    }
    println!();
    Ok(())
}

/// Delete a chat.
pub async fn delete_chat(state: &AppState, user: &str, id: &str, json: bool) -> Result<()> {
    let outcome = state.chat_service.delete_chat(id, user).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    if let Some(error) = outcome.error {
        bail!("{error}");
    }

    println!();
    println!(
        "  {} Deleted chat {}",
        style("✓").green().bold(),
        style(id).dim()
    );
    println!();
    Ok(())
}

/// Delete every chat of the user once `--yes` confirms it.
pub async fn clear_chats(state: &AppState, user: &str, yes: bool, json: bool) -> Result<()> {
    if !yes {
        bail!("Refusing to delete all chats of '{user}' without --yes");
    }

    let outcome = state.chat_service.clear_chats(user).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    if let Some(error) = outcome.error {
        bail!("{error}");
    }

    println!();
    println!(
        "  {} Cleared all chats of {}",
        style("✓").green().bold(),
        style(user).cyan()
    );
    println!();
    Ok(())
}

/// Make a chat publicly viewable.
pub async fn share_chat(state: &AppState, user: &str, id: &str, json: bool) -> Result<()> {
    let chat = state.chat_service.try_share_chat(id, user).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&chat)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Shared {}",
        style("✓").green().bold(),
        style(&chat.title).cyan()
    );
    if let Some(share_path) = &chat.share_path {
        println!("  {}  {}", style("Path:").bold(), style(share_path).yellow());
    }
    println!(
        "  View it with: {}",
        style(format!("tkeep shared {}", chat.id)).yellow()
    );
    println!();
    Ok(())
}
