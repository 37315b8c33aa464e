//! Thread navigation CLI commands: roots, children, ancestors, tree.

use anyhow::Result;
use console::style;

use super::chat::print_page;
use super::render::{print_chat_table, print_tree, short_id};
use crate::state::AppState;

/// Show one page of the user's thread roots.
pub async fn page_roots(
    state: &AppState,
    user: &str,
    limit: Option<usize>,
    offset: usize,
    json: bool,
) -> Result<()> {
    let limit = limit.unwrap_or_else(|| state.chat_service.default_page_size());
    let page = state
        .chat_service
        .try_get_thread_roots_page(user, limit, offset)
        .await?;
    print_page(&page, "tkeep roots", json)
}

/// List the direct replies to a chat.
pub async fn list_children(state: &AppState, user: &str, id: &str, json: bool) -> Result<()> {
    let children = state.chat_service.try_get_children(id, user).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&children)?);
        return Ok(());
    }

    print_chat_table(
        &children,
        &format!(
            "No replies yet. Add one with: {}",
            style(format!("tkeep new \"Reply\" --parent {id}")).yellow()
        ),
    );
    println!();
    Ok(())
}

/// Show the chain from the thread root down to a chat's parent.
pub async fn list_ancestors(state: &AppState, user: &str, id: &str, json: bool) -> Result<()> {
    let ancestors = state.chat_service.try_get_ancestors(id, user).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ancestors)?);
        return Ok(());
    }

    println!();
    if ancestors.is_empty() {
        println!(
            "  {} {} is a thread root.",
            style("i").blue().bold(),
            style(short_id(id)).dim()
        );
        println!();
        return Ok(());
    }

    for (depth, chat) in ancestors.iter().enumerate() {
        println!(
            "  {}{} {} {}",
            "  ".repeat(depth),
            style("↳").dim(),
            style(&chat.title).cyan(),
            style(short_id(&chat.id)).dim()
        );
    }
    println!(
        "  {}{} {}",
        "  ".repeat(ancestors.len()),
        style("↳").dim(),
        style(short_id(id)).bold()
    );
    println!();
    Ok(())
}

/// Print the thread below a chat.
pub async fn show_tree(state: &AppState, user: &str, id: &str, json: bool) -> Result<()> {
    let tree = state.chat_service.try_get_thread_tree(id, user).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tree)?);
        return Ok(());
    }

    print_tree(&tree);
    Ok(())
}
