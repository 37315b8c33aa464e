//! Shared terminal rendering for chat listings and thread trees.

use chrono::{DateTime, Utc};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use threadkeep_types::chat::{Chat, ThreadNode};

/// Print chats as a table, or an info line when there are none.
pub fn print_chat_table(chats: &[Chat], empty_hint: &str) {
    if chats.is_empty() {
        println!();
        println!("  {} {}", style("i").blue().bold(), empty_hint);
        println!();
        return;
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("ID").fg(Color::White),
        Cell::new("Title").fg(Color::White),
        Cell::new("Thread").fg(Color::White),
        Cell::new("Replies").fg(Color::White),
        Cell::new("Messages").fg(Color::White),
        Cell::new("Last Active").fg(Color::White),
    ]);

    for chat in chats {
        let placement = if chat.is_root() {
            Cell::new("● root").fg(Color::Green)
        } else {
            Cell::new(format!("↳ depth {}", chat.depth)).fg(Color::Yellow)
        };

        table.add_row(vec![
            Cell::new(short_id(&chat.id)).fg(Color::DarkGrey),
            Cell::new(truncate(&chat.title, 50)).fg(Color::Cyan),
            placement,
            Cell::new(chat.children_count),
            Cell::new(chat.messages.len()),
            Cell::new(format_relative_time(&chat.last_activity_at)).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!(
        "  {} chat{}",
        style(chats.len()).bold(),
        if chats.len() == 1 { "" } else { "s" }
    );
}

/// Print a thread tree with box-drawing connectors.
pub fn print_tree(node: &ThreadNode) {
    println!();
    println!(
        "  {} {}",
        style(&node.chat.title).cyan().bold(),
        style(short_id(&node.chat.id)).dim()
    );
    print_children(&node.children, "  ");
    println!();
    println!(
        "  {} chat{} in thread",
        style(node.size()).bold(),
        if node.size() == 1 { "" } else { "s" }
    );
    println!();
}

fn print_children(children: &[ThreadNode], prefix: &str) {
    for (i, child) in children.iter().enumerate() {
        let last = i + 1 == children.len();
        let connector = if last { "└─" } else { "├─" };
        println!(
            "{prefix}{} {} {} {}",
            style(connector).dim(),
            child.chat.title,
            style(short_id(&child.chat.id)).dim(),
            style(format_relative_time(&child.chat.last_activity_at)).dim()
        );
        let next = format!("{prefix}{}", if last { "   " } else { "│  " });
        print_children(&child.children, &next);
    }
}

/// Text of a message object for display: its `content` when that is a
/// string, the raw JSON otherwise.
pub fn message_text(message: &serde_json::Value) -> String {
    match message.get("content").and_then(|c| c.as_str()) {
        Some(content) => content.to_string(),
        None => message.to_string(),
    }
}

pub fn message_role(message: &serde_json::Value) -> &str {
    message
        .get("role")
        .and_then(|r| r.as_str())
        .unwrap_or("message")
}

pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let head: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

pub fn format_relative_time(dt: &DateTime<Utc>) -> String {
    let now = Utc::now();
    let diff = now - *dt;

    if diff.num_seconds() < 60 {
        "just now".to_string()
    } else if diff.num_minutes() < 60 {
        format!("{}m ago", diff.num_minutes())
    } else if diff.num_hours() < 24 {
        format!("{}h ago", diff.num_hours())
    } else if diff.num_days() < 30 {
        format!("{}d ago", diff.num_days())
    } else {
        dt.format("%Y-%m-%d").to_string()
    }
}
