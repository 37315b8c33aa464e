//! ThreadKeep CLI entry point.
//!
//! Binary name: `tkeep`
//!
//! Parses CLI arguments, initializes tracing and the store, then dispatches
//! to the matching command handler.

mod cli;
mod state;

use clap::Parser;
use threadkeep_observe::tracing_setup::{TracingOptions, init_tracing, shutdown_tracing};

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&TracingOptions {
        verbosity: cli.verbose,
        json: false,
        enable_otel: cli.otel,
    })
    .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

    let result = run(&cli).await;
    shutdown_tracing();
    result
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let state = AppState::init().await?;
    let json = cli.json;

    match &cli.command {
        Commands::List => cli::chat::list_chats(&state, cli.require_user()?, json).await?,
        Commands::Page { limit, offset } => {
            cli::chat::page_chats(&state, cli.require_user()?, *limit, *offset, json).await?;
        }
        Commands::Roots { limit, offset } => {
            cli::thread::page_roots(&state, cli.require_user()?, *limit, *offset, json).await?;
        }
        Commands::Show { id } => cli::chat::show_chat(&state, cli.require_user()?, id, json).await?,
        Commands::Shared { id } => cli::chat::show_shared_chat(&state, id, json).await?,
        Commands::Children { id } => {
            cli::thread::list_children(&state, cli.require_user()?, id, json).await?;
        }
        Commands::Ancestors { id } => {
            cli::thread::list_ancestors(&state, cli.require_user()?, id, json).await?;
        }
        Commands::Tree { id } => cli::thread::show_tree(&state, cli.require_user()?, id, json).await?,
        Commands::Save { file } => {
            cli::chat::save_chat(&state, cli.require_user()?, file.as_deref(), json).await?;
        }
        Commands::New {
            title,
            parent,
            message,
        } => {
            cli::chat::new_chat(
                &state,
                cli.require_user()?,
                title,
                parent.as_deref(),
                message.as_deref(),
                json,
            )
            .await?;
        }
        Commands::Delete { id } => cli::chat::delete_chat(&state, cli.require_user()?, id, json).await?,
        Commands::Clear { yes } => cli::chat::clear_chats(&state, cli.require_user()?, *yes, json).await?,
        Commands::Share { id } => cli::chat::share_chat(&state, cli.require_user()?, id, json).await?,
        Commands::Health => cli::status::health(&state, json).await?,
    }

    Ok(())
}
