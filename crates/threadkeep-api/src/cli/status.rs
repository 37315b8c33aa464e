//! Store health check command.

use anyhow::Result;
use console::style;

use crate::state::AppState;

/// Ping the store and report the backend in use.
pub async fn health(state: &AppState, json: bool) -> Result<()> {
    let result = state.chat_service.health().await;
    let backend = state.config.store.backend.to_string();

    if json {
        let status = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "data_dir": state.data_dir.display().to_string(),
            "backend": backend,
            "healthy": result.is_ok(),
            "error": result.as_ref().err().map(|e| e.to_string()),
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!();
    println!("  {} ThreadKeep v{}", style("⚡").bold(), env!("CARGO_PKG_VERSION"));
    println!();
    println!("  {}", style("── Store ──").dim());
    println!("  Backend:  {}", style(&backend).bold());
    println!("  Data:     {}", style(state.data_dir.display()).dim());
    match &result {
        Ok(()) => println!("  Status:   {}", style("● healthy").green()),
        Err(e) => println!("  Status:   {} {}", style("○ unavailable").red(), style(e).dim()),
    }
    println!();

    result.map_err(Into::into)
}
