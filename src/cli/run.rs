use anyhow::{Result, bail};
use std::path::Path;
use tracing::info;

use crate::core::commands;
use crate::core::config::Settings;
use crate::core::context::BotContext;
use crate::interfaces::chat::{ConsoleChat, deliver};

/// Adds the chat prefix unless the line already carries it.
pub(crate) fn with_prefix(prefix: &str, line: &str) -> String {
    let line = line.trim();
    if line.starts_with(prefix) {
        line.to_string()
    } else {
        format!("{prefix}{line}")
    }
}

/// Dispatches one chat command as if it had been typed in the grid's room.
pub async fn run_command(config: Option<&Path>, room: &str, line: &str) -> Result<()> {
    let settings = Settings::load(config)?;
    let line = with_prefix(&settings.chat.prefix, line);
    let Some(invocation) = commands::parse(&settings.chat.prefix, &line) else {
        bail!("`{line}` is not a gridbot command, try `gridbot run --room {room} help`");
    };

    let ctx = BotContext::from_settings(settings)?;
    let replies = commands::dispatch(&ctx, room, &invocation).await;
    deliver(&ConsoleChat, &format!("#{room}"), &replies).await;
    Ok(())
}

pub async fn run_resolve(config: Option<&Path>, grid: &str) -> Result<()> {
    let settings = Settings::load(config)?;
    let ctx = BotContext::from_settings(settings)?;

    if !ctx.settings.jenkins.discovery {
        info!("[{}] Discovery is disabled in config; probing anyway.", grid);
    }

    match ctx.connections.resolver().resolve(grid).await? {
        Some(endpoint) => println!("{endpoint}"),
        None => println!("unresolved"),
    }
    Ok(())
}
