use anyhow::Result;
use async_trait::async_trait;
use console::style;
use tracing::warn;

use crate::core::commands::Reply;
use crate::core::notify::Card;

/// Where replies and broadcasts go. Rooms are host room names such as `#prod`.
#[async_trait]
pub trait ChatSink: Send + Sync {
    async fn send_text(&self, room: &str, text: &str) -> Result<()>;
    async fn send_card(&self, room: &str, card: &Card) -> Result<()>;
    /// Uploads `content` to the room as a file called `name`.
    async fn send_stream(&self, room: &str, name: &str, content: &str) -> Result<()>;
}

/// Sends command replies in order. A failed delivery is logged and the rest still go out.
pub async fn deliver(sink: &dyn ChatSink, room: &str, replies: &[Reply]) {
    for reply in replies {
        let sent = match reply {
            Reply::Text(text) => sink.send_text(room, text).await,
            Reply::Attachment { name, content } => sink.send_stream(room, name, content).await,
        };
        if let Err(e) = sent {
            warn!("[{}] Failed to deliver reply: {}", room, e);
        }
    }
}

/// Prints to stdout; used by `gridbot run`.
pub struct ConsoleChat;

#[async_trait]
impl ChatSink for ConsoleChat {
    async fn send_text(&self, _room: &str, text: &str) -> Result<()> {
        println!("{}", text);
        Ok(())
    }

    async fn send_card(&self, room: &str, card: &Card) -> Result<()> {
        let title = match card.color {
            "red" => style(&card.title).red().bold(),
            "green" => style(&card.title).green().bold(),
            _ => style(&card.title).yellow().bold(),
        };
        println!("[{}] {} {}", room, title, card.body);
        if !card.link.is_empty() {
            println!("  {}", style(&card.link).underlined().cyan());
        }
        Ok(())
    }

    async fn send_stream(&self, _room: &str, name: &str, content: &str) -> Result<()> {
        println!("{}", style(format!("--- {} ---", name)).bold());
        print!("{}", content);
        if !content.ends_with('\n') {
            println!();
        }
        Ok(())
    }
}
