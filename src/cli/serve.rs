use anyhow::Result;
use console::style;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::ServeArgs;
use crate::core::config::Settings;
use crate::core::context::BotContext;
use crate::core::lifecycle::LifecycleManager;
use crate::core::terminal::{self, GuideSection};
use crate::interfaces::chat::{ChatSink, ConsoleChat};
use crate::interfaces::slack::{SlackChannel, SlackClient, SlackState};
use crate::interfaces::web::WebhookServer;

pub async fn run_serve(args: ServeArgs) -> Result<()> {
    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        settings.server.host = host;
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }

    info!("Starting gridbot (domain: {})...", settings.domain);
    let ctx = BotContext::from_settings(settings)?;
    let mut lifecycle = LifecycleManager::new();

    let token = ctx
        .settings
        .slack
        .bot_token
        .clone()
        .filter(|token| !token.is_empty());
    let (chat, slack): (Arc<dyn ChatSink>, Option<SlackState>) = match token {
        Some(token) => {
            let client = Arc::new(SlackClient::new(&token));
            let signing_secret = ctx.settings.slack.signing_secret.clone().unwrap_or_default();
            lifecycle.attach(Arc::new(Mutex::new(SlackChannel::new(
                client.clone(),
                &signing_secret,
            ))));
            let state = SlackState {
                ctx: ctx.clone(),
                client: client.clone(),
                signing_secret,
            };
            (client as Arc<dyn ChatSink>, Some(state))
        }
        None => {
            warn!("No slack.bot_token configured. Broadcasts will be printed to the console.");
            (Arc::new(ConsoleChat) as Arc<dyn ChatSink>, None)
        }
    };
    let slack_enabled = slack.is_some();

    lifecycle.attach(Arc::new(Mutex::new(WebhookServer::new(
        ctx.clone(),
        chat,
        slack,
    ))));
    lifecycle.start().await?;

    let server = &ctx.settings.server;
    GuideSection::new("gridbot")
        .status("Domain", &ctx.settings.domain)
        .status(
            "Webhook",
            &format!(
                "{}",
                style(format!("http://{}:{}/jenkins/notification", server.host, server.port))
                    .underlined()
                    .cyan()
            ),
        )
        .status("Slack", if slack_enabled { "enabled" } else { "disabled" })
        .status(
            "Notifications",
            if ctx.settings.notifications.receive { "on" } else { "off" },
        )
        .blank()
        .status(
            "Press Ctrl+C to stop the bot.",
            &format!("{}", style("Ctrl+C").bold().yellow()),
        )
        .print();

    tokio::signal::ctrl_c().await?;
    lifecycle.shutdown().await?;
    terminal::print_goodbye();
    Ok(())
}
