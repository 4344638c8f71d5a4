mod handlers;
mod router;

pub use router::build_router;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::core::context::BotContext;
use crate::core::lifecycle::LifecycleComponent;
use crate::core::notify::NotificationRouter;
use crate::interfaces::chat::ChatSink;
use crate::interfaces::slack::SlackState;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) ctx: BotContext,
    pub(crate) notifications: Arc<NotificationRouter>,
}

impl AppState {
    pub(crate) fn new(ctx: BotContext, chat: Arc<dyn ChatSink>) -> Self {
        Self {
            notifications: Arc::new(NotificationRouter::new(ctx.clone(), chat)),
            ctx,
        }
    }
}

/// The inbound HTTP listener: Jenkins notifications, Slack events and health.
pub struct WebhookServer {
    state: AppState,
    slack: Option<SlackState>,
    host: String,
    port: u16,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl WebhookServer {
    pub fn new(ctx: BotContext, chat: Arc<dyn ChatSink>, slack: Option<SlackState>) -> Self {
        let host = ctx.settings.server.host.clone();
        let port = ctx.settings.server.port;
        Self {
            state: AppState::new(ctx, chat),
            slack,
            host,
            port,
            shutdown: None,
            task: None,
        }
    }
}

#[async_trait]
impl LifecycleComponent for WebhookServer {
    async fn on_init(&mut self) -> Result<()> {
        info!("Webhook Server Interface initializing...");
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("could not bind webhook listener on {addr}"))?;
        let app = build_router(self.state.clone(), self.slack.clone());
        let (tx, rx) = oneshot::channel::<()>();

        info!("Webhook Server running at http://{addr}");
        self.task = Some(tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = rx.await;
            });
            if let Err(e) = serve.await {
                error!("Webhook Server crashed: {}", e);
            }
        }));
        self.shutdown = Some(tx);
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("Webhook Server Interface shutting down...");
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        Ok(())
    }
}
