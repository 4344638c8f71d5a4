use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::post,
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::core::commands;
use crate::core::context::BotContext;
use crate::core::lifecycle::LifecycleComponent;
use crate::core::notify::Card;
use crate::interfaces::chat::{ChatSink, deliver};

const SLACK_API: &str = "https://slack.com/api";
const REPLAY_WINDOW_SECS: u64 = 300;

/// Slack Web API client; doubles as the bot's chat sink.
pub struct SlackClient {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
    channel_names: RwLock<HashMap<String, String>>,
}

impl SlackClient {
    pub fn new(bot_token: &str) -> Self {
        Self::with_api_base(bot_token, SLACK_API)
    }

    pub fn with_api_base(bot_token: &str, api_base: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
            channel_names: RwLock::new(HashMap::new()),
        }
    }

    fn check(method: &str, body: Value) -> Result<Value> {
        if body["ok"].as_bool() == Some(true) {
            return Ok(body);
        }
        let reason = body["error"].as_str().unwrap_or("unknown_error");
        bail!("Slack API error in {}: {}", method, reason)
    }

    async fn call_json(&self, method: &str, payload: &Value) -> Result<Value> {
        let resp = self
            .http
            .post(format!("{}/{}", self.api_base, method))
            .bearer_auth(&self.bot_token)
            .json(payload)
            .send()
            .await?;
        if !resp.status().is_success() {
            bail!("Slack API error in {}: HTTP {}", method, resp.status());
        }
        Self::check(method, resp.json().await?)
    }

    async fn call_form(&self, method: &str, form: &[(&str, &str)]) -> Result<Value> {
        let resp = self
            .http
            .post(format!("{}/{}", self.api_base, method))
            .bearer_auth(&self.bot_token)
            .form(form)
            .send()
            .await?;
        if !resp.status().is_success() {
            bail!("Slack API error in {}: HTTP {}", method, resp.status());
        }
        Self::check(method, resp.json().await?)
    }

    /// Identifies the bot user; used to validate the token at startup.
    pub async fn auth_test(&self) -> Result<String> {
        let body = self.call_form("auth.test", &[]).await?;
        Ok(body["user"].as_str().unwrap_or_default().to_string())
    }

    /// Channel id to channel name, cached for the life of the process.
    pub async fn channel_name(&self, channel_id: &str) -> Result<String> {
        if let Some(name) = self.channel_names.read().await.get(channel_id) {
            return Ok(name.clone());
        }
        let body = self
            .call_form("conversations.info", &[("channel", channel_id)])
            .await?;
        let name = body["channel"]["name"]
            .as_str()
            .ok_or_else(|| anyhow!("conversations.info returned no name for {}", channel_id))?
            .to_string();
        self.channel_names
            .write()
            .await
            .insert(channel_id.to_string(), name.clone());
        Ok(name)
    }
}

fn attachment_color(color: &str) -> &'static str {
    match color {
        "red" => "danger",
        "green" => "good",
        _ => "warning",
    }
}

#[async_trait]
impl ChatSink for SlackClient {
    async fn send_text(&self, room: &str, text: &str) -> Result<()> {
        self.call_json("chat.postMessage", &json!({ "channel": room, "text": text }))
            .await?;
        Ok(())
    }

    async fn send_card(&self, room: &str, card: &Card) -> Result<()> {
        let attachment = json!({
            "fallback": format!("{} {}", card.title, card.body).trim(),
            "color": attachment_color(card.color),
            "title": card.title,
            "title_link": card.link,
            "text": card.body,
        });
        self.call_json(
            "chat.postMessage",
            &json!({ "channel": room, "attachments": [attachment] }),
        )
        .await?;
        Ok(())
    }

    async fn send_stream(&self, room: &str, name: &str, content: &str) -> Result<()> {
        let length = content.len().to_string();
        let ticket = self
            .call_form(
                "files.getUploadURLExternal",
                &[("filename", name), ("length", &length)],
            )
            .await?;
        let upload_url = ticket["upload_url"]
            .as_str()
            .ok_or_else(|| anyhow!("files.getUploadURLExternal returned no upload_url"))?;
        let file_id = ticket["file_id"]
            .as_str()
            .ok_or_else(|| anyhow!("files.getUploadURLExternal returned no file_id"))?;

        let uploaded = self
            .http
            .post(upload_url)
            .body(content.to_string())
            .send()
            .await?;
        if !uploaded.status().is_success() {
            bail!("Slack file upload failed: HTTP {}", uploaded.status());
        }

        self.call_json(
            "files.completeUploadExternal",
            &json!({
                "files": [{ "id": file_id, "title": name }],
                "channel_id": room,
            }),
        )
        .await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct SlackState {
    pub ctx: BotContext,
    pub client: Arc<SlackClient>,
    pub signing_secret: String,
}

#[derive(Deserialize, Debug)]
struct SlackEventPayload {
    #[serde(rename = "type")]
    event_type: String,
    challenge: Option<String>,
    event: Option<SlackEventDetails>,
}

#[derive(Deserialize, Debug)]
struct SlackEventDetails {
    #[serde(rename = "type")]
    inner_type: String,
    text: Option<String>,
    user: Option<String>,
    channel: Option<String>,
    bot_id: Option<String>,
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Checks `x-slack-signature` against the signing secret. Requests outside the
/// replay window or without a parseable timestamp are rejected.
fn verify_signature(headers: &HeaderMap, body: &[u8], signing_secret: &str, now: u64) -> bool {
    use hmac::Mac;
    use sha2::Sha256;
    type HmacSha256 = hmac::Hmac<Sha256>;

    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let (Some(timestamp), Some(signature)) = (
        header("x-slack-request-timestamp"),
        header("x-slack-signature"),
    ) else {
        return false;
    };
    let Ok(sent_at) = timestamp.parse::<u64>() else {
        return false;
    };
    if now.abs_diff(sent_at) > REPLAY_WINDOW_SECS {
        return false;
    }

    let Ok(mut mac) = HmacSha256::new_from_slice(signing_secret.as_bytes()) else {
        return false;
    };
    mac.update(format!("v0:{}:", timestamp).as_bytes());
    mac.update(body);
    let expected = format!("v0={}", hex::encode(mac.finalize().into_bytes()));

    signature.len() == expected.len()
        && signature
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

async fn slack_events(State(state): State<SlackState>, headers: HeaderMap, body: Bytes) -> Response {
    if !state.signing_secret.is_empty()
        && !verify_signature(&headers, &body, &state.signing_secret, unix_now())
    {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Invalid signature" })),
        )
            .into_response();
    }

    let payload: SlackEventPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Invalid JSON" })),
            )
                .into_response();
        }
    };

    if payload.event_type == "url_verification"
        && let Some(challenge) = payload.challenge
    {
        return Json(json!({ "challenge": challenge })).into_response();
    }

    if payload.event_type != "event_callback" {
        return Json(json!({ "status": "ignored" })).into_response();
    }
    let Some(event) = payload.event else {
        return Json(json!({ "status": "ignored" })).into_response();
    };
    if event.bot_id.is_some() {
        return Json(json!({ "status": "ignored_bot" })).into_response();
    }
    if event.inner_type != "message" && event.inner_type != "app_mention" {
        return Json(json!({ "status": "ignored" })).into_response();
    }
    let (Some(text), Some(channel)) = (event.text, event.channel) else {
        return Json(json!({ "status": "ignored" })).into_response();
    };
    let Some(invocation) = commands::parse(&state.ctx.settings.chat.prefix, &text) else {
        return Json(json!({ "status": "ignored" })).into_response();
    };

    info!(
        "Slack command from {} in {}: {}",
        event.user.as_deref().unwrap_or("unknown"),
        channel,
        text
    );

    // Slack expects an answer within three seconds; resolution can take far longer.
    tokio::spawn(async move {
        let grid = match state.client.channel_name(&channel).await {
            Ok(name) => name.trim_start_matches('#').to_string(),
            Err(e) => {
                error!("Could not resolve Slack channel {}: {}", channel, e);
                return;
            }
        };
        let replies = commands::dispatch(&state.ctx, &grid, &invocation).await;
        deliver(state.client.as_ref(), &channel, &replies).await;
    });

    Json(json!({ "status": "ok" })).into_response()
}

pub fn slack_routes(state: SlackState) -> Router {
    Router::new()
        .route("/slack/events", post(slack_events))
        .with_state(state)
}

/// Validates the bot token when the server starts.
pub struct SlackChannel {
    client: Arc<SlackClient>,
    verified: bool,
}

impl SlackChannel {
    pub fn new(client: Arc<SlackClient>, signing_secret: &str) -> Self {
        if signing_secret.is_empty() {
            warn!("No slack.signing_secret configured. Slack event requests will NOT be verified.");
        }
        Self {
            client,
            verified: false,
        }
    }
}

#[async_trait]
impl LifecycleComponent for SlackChannel {
    async fn on_init(&mut self) -> Result<()> {
        info!("Slack Channel Interface initializing...");
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        match self.client.auth_test().await {
            Ok(user) => {
                self.verified = true;
                info!("Slack bot connected as {}", user);
            }
            Err(e) => warn!("Slack token check failed, replies may not be delivered: {}", e),
        }
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        debug!("Slack Channel Interface shutting down (verified: {})", self.verified);
        Ok(())
    }
}
