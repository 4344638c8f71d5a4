//! Build notifications from the Jenkins notification plugin.
//!
//! The grid is read off the build URL, the payload is enriched with the git
//! revision the build used, and the rendered message is broadcast.

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::config::{NotificationFormat, ScmSettings, Settings};
use crate::core::context::BotContext;
use crate::interfaces::chat::ChatSink;

pub const DISABLED_NOTICE: &str = "Notification handling is disabled.";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("malformed notification payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("build URL {0} does not belong to a known grid")]
    Unroutable(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ScmInfo {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub commit: String,
    #[serde(default)]
    pub branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BuildEvent {
    pub full_url: String,
    pub number: u64,
    pub phase: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub scm: Option<ScmInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitInfo {
    pub commit: String,
    pub url: String,
    pub branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BuildNotification {
    pub name: String,
    #[serde(default)]
    pub fullname: Option<String>,
    pub build: BuildEvent,
    #[serde(skip)]
    pub git: Option<GitInfo>,
}

impl BuildNotification {
    pub fn fullname(&self) -> &str {
        self.fullname.as_deref().unwrap_or(&self.name)
    }
}

/// A structured broadcast: `color` is `red`, `green` or `yellow`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Card {
    pub title: String,
    pub body: String,
    pub link: String,
    pub color: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Disabled,
    Delivered { grid: String, rooms: Vec<String> },
}

/// Extracts the grid from `https://master-<grid>.<domain>...`.
pub fn grid_from_url(domain: &str, url: &str) -> Option<String> {
    let pattern = format!(r"^https://master-([^/]+?)\.{}", regex::escape(domain));
    let re = Regex::new(&pattern).ok()?;
    re.captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Maps a git remote to its public browse URL: the part after the marker
/// (and one separator) has `_` turned into `/` and is appended to the base.
pub fn browse_url(remote: &str, scm: &ScmSettings) -> String {
    let Some(idx) = remote.find(&scm.remote_marker) else {
        return remote.to_string();
    };
    let tail = remote
        .get(idx + scm.remote_marker.len() + 1..)
        .unwrap_or_default()
        .replace('_', "/");
    format!("{}/{}", scm.browse_base_url.trim_end_matches('/'), tail)
}

/// The revision from the first action that carries `lastBuiltRevision`.
pub fn git_from_actions(actions: &[Value], scm: &ScmSettings) -> Option<GitInfo> {
    let action = actions
        .iter()
        .find(|a| a.get("lastBuiltRevision").is_some_and(|r| !r.is_null()))?;
    let revision = &action["lastBuiltRevision"];
    let remote = action["remoteUrls"][0].as_str().unwrap_or_default();
    Some(GitInfo {
        commit: revision["SHA1"].as_str().unwrap_or_default().to_string(),
        url: browse_url(remote, scm),
        branch: revision["branch"][0]["name"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
    })
}

fn status_color(status: Option<&str>) -> &'static str {
    match status {
        Some("FAILURE") => "red",
        Some("SUCCESS") => "green",
        _ => "yellow",
    }
}

pub fn render_card(notification: &BuildNotification) -> Card {
    let build = &notification.build;
    let git = notification.git.as_ref();
    let branch = git.map(|g| format!(", {}", g.branch)).unwrap_or_default();
    Card {
        title: git
            .map(|g| g.commit.chars().take(6).collect())
            .unwrap_or_default(),
        body: format!(
            "{} {} {}{} #{}",
            build.status.as_deref().unwrap_or_default(),
            build.phase,
            notification.fullname(),
            branch,
            build.number
        ),
        link: git
            .map(|g| format!("{}/commit/{}", g.url, g.commit))
            .unwrap_or_default(),
        color: status_color(build.status.as_deref()),
    }
}

pub fn render_text(notification: &BuildNotification) -> String {
    let build = &notification.build;
    let mut out = format!(
        "Build #{} {} {} for Job {} ({})",
        build.number,
        build.phase,
        build.status.as_deref().unwrap_or_default(),
        notification.fullname(),
        build.full_url
    );

    let mut based_on = Vec::new();
    if let Some(scm) = &build.scm {
        based_on.push(format!(
            "Based on {}/commit/{} ({})",
            scm.url, scm.commit, scm.branch
        ));
    }
    if let Some(git) = &notification.git {
        based_on.push(format!(
            "Based on {}/commit/{} ({})",
            git.url, git.commit, git.branch
        ));
    }
    if !based_on.is_empty() {
        out.push('\n');
        out.push_str(&based_on.join(" "));
    }
    out
}

/// Configured rooms, then the grid room, then the host presence rooms, each once.
pub fn broadcast_rooms(settings: &Settings, grid_room: &str) -> Vec<String> {
    let mut rooms: Vec<String> = Vec::new();
    let candidates = settings
        .notifications
        .chatrooms
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(grid_room))
        .chain(settings.chat.presence_rooms.iter().map(String::as_str));
    for room in candidates {
        if !rooms.iter().any(|r| r == room) {
            rooms.push(room.to_string());
        }
    }
    rooms
}

pub struct NotificationRouter {
    ctx: BotContext,
    chat: Arc<dyn ChatSink>,
}

impl NotificationRouter {
    pub fn new(ctx: BotContext, chat: Arc<dyn ChatSink>) -> Self {
        Self { ctx, chat }
    }

    /// Handles one webhook body. Enrichment problems are logged and the
    /// notification still goes out without git details.
    pub async fn route(&self, payload: Value) -> Result<RouteOutcome, NotifyError> {
        let settings = &self.ctx.settings;
        if !settings.notifications.receive {
            return Ok(RouteOutcome::Disabled);
        }

        let mut notification: BuildNotification = serde_json::from_value(payload)?;
        debug!("Incoming notification {:?}", notification);

        let grid = grid_from_url(&settings.domain, &notification.build.full_url)
            .ok_or_else(|| NotifyError::Unroutable(notification.build.full_url.clone()))?;
        let grid_room = format!("#{grid}");

        notification.git = self.revision(&grid, &notification).await;

        let rooms = broadcast_rooms(settings, &grid_room);
        match settings.notifications.format {
            NotificationFormat::Card => {
                let card = render_card(&notification);
                for room in &rooms {
                    if let Err(e) = self.chat.send_card(room, &card).await {
                        warn!("[{}] Failed to broadcast to {}: {}", grid, room, e);
                    }
                }
            }
            NotificationFormat::Text => {
                let text = render_text(&notification);
                for room in &rooms {
                    if let Err(e) = self.chat.send_text(room, &text).await {
                        warn!("[{}] Failed to broadcast to {}: {}", grid, room, e);
                    }
                }
            }
        }

        info!(
            "[{}] Broadcast build #{} of {} to {}",
            grid,
            notification.build.number,
            notification.fullname(),
            rooms.join(", ")
        );
        Ok(RouteOutcome::Delivered { grid, rooms })
    }

    async fn revision(&self, grid: &str, notification: &BuildNotification) -> Option<GitInfo> {
        let jenkins = match self.ctx.connections.get_or_create(grid).await {
            Ok(jenkins) => jenkins,
            Err(e) => {
                warn!("[{}] Skipping git details: {}", grid, e);
                return None;
            }
        };
        match jenkins
            .get_build_info(&notification.name, notification.build.number)
            .await
        {
            Ok(info) => git_from_actions(&info.actions, &self.ctx.settings.scm),
            Err(e) => {
                warn!("[{}] Skipping git details: {}", grid, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::testing::{PROD_URL, context_with};
    use crate::core::jenkins::fake::FakeJenkins;
    use crate::interfaces::chat::testing::{RecordingChat, Sent};
    use serde_json::json;

    fn scm() -> ScmSettings {
        ScmSettings {
            remote_marker: "devgit".to_string(),
            browse_base_url: "https://devgit.example.com/".to_string(),
        }
    }

    fn payload() -> Value {
        json!({
            "build": {
                "full_url": "https://master-prod.example.com/job/x/12/",
                "number": 12,
                "phase": "FINISHED",
                "status": "SUCCESS"
            },
            "name": "x"
        })
    }

    fn git_actions() -> Value {
        json!([
            { "_class": "hudson.model.CauseAction" },
            {
                "_class": "hudson.plugins.git.util.BuildData",
                "lastBuiltRevision": {
                    "SHA1": "3f9a2c71d0e4b5a6",
                    "branch": [{ "name": "origin/release" }]
                },
                "remoteUrls": ["ssh://git@host/devgit/platform_api"]
            }
        ])
    }

    fn router(
        backend: Arc<FakeJenkins>,
        extra_toml: &str,
    ) -> (NotificationRouter, Arc<RecordingChat>) {
        let chat = Arc::new(RecordingChat::default());
        (
            NotificationRouter::new(context_with(backend, extra_toml), chat.clone()),
            chat,
        )
    }

    #[test]
    fn grid_comes_from_the_master_hostname() {
        assert_eq!(
            grid_from_url("example.com", "https://master-prod.example.com/job/x/12/").as_deref(),
            Some("prod")
        );
        assert_eq!(
            grid_from_url("example.com", "https://master-eu-west.example.com/").as_deref(),
            Some("eu-west")
        );
        assert_eq!(
            grid_from_url("example.com", "https://master-prod.example.com/job/a.example.com/1/")
                .as_deref(),
            Some("prod")
        );
        assert_eq!(
            grid_from_url("example.com", "https://master-x/job/a.example.com/1/"),
            None
        );
        assert_eq!(grid_from_url("example.com", "https://master-prod.exampleXcom/"), None);
        assert_eq!(grid_from_url("example.com", "http://master-prod.example.com/"), None);
        assert_eq!(grid_from_url("example.com", "https://jenkins.example.com/"), None);
    }

    #[test]
    fn remotes_become_browse_urls() {
        assert_eq!(
            browse_url("ssh://git@host/devgit/platform_api", &scm()),
            "https://devgit.example.com/platform/api"
        );
        assert_eq!(
            browse_url("https://github.com/acme/widgets", &scm()),
            "https://github.com/acme/widgets"
        );
    }

    #[test]
    fn git_details_come_from_the_first_revision_action() {
        let actions: Vec<Value> = serde_json::from_value(git_actions()).unwrap();
        assert_eq!(
            git_from_actions(&actions, &scm()),
            Some(GitInfo {
                commit: "3f9a2c71d0e4b5a6".to_string(),
                url: "https://devgit.example.com/platform/api".to_string(),
                branch: "origin/release".to_string(),
            })
        );
        assert_eq!(git_from_actions(&actions[..1], &scm()), None);
    }

    #[test]
    fn card_and_text_rendering() {
        let mut notification: BuildNotification = serde_json::from_value(payload()).unwrap();
        assert_eq!(
            render_card(&notification),
            Card {
                title: String::new(),
                body: "SUCCESS FINISHED x #12".to_string(),
                link: String::new(),
                color: "green",
            }
        );

        notification.build.status = Some("FAILURE".to_string());
        notification.fullname = Some("team/x".to_string());
        notification.git = Some(GitInfo {
            commit: "3f9a2c71d0e4".to_string(),
            url: "https://devgit.example.com/platform/api".to_string(),
            branch: "origin/release".to_string(),
        });
        assert_eq!(
            render_card(&notification),
            Card {
                title: "3f9a2c".to_string(),
                body: "FAILURE FINISHED team/x, origin/release #12".to_string(),
                link: "https://devgit.example.com/platform/api/commit/3f9a2c71d0e4".to_string(),
                color: "red",
            }
        );
        assert_eq!(
            render_text(&notification),
            "Build #12 FINISHED FAILURE for Job team/x (https://master-prod.example.com/job/x/12/)\n\
             Based on https://devgit.example.com/platform/api/commit/3f9a2c71d0e4 (origin/release)"
        );

        notification.build.status = Some("ABORTED".to_string());
        assert_eq!(render_card(&notification).color, "yellow");
    }

    #[tokio::test]
    async fn webhook_is_routed_to_the_grid_room_with_git_details() {
        let backend = Arc::new(FakeJenkins::new(PROD_URL));
        backend.state.lock().unwrap().build_infos.insert(
            ("x".to_string(), 12),
            json!({ "number": 12, "url": "u", "actions": git_actions() }),
        );
        let (router, chat) = router(backend.clone(), "");

        let outcome = router.route(payload()).await.unwrap();
        assert_eq!(
            outcome,
            RouteOutcome::Delivered {
                grid: "prod".to_string(),
                rooms: vec!["#prod".to_string()],
            }
        );
        let sent = chat.sent();
        assert_eq!(sent.len(), 1);
        let Sent::Card(room, card) = &sent[0] else {
            panic!("expected a card, got {:?}", sent[0]);
        };
        assert_eq!(room, "#prod");
        assert_eq!(card.title, "3f9a2c");
        assert_eq!(card.body, "SUCCESS FINISHED x, origin/release #12");
        assert!(backend.calls().contains(&"get_build_info x 12".to_string()));
    }

    #[tokio::test]
    async fn rooms_are_the_union_of_configured_grid_and_presence_rooms() {
        let backend = Arc::new(FakeJenkins::new(PROD_URL));
        let (router, chat) = router(
            backend,
            "[notifications]\nchatrooms = [\"#ops\", \"#prod\"]\nformat = \"text\"\n\
             [chat]\npresence_rooms = [\"#deploy\", \"#ops\"]\n",
        );

        let outcome = router.route(payload()).await.unwrap();
        let RouteOutcome::Delivered { rooms, .. } = outcome else {
            panic!("expected delivery");
        };
        assert_eq!(rooms, vec!["#ops", "#prod", "#deploy"]);

        let sent = chat.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(
            sent[0],
            Sent::Text(
                "#ops".to_string(),
                "Build #12 FINISHED SUCCESS for Job x (https://master-prod.example.com/job/x/12/)"
                    .to_string()
            )
        );
    }

    #[tokio::test]
    async fn unresolved_grid_still_broadcasts_without_git() {
        let backend = Arc::new(FakeJenkins::new(PROD_URL));
        let (router, chat) = router(backend.clone(), "");
        let mut body = payload();
        body["build"]["full_url"] = json!("https://master-qa.example.com/job/x/12/");

        let outcome = router.route(body).await.unwrap();
        assert!(matches!(outcome, RouteOutcome::Delivered { ref grid, .. } if grid == "qa"));
        let sent = chat.sent();
        let Sent::Card(room, card) = &sent[0] else {
            panic!("expected a card");
        };
        assert_eq!(room, "#qa");
        assert_eq!(card.link, "");
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn disabled_notifications_do_nothing() {
        let backend = Arc::new(FakeJenkins::new(PROD_URL));
        let (router, chat) = router(backend.clone(), "[notifications]\nreceive = \"no\"\n");

        assert_eq!(router.route(payload()).await.unwrap(), RouteOutcome::Disabled);
        assert!(chat.sent().is_empty());
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn foreign_and_malformed_payloads_are_rejected() {
        let backend = Arc::new(FakeJenkins::new(PROD_URL));
        let (router, chat) = router(backend, "");
        let mut body = payload();
        body["build"]["full_url"] = json!("https://ci.other.org/job/x/12/");

        assert!(matches!(
            router.route(body).await,
            Err(NotifyError::Unroutable(_))
        ));
        assert!(matches!(
            router.route(json!({ "name": "x" })).await,
            Err(NotifyError::Payload(_))
        ));
        assert!(chat.sent().is_empty());
    }
}
