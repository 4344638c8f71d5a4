use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::core::jenkins::Credentials;
use crate::core::resolver::ResolverSettings;

pub const DOMAIN_ENV: &str = "DOMAIN";
pub const CONFIG_ENV: &str = "GRIDBOT_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{DOMAIN_ENV} must be set to the suffix of the grid bootstrap hostnames")]
    MissingDomain,
    #[error("JENKINS_URL for grid `{grid}` is not a well formed URL: {value}")]
    InvalidUrl { grid: String, value: String },
    #[error("{0} is a required string config setting")]
    EmptySetting(String),
    #[error("{key} must be one of true/false/yes/no/on/off/1/0, got `{value}`")]
    InvalidFlag { key: String, value: String },
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    jenkins: JenkinsSection,
    notifications: NotificationSection,
    chat: ChatSettings,
    slack: SlackSettings,
    server: ServerSettings,
    resolver: ResolverSettings,
    scm: ScmSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct JenkinsSection {
    url: BTreeMap<String, String>,
    username: Option<String>,
    password: Option<String>,
    discovery: bool,
}

impl Default for JenkinsSection {
    fn default() -> Self {
        Self {
            url: BTreeMap::new(),
            username: None,
            password: None,
            discovery: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct NotificationSection {
    receive: String,
    chatrooms: Vec<String>,
    format: NotificationFormat,
}

impl Default for NotificationSection {
    fn default() -> Self {
        Self {
            receive: "true".to_string(),
            chatrooms: Vec::new(),
            format: NotificationFormat::Card,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ScmSection {
    remote_marker: Option<String>,
    browse_base_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationFormat {
    #[default]
    Card,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    pub prefix: String,
    pub presence_rooms: Vec<String>,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            prefix: "!".to_string(),
            presence_rooms: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SlackSettings {
    pub bot_token: Option<String>,
    pub signing_secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3141,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JenkinsSettings {
    pub urls: BTreeMap<String, String>,
    pub credentials: Credentials,
    pub discovery: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationSettings {
    pub receive: bool,
    pub chatrooms: Vec<String>,
    pub format: NotificationFormat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScmSettings {
    pub remote_marker: String,
    pub browse_base_url: String,
}

/// Validated process-wide settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub domain: String,
    pub jenkins: JenkinsSettings,
    pub notifications: NotificationSettings,
    pub chat: ChatSettings,
    pub slack: SlackSettings,
    pub server: ServerSettings,
    pub resolver: ResolverSettings,
    pub scm: ScmSettings,
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("gridbot").join("config.toml"))
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, ConfigError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(ConfigError::EmptySetting(key.to_string()));
    }
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidFlag {
            key: key.to_string(),
            value: raw.to_string(),
        }),
    }
}

fn validate_url(grid: &str, value: &str) -> Result<(), ConfigError> {
    let invalid = || ConfigError::InvalidUrl {
        grid: grid.to_string(),
        value: value.to_string(),
    };
    let parsed = url::Url::parse(value).map_err(|_| invalid())?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(invalid());
    }
    Ok(())
}

impl Settings {
    /// Loads `path`, else `$GRIDBOT_CONFIG`, else the per-user default. A missing
    /// default file yields built-in defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let domain = std::env::var(DOMAIN_ENV).unwrap_or_default();

        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
        let (location, required) = match explicit {
            Some(p) => (Some(p), true),
            None => (default_config_path(), false),
        };

        let content = match location {
            Some(ref p) if required || p.exists() => {
                let content = std::fs::read_to_string(p).map_err(|source| ConfigError::Read {
                    path: p.clone(),
                    source,
                })?;
                info!("Loaded configuration from {}", p.display());
                content
            }
            _ => {
                info!("No config.toml found, using defaults.");
                String::new()
            }
        };

        Self::from_toml_str(&content, &domain)
    }

    pub fn from_toml_str(content: &str, domain: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(content)?;
        Self::validate(file, domain)
    }

    fn validate(file: FileConfig, domain: &str) -> Result<Self, ConfigError> {
        let domain = domain.trim().trim_matches('.').to_string();
        if domain.is_empty() {
            return Err(ConfigError::MissingDomain);
        }

        for (grid, value) in &file.jenkins.url {
            validate_url(grid, value)?;
        }

        let receive = parse_flag("RECEIVE_NOTIFICATION", &file.notifications.receive)?;

        if file.chat.prefix.is_empty() {
            return Err(ConfigError::EmptySetting("chat.prefix".to_string()));
        }

        let remote_marker = file
            .scm
            .remote_marker
            .unwrap_or_else(|| "devgit".to_string());
        let browse_base_url = file
            .scm
            .browse_base_url
            .unwrap_or_else(|| format!("https://devgit.{domain}/"));
        validate_url("scm.browse_base_url", &browse_base_url)?;

        Ok(Self {
            domain,
            jenkins: JenkinsSettings {
                urls: file.jenkins.url,
                credentials: Credentials {
                    username: file.jenkins.username,
                    password: file.jenkins.password,
                },
                discovery: file.jenkins.discovery,
            },
            notifications: NotificationSettings {
                receive,
                chatrooms: file.notifications.chatrooms,
                format: file.notifications.format,
            },
            chat: file.chat,
            slack: file.slack,
            server: file.server,
            resolver: file.resolver,
            scm: ScmSettings {
                remote_marker,
                browse_base_url,
            },
        })
    }
}
