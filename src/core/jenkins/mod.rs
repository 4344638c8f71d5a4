pub mod client;
pub mod xml;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

pub use client::HttpClientFactory;

pub const LAUNCHER_JNLP: &str = "hudson.slaves.JNLPLauncher";

/// Action slots where the backend publishes parameter metadata, in lookup order.
/// Older masters put it at index 1, newer ones at index 0.
pub const PARAMETER_ACTION_SLOTS: &[usize] = &[1, 0];

#[derive(Debug, Error)]
pub enum JenkinsError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    AlreadyExists(String),
    #[error("{0}")]
    Failed(String),
    #[error("Error in request: {status} ({url})")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },
    #[error("Error in request: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Could not parse JSON info for {what}: {detail}")]
    Decode { what: String, detail: String },
}

impl JenkinsError {
    /// Rewrites a 404 response into a named `NotFound` error.
    pub fn or_not_found(self, message: impl Into<String>) -> Self {
        match self {
            JenkinsError::Status { status, .. } if status == reqwest::StatusCode::NOT_FOUND => {
                JenkinsError::NotFound(message.into())
            }
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            JenkinsError::NotFound(_) => true,
            JenkinsError::Status { status, .. } => *status == reqwest::StatusCode::NOT_FOUND,
            _ => false,
        }
    }
}

pub type JenkinsResult<T> = Result<T, JenkinsError>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub name: String,
    pub fullname: String,
    pub url: String,
    #[serde(default)]
    pub color: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BuildRef {
    pub number: u64,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HealthReport {
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub actions: Vec<Value>,
    #[serde(default)]
    pub builds: Vec<BuildRef>,
    #[serde(default)]
    pub last_build: Option<BuildRef>,
    #[serde(default)]
    pub health_report: Vec<HealthReport>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DefaultParameterValue {
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterDefinition {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default_parameter_value: Option<DefaultParameterValue>,
}

impl JobInfo {
    /// Finds the action carrying `parameterDefinitions`. The known slots are
    /// searched first, then any remaining action.
    pub fn parameter_action(&self) -> Option<&Value> {
        let carries_params = |action: &&Value| {
            action
                .get("parameterDefinitions")
                .is_some_and(|defs| !defs.is_null())
        };

        PARAMETER_ACTION_SLOTS
            .iter()
            .filter_map(|slot| self.actions.get(*slot))
            .find(carries_params)
            .or_else(|| self.actions.iter().find(carries_params))
    }

    pub fn is_parameterized(&self) -> bool {
        self.parameter_action().is_some()
    }

    pub fn parameter_definitions(&self) -> JenkinsResult<Vec<ParameterDefinition>> {
        let Some(action) = self.parameter_action() else {
            return Ok(Vec::new());
        };
        serde_json::from_value(action["parameterDefinitions"].clone()).map_err(|e| {
            JenkinsError::Decode {
                what: format!("job[{}] parameters", self.name),
                detail: e.to_string(),
            }
        })
    }

    pub fn newest_build(&self) -> Option<u64> {
        self.builds.first().map(|b| b.number)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuildInfo {
    #[serde(default)]
    pub actions: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueTask {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueItem {
    pub id: u64,
    pub task: QueueTask,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeInfo {
    #[serde(default)]
    pub offline: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    pub name: String,
    pub remote_fs: String,
    pub labels: String,
    pub exclusive: bool,
    pub num_executors: u32,
    pub launcher: String,
}

impl NodeSpec {
    /// An exclusive node attached over JNLP, the only kind the chat surface creates.
    pub fn jnlp(name: &str, remote_fs: &str, labels: &[String]) -> Self {
        Self {
            name: name.to_string(),
            remote_fs: remote_fs.to_string(),
            labels: labels.join(" "),
            exclusive: true,
            num_executors: 2,
            launcher: LAUNCHER_JNLP.to_string(),
        }
    }
}

/// The slice of the CI backend REST API the bot consumes.
#[async_trait]
pub trait JenkinsApi: Send + Sync {
    fn base_url(&self) -> &str;

    /// Lists jobs, descending into folders up to `folder_depth` levels (`None` = all).
    async fn get_jobs(&self, folder_depth: Option<usize>) -> JenkinsResult<Vec<JobSummary>>;
    async fn get_job_info(&self, name: &str) -> JenkinsResult<JobInfo>;
    async fn job_exists(&self, name: &str) -> JenkinsResult<bool>;
    async fn get_job_config(&self, name: &str) -> JenkinsResult<String>;
    async fn reconfig_job(&self, name: &str, config_xml: &str) -> JenkinsResult<()>;
    async fn build_job(
        &self,
        name: &str,
        parameters: Option<&BTreeMap<String, String>>,
    ) -> JenkinsResult<()>;
    async fn get_build_info(&self, name: &str, number: u64) -> JenkinsResult<BuildInfo>;
    async fn get_build_console_output(&self, name: &str, number: u64) -> JenkinsResult<String>;
    async fn get_queue_info(&self) -> JenkinsResult<Vec<QueueItem>>;
    async fn cancel_queue(&self, id: u64) -> JenkinsResult<()>;
    async fn create_job(&self, name: &str, config_xml: &str) -> JenkinsResult<()>;
    async fn delete_job(&self, name: &str) -> JenkinsResult<()>;
    async fn enable_job(&self, name: &str) -> JenkinsResult<()>;
    async fn disable_job(&self, name: &str) -> JenkinsResult<()>;
    async fn create_node(&self, node: &NodeSpec) -> JenkinsResult<()>;
    async fn delete_node(&self, name: &str) -> JenkinsResult<()>;
    async fn enable_node(&self, name: &str) -> JenkinsResult<()>;
    async fn disable_node(&self, name: &str) -> JenkinsResult<()>;
}

/// Builds a client handle bound to one endpoint.
pub trait ClientFactory: Send + Sync {
    fn connect(
        &self,
        endpoint: &str,
        credentials: &Credentials,
    ) -> JenkinsResult<Arc<dyn JenkinsApi>>;
}

#[cfg(test)]
pub(crate) mod fake;
