use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

use super::{
    BuildInfo, ClientFactory, Credentials, JenkinsApi, JenkinsError, JenkinsResult, JobInfo,
    JobSummary, NodeInfo, NodeSpec, QueueItem,
};

const JOBS_TREE: &str = "jobs[name,url,color,jobs]";
const NODE_TYPE: &str = "hudson.slaves.DumbSlave$DescriptorImpl";

#[derive(Deserialize)]
struct JobListing {
    #[serde(default)]
    jobs: Vec<RawJob>,
}

#[derive(Deserialize)]
struct RawJob {
    name: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    jobs: Option<Vec<serde_json::Value>>,
}

#[derive(Deserialize)]
struct QueueListing {
    #[serde(default)]
    items: Vec<QueueItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CrumbResponse {
    crumb_request_field: String,
    crumb: String,
}

enum PostBody {
    Empty,
    Xml(String),
    Form(Vec<(String, String)>),
}

/// Maps `a/b` to `job/a/job/b/`.
pub(crate) fn job_path(name: &str) -> String {
    name.split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| format!("job/{}/", urlencoding::encode(segment)))
        .collect()
}

fn node_path(name: &str) -> String {
    format!("computer/{}/", urlencoding::encode(name))
}

fn ensure_success(resp: Response) -> JenkinsResult<Response> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(JenkinsError::Status {
            status,
            url: resp.url().to_string(),
        })
    }
}

fn decode(what: &str) -> impl FnOnce(reqwest::Error) -> JenkinsError + '_ {
    move |e| JenkinsError::Decode {
        what: what.to_string(),
        detail: e.to_string(),
    }
}

/// HTTP client for one Jenkins master.
pub struct JenkinsClient {
    base_url: String,
    http: Client,
    credentials: Credentials,
    crumb: OnceCell<Option<(String, String)>>,
}

impl JenkinsClient {
    pub fn new(base_url: &str, credentials: Credentials) -> JenkinsResult<Self> {
        let http = Client::builder()
            .user_agent(concat!("gridbot/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            credentials,
            crumb: OnceCell::new(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.credentials.username {
            Some(user) => req.basic_auth(user, self.credentials.password.as_deref()),
            None => req,
        }
    }

    async fn get(&self, path: &str) -> JenkinsResult<Response> {
        let resp = self.authed(self.http.get(self.url(path))).send().await?;
        ensure_success(resp)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, what: &str) -> JenkinsResult<T> {
        self.get(path).await?.json().await.map_err(decode(what))
    }

    async fn fetch_crumb(&self) -> JenkinsResult<Option<(String, String)>> {
        let resp = self
            .authed(self.http.get(self.url("crumbIssuer/api/json")))
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            debug!("Crumb issuer disabled on {}", self.base_url);
            return Ok(None);
        }
        let crumb: CrumbResponse = ensure_success(resp)?
            .json()
            .await
            .map_err(decode("crumbIssuer"))?;
        Ok(Some((crumb.crumb_request_field, crumb.crumb)))
    }

    async fn crumb(&self) -> JenkinsResult<Option<(String, String)>> {
        self.crumb
            .get_or_try_init(|| self.fetch_crumb())
            .await
            .cloned()
    }

    async fn post(&self, path: &str, body: PostBody) -> JenkinsResult<Response> {
        let mut req = self.authed(self.http.post(self.url(path)));
        if let Some((field, value)) = self.crumb().await? {
            req = req.header(field, value);
        }
        req = match body {
            PostBody::Empty => req,
            PostBody::Xml(xml) => req
                .header(reqwest::header::CONTENT_TYPE, "text/xml; charset=utf-8")
                .body(xml),
            PostBody::Form(fields) => req.form(&fields),
        };
        let resp = req.send().await?;
        ensure_success(resp)
    }

    async fn node_info(&self, name: &str) -> JenkinsResult<NodeInfo> {
        self.get_json(&format!("{}api/json?depth=0", node_path(name)), name)
            .await
            .map_err(|e| e.or_not_found(format!("node[{name}] does not exist")))
    }

    async fn node_exists(&self, name: &str) -> JenkinsResult<bool> {
        match self.node_info(name).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn toggle_offline(&self, name: &str, message: &str) -> JenkinsResult<()> {
        let path = format!(
            "{}toggleOffline?offlineMessage={}",
            node_path(name),
            urlencoding::encode(message)
        );
        self.post(&path, PostBody::Empty).await?;
        Ok(())
    }
}

#[async_trait]
impl JenkinsApi for JenkinsClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_jobs(&self, folder_depth: Option<usize>) -> JenkinsResult<Vec<JobSummary>> {
        let mut found = Vec::new();
        let mut pending = VecDeque::from([(String::new(), 0usize)]);

        while let Some((folder, depth)) = pending.pop_front() {
            let path = format!("{}api/json?tree={}", job_path(&folder), JOBS_TREE);
            let listing: JobListing = self.get_json(&path, "jobs").await?;
            for raw in listing.jobs {
                let fullname = if folder.is_empty() {
                    raw.name.clone()
                } else {
                    format!("{folder}/{}", raw.name)
                };
                if raw.jobs.is_some() && folder_depth.is_none_or(|max| depth < max) {
                    pending.push_back((fullname.clone(), depth + 1));
                }
                found.push(JobSummary {
                    name: raw.name,
                    fullname,
                    url: raw.url,
                    color: raw.color.unwrap_or_default(),
                });
            }
        }
        Ok(found)
    }

    async fn get_job_info(&self, name: &str) -> JenkinsResult<JobInfo> {
        self.get_json(&format!("{}api/json?depth=0", job_path(name)), name)
            .await
            .map_err(|e| e.or_not_found(format!("job[{name}] does not exist")))
    }

    async fn job_exists(&self, name: &str) -> JenkinsResult<bool> {
        match self.get(&format!("{}api/json?tree=name", job_path(name))).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn get_job_config(&self, name: &str) -> JenkinsResult<String> {
        let resp = self
            .get(&format!("{}config.xml", job_path(name)))
            .await
            .map_err(|e| e.or_not_found(format!("job[{name}] does not exist")))?;
        Ok(resp.text().await?)
    }

    async fn reconfig_job(&self, name: &str, config_xml: &str) -> JenkinsResult<()> {
        self.post(
            &format!("{}config.xml", job_path(name)),
            PostBody::Xml(config_xml.to_string()),
        )
        .await
        .map_err(|e| e.or_not_found(format!("job[{name}] does not exist")))?;
        Ok(())
    }

    async fn build_job(
        &self,
        name: &str,
        parameters: Option<&BTreeMap<String, String>>,
    ) -> JenkinsResult<()> {
        let result = match parameters {
            Some(params) => {
                let fields = params
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                self.post(
                    &format!("{}buildWithParameters", job_path(name)),
                    PostBody::Form(fields),
                )
                .await
            }
            None => {
                self.post(&format!("{}build", job_path(name)), PostBody::Empty)
                    .await
            }
        };
        result.map_err(|e| e.or_not_found(format!("job[{name}] does not exist")))?;
        Ok(())
    }

    async fn get_build_info(&self, name: &str, number: u64) -> JenkinsResult<BuildInfo> {
        self.get_json(
            &format!("{}{number}/api/json?depth=0", job_path(name)),
            name,
        )
        .await
        .map_err(|e| e.or_not_found(format!("job[{name}] number[{number}] does not exist")))
    }

    async fn get_build_console_output(&self, name: &str, number: u64) -> JenkinsResult<String> {
        let resp = self
            .get(&format!("{}{number}/consoleText", job_path(name)))
            .await
            .map_err(|e| e.or_not_found(format!("job[{name}] number[{number}] does not exist")))?;
        Ok(resp.text().await?)
    }

    async fn get_queue_info(&self) -> JenkinsResult<Vec<QueueItem>> {
        let listing: QueueListing = self.get_json("queue/api/json?depth=0", "queue").await?;
        Ok(listing.items)
    }

    async fn cancel_queue(&self, id: u64) -> JenkinsResult<()> {
        match self
            .post(&format!("queue/cancelItem?id={id}"), PostBody::Empty)
            .await
        {
            // Jenkins answers the cancel with a redirect that can land on a 404.
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
            Ok(_) => Ok(()),
        }
    }

    async fn create_job(&self, name: &str, config_xml: &str) -> JenkinsResult<()> {
        if self.job_exists(name).await? {
            return Err(JenkinsError::AlreadyExists(format!(
                "job[{name}] already exists"
            )));
        }
        let (folder, short_name) = name.rsplit_once('/').unwrap_or(("", name));
        let path = format!(
            "{}createItem?name={}",
            job_path(folder),
            urlencoding::encode(short_name)
        );
        self.post(&path, PostBody::Xml(config_xml.to_string()))
            .await?;
        if !self.job_exists(name).await? {
            return Err(JenkinsError::Failed(format!("create[{name}] failed")));
        }
        Ok(())
    }

    async fn delete_job(&self, name: &str) -> JenkinsResult<()> {
        self.post(&format!("{}doDelete", job_path(name)), PostBody::Empty)
            .await
            .map_err(|e| e.or_not_found(format!("job[{name}] does not exist")))?;
        if self.job_exists(name).await? {
            return Err(JenkinsError::Failed(format!("delete[{name}] failed")));
        }
        Ok(())
    }

    async fn enable_job(&self, name: &str) -> JenkinsResult<()> {
        self.post(&format!("{}enable", job_path(name)), PostBody::Empty)
            .await
            .map_err(|e| e.or_not_found(format!("job[{name}] does not exist")))?;
        Ok(())
    }

    async fn disable_job(&self, name: &str) -> JenkinsResult<()> {
        self.post(&format!("{}disable", job_path(name)), PostBody::Empty)
            .await
            .map_err(|e| e.or_not_found(format!("job[{name}] does not exist")))?;
        Ok(())
    }

    async fn create_node(&self, node: &NodeSpec) -> JenkinsResult<()> {
        if self.node_exists(&node.name).await? {
            return Err(JenkinsError::AlreadyExists(format!(
                "node[{}] already exists",
                node.name
            )));
        }
        let descriptor = serde_json::json!({
            "nodeDescription": "",
            "numExecutors": node.num_executors,
            "remoteFS": node.remote_fs,
            "labelString": node.labels,
            "mode": if node.exclusive { "EXCLUSIVE" } else { "NORMAL" },
            "retentionStrategy": { "stapler-class": "hudson.slaves.RetentionStrategy$Always" },
            "nodeProperties": { "stapler-class-bag": "true" },
            "launcher": { "stapler-class": node.launcher },
        });
        let fields = vec![
            ("name".to_string(), node.name.clone()),
            ("type".to_string(), NODE_TYPE.to_string()),
            ("json".to_string(), descriptor.to_string()),
        ];
        self.post("computer/doCreateItem", PostBody::Form(fields))
            .await?;
        if !self.node_exists(&node.name).await? {
            return Err(JenkinsError::Failed(format!(
                "create[{}] failed",
                node.name
            )));
        }
        Ok(())
    }

    async fn delete_node(&self, name: &str) -> JenkinsResult<()> {
        self.node_info(name).await?;
        self.post(&format!("{}doDelete", node_path(name)), PostBody::Empty)
            .await?;
        if self.node_exists(name).await? {
            return Err(JenkinsError::Failed(format!("delete[{name}] failed")));
        }
        Ok(())
    }

    async fn enable_node(&self, name: &str) -> JenkinsResult<()> {
        if !self.node_info(name).await?.offline {
            return Ok(());
        }
        self.toggle_offline(name, "").await
    }

    async fn disable_node(&self, name: &str) -> JenkinsResult<()> {
        if self.node_info(name).await?.offline {
            return Ok(());
        }
        self.toggle_offline(name, "").await
    }
}

pub struct HttpClientFactory;

impl ClientFactory for HttpClientFactory {
    fn connect(
        &self,
        endpoint: &str,
        credentials: &Credentials,
    ) -> JenkinsResult<Arc<dyn JenkinsApi>> {
        Ok(Arc::new(JenkinsClient::new(endpoint, credentials.clone())?))
    }
}
