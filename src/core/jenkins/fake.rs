use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use super::{
    BuildInfo, ClientFactory, Credentials, JenkinsApi, JenkinsError, JenkinsResult, JobInfo,
    JobSummary, NodeSpec, QueueItem, QueueTask,
};

#[derive(Default)]
pub(crate) struct FakeState {
    pub jobs: Vec<JobSummary>,
    pub infos: HashMap<String, Value>,
    pub configs: HashMap<String, String>,
    pub consoles: HashMap<(String, u64), String>,
    pub build_infos: HashMap<(String, u64), Value>,
    pub queue: Vec<(u64, String)>,
    pub nodes: HashMap<String, (NodeSpec, bool)>,
    pub disabled_jobs: Vec<String>,
    pub builds: Vec<(String, Option<BTreeMap<String, String>>)>,
    pub created: Vec<(String, String)>,
    pub calls: Vec<String>,
    pub fail_with: Option<String>,
}

/// In-memory backend for dispatcher and router tests.
pub(crate) struct FakeJenkins {
    base_url: String,
    pub state: Mutex<FakeState>,
}

impl FakeJenkins {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn with_job(self, fullname: &str, color: &str, info: Value) -> Self {
        {
            let mut st = self.state.lock().unwrap();
            st.jobs.push(JobSummary {
                name: fullname.rsplit('/').next().unwrap_or(fullname).to_string(),
                fullname: fullname.to_string(),
                url: format!("{}/job/{}/", self.base_url, fullname),
                color: color.to_string(),
            });
            let mut info = info;
            if info.get("name").is_none() {
                info["name"] = json!(fullname);
            }
            st.infos.insert(fullname.to_string(), info);
        }
        self
    }

    pub fn failing(self, message: &str) -> Self {
        self.state.lock().unwrap().fail_with = Some(message.to_string());
        self
    }

    fn record(&self, call: String) -> JenkinsResult<()> {
        let mut st = self.state.lock().unwrap();
        st.calls.push(call);
        match &st.fail_with {
            Some(msg) => Err(JenkinsError::Failed(msg.clone())),
            None => Ok(()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn missing_job(name: &str) -> JenkinsError {
        JenkinsError::NotFound(format!("job[{name}] does not exist"))
    }
}

#[async_trait]
impl JenkinsApi for FakeJenkins {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_jobs(&self, folder_depth: Option<usize>) -> JenkinsResult<Vec<JobSummary>> {
        self.record(format!("get_jobs {folder_depth:?}"))?;
        let st = self.state.lock().unwrap();
        Ok(st
            .jobs
            .iter()
            .filter(|j| folder_depth.is_none() || !j.fullname.contains('/'))
            .cloned()
            .collect())
    }

    async fn get_job_info(&self, name: &str) -> JenkinsResult<JobInfo> {
        self.record(format!("get_job_info {name}"))?;
        let st = self.state.lock().unwrap();
        let raw = st.infos.get(name).cloned().ok_or_else(|| Self::missing_job(name))?;
        serde_json::from_value(raw).map_err(|e| JenkinsError::Decode {
            what: name.to_string(),
            detail: e.to_string(),
        })
    }

    async fn job_exists(&self, name: &str) -> JenkinsResult<bool> {
        self.record(format!("job_exists {name}"))?;
        Ok(self.state.lock().unwrap().infos.contains_key(name))
    }

    async fn get_job_config(&self, name: &str) -> JenkinsResult<String> {
        self.record(format!("get_job_config {name}"))?;
        let st = self.state.lock().unwrap();
        st.configs.get(name).cloned().ok_or_else(|| Self::missing_job(name))
    }

    async fn reconfig_job(&self, name: &str, config_xml: &str) -> JenkinsResult<()> {
        self.record(format!("reconfig_job {name}"))?;
        let mut st = self.state.lock().unwrap();
        st.configs.insert(name.to_string(), config_xml.to_string());
        Ok(())
    }

    async fn build_job(
        &self,
        name: &str,
        parameters: Option<&BTreeMap<String, String>>,
    ) -> JenkinsResult<()> {
        self.record(format!("build_job {name}"))?;
        let mut st = self.state.lock().unwrap();
        if !st.infos.contains_key(name) {
            return Err(Self::missing_job(name));
        }
        st.builds.push((name.to_string(), parameters.cloned()));
        Ok(())
    }

    async fn get_build_info(&self, name: &str, number: u64) -> JenkinsResult<BuildInfo> {
        self.record(format!("get_build_info {name} {number}"))?;
        let st = self.state.lock().unwrap();
        let raw = st
            .build_infos
            .get(&(name.to_string(), number))
            .cloned()
            .ok_or_else(|| {
                JenkinsError::NotFound(format!("job[{name}] number[{number}] does not exist"))
            })?;
        serde_json::from_value(raw).map_err(|e| JenkinsError::Decode {
            what: name.to_string(),
            detail: e.to_string(),
        })
    }

    async fn get_build_console_output(&self, name: &str, number: u64) -> JenkinsResult<String> {
        self.record(format!("get_build_console_output {name} {number}"))?;
        let st = self.state.lock().unwrap();
        st.consoles
            .get(&(name.to_string(), number))
            .cloned()
            .ok_or_else(|| JenkinsError::NotFound(format!("job[{name}] number[{number}] does not exist")))
    }

    async fn get_queue_info(&self) -> JenkinsResult<Vec<QueueItem>> {
        self.record("get_queue_info".to_string())?;
        let st = self.state.lock().unwrap();
        Ok(st
            .queue
            .iter()
            .map(|(id, name)| QueueItem {
                id: *id,
                task: QueueTask { name: name.clone() },
            })
            .collect())
    }

    async fn cancel_queue(&self, id: u64) -> JenkinsResult<()> {
        self.record(format!("cancel_queue {id}"))?;
        self.state.lock().unwrap().queue.retain(|(qid, _)| *qid != id);
        Ok(())
    }

    async fn create_job(&self, name: &str, config_xml: &str) -> JenkinsResult<()> {
        self.record(format!("create_job {name}"))?;
        let mut st = self.state.lock().unwrap();
        if st.infos.contains_key(name) {
            return Err(JenkinsError::AlreadyExists(format!("job[{name}] already exists")));
        }
        st.created.push((name.to_string(), config_xml.to_string()));
        st.infos.insert(name.to_string(), json!({ "name": name }));
        st.configs.insert(name.to_string(), config_xml.to_string());
        Ok(())
    }

    async fn delete_job(&self, name: &str) -> JenkinsResult<()> {
        self.record(format!("delete_job {name}"))?;
        let mut st = self.state.lock().unwrap();
        st.infos.remove(name).ok_or_else(|| Self::missing_job(name))?;
        st.jobs.retain(|j| j.fullname != name);
        Ok(())
    }

    async fn enable_job(&self, name: &str) -> JenkinsResult<()> {
        self.record(format!("enable_job {name}"))?;
        self.state.lock().unwrap().disabled_jobs.retain(|j| j != name);
        Ok(())
    }

    async fn disable_job(&self, name: &str) -> JenkinsResult<()> {
        self.record(format!("disable_job {name}"))?;
        self.state.lock().unwrap().disabled_jobs.push(name.to_string());
        Ok(())
    }

    async fn create_node(&self, node: &NodeSpec) -> JenkinsResult<()> {
        self.record(format!("create_node {}", node.name))?;
        let mut st = self.state.lock().unwrap();
        if st.nodes.contains_key(&node.name) {
            return Err(JenkinsError::AlreadyExists(format!(
                "node[{}] already exists",
                node.name
            )));
        }
        st.nodes.insert(node.name.clone(), (node.clone(), false));
        Ok(())
    }

    async fn delete_node(&self, name: &str) -> JenkinsResult<()> {
        self.record(format!("delete_node {name}"))?;
        let mut st = self.state.lock().unwrap();
        st.nodes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| JenkinsError::NotFound(format!("node[{name}] does not exist")))
    }

    async fn enable_node(&self, name: &str) -> JenkinsResult<()> {
        self.record(format!("enable_node {name}"))?;
        let mut st = self.state.lock().unwrap();
        let node = st
            .nodes
            .get_mut(name)
            .ok_or_else(|| JenkinsError::NotFound(format!("node[{name}] does not exist")))?;
        node.1 = false;
        Ok(())
    }

    async fn disable_node(&self, name: &str) -> JenkinsResult<()> {
        self.record(format!("disable_node {name}"))?;
        let mut st = self.state.lock().unwrap();
        let node = st
            .nodes
            .get_mut(name)
            .ok_or_else(|| JenkinsError::NotFound(format!("node[{name}] does not exist")))?;
        node.1 = true;
        Ok(())
    }
}

/// Hands out one shared fake regardless of endpoint, recording each endpoint it was asked for.
pub(crate) struct FakeFactory {
    pub backend: Arc<FakeJenkins>,
    pub connected: Mutex<Vec<(String, Credentials)>>,
    pub refusing: Mutex<bool>,
}

impl FakeFactory {
    pub fn new(backend: Arc<FakeJenkins>) -> Self {
        Self {
            backend,
            connected: Mutex::new(Vec::new()),
            refusing: Mutex::new(false),
        }
    }
}

impl ClientFactory for FakeFactory {
    fn connect(
        &self,
        endpoint: &str,
        credentials: &Credentials,
    ) -> JenkinsResult<Arc<dyn JenkinsApi>> {
        self.connected
            .lock()
            .unwrap()
            .push((endpoint.to_string(), credentials.clone()));
        if *self.refusing.lock().unwrap() {
            return Err(JenkinsError::Failed(format!(
                "could not build a client for {endpoint}"
            )));
        }
        Ok(self.backend.clone())
    }
}
