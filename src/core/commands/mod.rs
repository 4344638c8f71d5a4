//! Chat command surface.
//!
//! Each command resolves the issuing room's grid, obtains a fresh client from
//! the connection cache and performs one class of backend operation. Backend
//! failures never escape: they come back as `Oops, ...` replies.

pub mod format;

use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::connections::ConnectError;
use crate::core::context::BotContext;
use crate::core::jenkins::xml::{self, JobTemplate};
use crate::core::jenkins::{JenkinsApi, JenkinsError, JobSummary, NodeSpec};
use format::{format_jobs, format_params, format_running_jobs};

/// What a command hands back to the chat host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    /// Streamed to the room as a file.
    Attachment { name: String, content: String },
}

impl Reply {
    fn text(s: impl Into<String>) -> Self {
        Reply::Text(s.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Help,
    List,
    Running,
    Param,
    Output,
    Branch,
    Build,
    Unqueue,
    CreateJob,
    DeleteJob,
    EnableJob,
    DisableJob,
    CreateNode,
    DeleteNode,
    EnableNode,
    DisableNode,
}

impl Command {
    pub const ALL: &'static [Command] = &[
        Command::List,
        Command::Running,
        Command::Param,
        Command::Output,
        Command::Branch,
        Command::Build,
        Command::Unqueue,
        Command::CreateJob,
        Command::DeleteJob,
        Command::EnableJob,
        Command::DisableJob,
        Command::CreateNode,
        Command::DeleteNode,
        Command::EnableNode,
        Command::DisableNode,
        Command::Help,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        let command = match name.to_ascii_lowercase().as_str() {
            "help" | "jenkins_help" => Command::Help,
            "jenkins_list" => Command::List,
            "jenkins_running" => Command::Running,
            "jenkins_param" => Command::Param,
            "jenkins_output" => Command::Output,
            "jenkins_branch" => Command::Branch,
            "jenkins_build" | "build" | "deploy" | "jenkins_deploy" => Command::Build,
            "jenkins_unqueue" => Command::Unqueue,
            "jenkins_createjob" => Command::CreateJob,
            "jenkins_deletejob" => Command::DeleteJob,
            "jenkins_enablejob" => Command::EnableJob,
            "jenkins_disablejob" => Command::DisableJob,
            "jenkins_createnode" => Command::CreateNode,
            "jenkins_deletenode" => Command::DeleteNode,
            "jenkins_enablenode" => Command::EnableNode,
            "jenkins_disablenode" => Command::DisableNode,
            _ => return None,
        };
        Some(command)
    }

    pub fn usage(&self) -> &'static str {
        match self {
            Command::Help => "jenkins_help - show this list",
            Command::List => "jenkins_list [filter] - list jobs, optionally filtered by name",
            Command::Running => "jenkins_running - list running jobs",
            Command::Param => "jenkins_param <job> - list the parameters of a job",
            Command::Output => "jenkins_output <job> - fetch the console output of the last build",
            Command::Branch => "jenkins_branch <job> <branch> - change the git branch a job builds",
            Command::Build => {
                "jenkins_build <job> [KEY:VALUE ...] - start a build (aliases: build, deploy, jenkins_deploy)"
            }
            Command::Unqueue => "jenkins_unqueue <job> - cancel a queued build",
            Command::CreateJob => {
                "jenkins_createjob <pipeline|multibranch> <name> <repo-url> - create a job"
            }
            Command::DeleteJob => "jenkins_deletejob <job> - delete a job",
            Command::EnableJob => "jenkins_enablejob <job> - enable a job",
            Command::DisableJob => "jenkins_disablejob <job> - disable a job",
            Command::CreateNode => {
                "jenkins_createnode <name> <remote-fs> [labels...] - create an exclusive JNLP node"
            }
            Command::DeleteNode => "jenkins_deletenode <node> - delete a node",
            Command::EnableNode => "jenkins_enablenode <node> - bring a node online",
            Command::DisableNode => "jenkins_disablenode <node> - take a node offline",
        }
    }
}

/// A parsed chat line: the command plus its raw argument string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: Command,
    pub args: String,
}

impl Invocation {
    fn split_args(&self) -> Vec<String> {
        self.args.split_whitespace().map(str::to_string).collect()
    }
}

fn split_first_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(idx) => (&s[..idx], s[idx..].trim_start()),
        None => (s, ""),
    }
}

/// Parses `<prefix><command> <args>`. `jenkins build x` is read as `jenkins_build x`.
/// Lines without the prefix or naming an unknown command yield `None`.
pub fn parse(prefix: &str, line: &str) -> Option<Invocation> {
    let body = line.trim().strip_prefix(prefix)?;
    let (first, rest) = split_first_word(body);
    if first.is_empty() {
        return None;
    }

    if first.eq_ignore_ascii_case("jenkins") {
        let (second, tail) = split_first_word(rest);
        if let Some(command) = Command::from_name(&format!("jenkins_{second}")) {
            return Some(Invocation {
                command,
                args: tail.trim().to_string(),
            });
        }
    }

    Command::from_name(first).map(|command| Invocation {
        command,
        args: rest.trim().to_string(),
    })
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParameterError {
    #[error("Build parameters must look like KEY:VALUE, got `{0}`.")]
    MissingSeparator(String),
}

/// `KEY:VALUE` tokens split on the first colon. No tokens yields the single
/// empty pair the backend has always been sent for a bare parameterized build.
pub fn build_parameters(tokens: &[String]) -> Result<BTreeMap<String, String>, ParameterError> {
    if tokens.is_empty() {
        return Ok(BTreeMap::from([(String::new(), String::new())]));
    }
    tokens
        .iter()
        .map(|token| {
            token
                .split_once(':')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| ParameterError::MissingSeparator(token.clone()))
        })
        .collect()
}

#[derive(Debug, Error)]
enum CommandError {
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Jenkins(#[from] JenkinsError),
}

type CommandResult = Result<Vec<Reply>, CommandError>;

pub fn help_text() -> String {
    let mut out = String::from("Available commands:\n");
    for command in Command::ALL {
        out.push_str(command.usage());
        out.push('\n');
    }
    out.trim_end().to_string()
}

/// Runs one command for the room bound to `grid`.
pub async fn dispatch(ctx: &BotContext, grid: &str, invocation: &Invocation) -> Vec<Reply> {
    debug!("[{}] Dispatching {:?} {:?}", grid, invocation.command, invocation.args);
    let handler = Handler { ctx, grid };
    let args = invocation.split_args();

    let result = match invocation.command {
        Command::Help => Ok(vec![Reply::Text(help_text())]),
        Command::List => handler.list(&invocation.args).await,
        Command::Running => handler.running().await,
        Command::Param => handler.param(&args).await,
        Command::Output => handler.output(&args).await,
        Command::Branch => handler.branch(&args).await,
        Command::Build => handler.build(&args).await,
        Command::Unqueue => handler.unqueue(&invocation.args).await,
        Command::CreateJob => handler.create_job(&args).await,
        Command::DeleteJob | Command::EnableJob | Command::DisableJob => {
            handler.job_toggle(invocation.command, &args).await
        }
        Command::CreateNode => handler.create_node(&args).await,
        Command::DeleteNode | Command::EnableNode | Command::DisableNode => {
            handler.node_toggle(invocation.command, &args).await
        }
    };

    result.unwrap_or_else(|e| {
        warn!("[{}] {:?} failed: {}", grid, invocation.command, e);
        vec![Reply::Text(format!("Oops, {e}"))]
    })
}

struct Handler<'a> {
    ctx: &'a BotContext,
    grid: &'a str,
}

impl Handler<'_> {
    async fn jenkins(&self) -> Result<Arc<dyn JenkinsApi>, ConnectError> {
        self.ctx.connections.get_or_create(self.grid).await
    }

    async fn list(&self, filter: &str) -> CommandResult {
        let jenkins = self.jenkins().await?;
        let needle = filter.to_lowercase();
        let jobs: Vec<JobSummary> = jenkins
            .get_jobs(None)
            .await?
            .into_iter()
            .filter(|job| job.fullname.to_lowercase().contains(&needle))
            .collect();
        Ok(vec![Reply::Text(format_jobs(&jobs))])
    }

    async fn running(&self) -> CommandResult {
        let jenkins = self.jenkins().await?;
        let mut infos = Vec::new();
        for job in jenkins.get_jobs(Some(0)).await? {
            if job.color.contains("anime") {
                infos.push(jenkins.get_job_info(&job.name).await?);
            }
        }
        Ok(vec![Reply::Text(format_running_jobs(&infos))])
    }

    async fn param(&self, args: &[String]) -> CommandResult {
        let Some(job_name) = args.first() else {
            return Ok(vec![Reply::text("What Job would you like the parameters for?")]);
        };
        let jenkins = self.jenkins().await?;
        let job = jenkins.get_job_info(job_name).await?;
        Ok(vec![Reply::Text(format_params(&job.parameter_definitions()?))])
    }

    async fn output(&self, args: &[String]) -> CommandResult {
        let Some(job_name) = args.first() else {
            return Ok(vec![Reply::text("What job output would you like?")]);
        };
        let jenkins = self.jenkins().await?;
        let job = jenkins.get_job_info(job_name).await?;
        let Some(number) = job.newest_build() else {
            return Ok(vec![Reply::text("job has not been build yet!")]);
        };

        match jenkins.get_build_console_output(job_name, number).await {
            Ok(content) => Ok(vec![
                Reply::text("Fetching job output...."),
                Reply::Attachment {
                    name: format!("{job_name} build #{number} output"),
                    content,
                },
            ]),
            Err(e) => {
                warn!("[{}] Console output for {} #{} failed: {}", self.grid, job_name, number, e);
                Ok(vec![Reply::text("could not connect to jenkins")])
            }
        }
    }

    async fn branch(&self, args: &[String]) -> CommandResult {
        let [job_name, branch, ..] = args else {
            return Ok(vec![Reply::text("missing job name or branch")]);
        };
        let jenkins = self.jenkins().await?;
        if !jenkins.job_exists(job_name).await? {
            return Ok(vec![Reply::text("job name is invalid")]);
        }

        let rewritten = async {
            let config = jenkins.get_job_config(job_name).await?;
            let updated = xml::rewrite_branch(&config, branch)
                .map_err(|e| JenkinsError::Failed(e.to_string()))?;
            jenkins.reconfig_job(job_name, &updated).await
        }
        .await;

        match rewritten {
            Ok(()) => {
                info!("[{}] {} now builds {}", self.grid, job_name, branch);
                Ok(vec![Reply::Text(format!(
                    "{job_name} branch was successfully changed to {branch}"
                ))])
            }
            Err(e) => {
                warn!("[{}] Branch change for {} failed: {}", self.grid, job_name, e);
                Ok(vec![Reply::text("failed to change the job build branch")])
            }
        }
    }

    async fn build(&self, args: &[String]) -> CommandResult {
        let Some((job_name, tokens)) = args.split_first() else {
            return Ok(vec![Reply::text("What job would you like to build?")]);
        };
        let params = match build_parameters(tokens) {
            Ok(params) => params,
            Err(e) => return Ok(vec![Reply::Text(e.to_string())]),
        };

        let jenkins = self.jenkins().await?;
        let job = jenkins.get_job_info(job_name).await?;
        if job.is_parameterized() {
            jenkins.build_job(job_name, Some(&params)).await?;
        } else {
            jenkins.build_job(job_name, None).await?;
        }
        info!("[{}] Triggered {}", self.grid, job_name);

        debug!("[{}] Querying Jenkins for job \"{}\"", self.grid, job_name);
        let wanted = job_name.to_lowercase();
        let matching: Vec<JobSummary> = jenkins
            .get_jobs(None)
            .await?
            .into_iter()
            .filter(|job| job.fullname.to_lowercase() == wanted)
            .collect();
        Ok(vec![Reply::Text(format!(
            "Your job should begin shortly: {}",
            format_jobs(&matching)
        ))])
    }

    async fn unqueue(&self, job_name: &str) -> CommandResult {
        if job_name.is_empty() {
            return Ok(vec![Reply::text("What job would you like to unqueue?")]);
        }
        let jenkins = self.jenkins().await?;
        let queue = jenkins.get_queue_info().await?;

        let wanted = job_name.to_lowercase();
        match queue.iter().find(|item| item.task.name.to_lowercase() == wanted) {
            Some(item) => {
                jenkins.cancel_queue(item.id).await?;
                Ok(vec![Reply::Text(format!("Unqueued job {}", item.task.name))])
            }
            None => {
                let queued: Vec<&str> = queue.iter().map(|item| item.task.name.as_str()).collect();
                Ok(vec![Reply::Text(format!(
                    "Could not find job {}, but found the following: {}",
                    job_name,
                    queued.join(", ")
                ))])
            }
        }
    }

    async fn create_job(&self, args: &[String]) -> CommandResult {
        let [kind, name, rest @ ..] = args else {
            return Ok(vec![Reply::text("Oops, I need a type and a name for your new job.")]);
        };
        if kind != "pipeline" && kind != "multibranch" {
            return Ok(vec![Reply::text(
                "I'm sorry, I can only create `pipeline` and `multibranch` jobs.",
            )]);
        }
        let Some(repository) = rest.first() else {
            return Ok(vec![Reply::text(
                "Oops, I need a repository URL for your new job.",
            )]);
        };

        let template = if kind == "pipeline" {
            JobTemplate::Pipeline {
                repository: repository.clone(),
            }
        } else {
            match JobTemplate::multibranch_from_url(repository) {
                Some(template) => template,
                None => {
                    return Ok(vec![Reply::Text(format!(
                        "Oops, I could not find an owner and a repository in {repository}."
                    ))]);
                }
            }
        };

        let jenkins = self.jenkins().await?;
        jenkins.create_job(name, &template.render()).await?;
        info!("[{}] Created {} job {}", self.grid, kind, name);
        Ok(vec![Reply::Text(format!(
            "Your job has been created: {}/job/{}",
            jenkins.base_url(),
            name
        ))])
    }

    async fn job_toggle(&self, command: Command, args: &[String]) -> CommandResult {
        let verb = match command {
            Command::DeleteJob => "delete",
            Command::EnableJob => "enable",
            _ => "disable",
        };
        let Some(job_name) = args.first() else {
            return Ok(vec![Reply::Text(format!(
                "Oops, I need the name of the job you want me to {verb}."
            ))]);
        };

        let jenkins = self.jenkins().await?;
        match command {
            Command::DeleteJob => jenkins.delete_job(job_name).await?,
            Command::EnableJob => jenkins.enable_job(job_name).await?,
            _ => jenkins.disable_job(job_name).await?,
        }
        Ok(vec![Reply::Text(format!("Your job has been {verb}d."))])
    }

    async fn create_node(&self, args: &[String]) -> CommandResult {
        let [name, remote_fs, labels @ ..] = args else {
            return Ok(vec![Reply::text(
                "Oops, I need a name and a working dir for your new node.",
            )]);
        };

        let jenkins = self.jenkins().await?;
        jenkins
            .create_node(&NodeSpec::jnlp(name, remote_fs, labels))
            .await?;
        info!("[{}] Created node {}", self.grid, name);
        Ok(vec![Reply::Text(format!(
            "Your node has been created: {}/computer/{}",
            jenkins.base_url(),
            name
        ))])
    }

    async fn node_toggle(&self, command: Command, args: &[String]) -> CommandResult {
        let verb = match command {
            Command::DeleteNode => "delete",
            Command::EnableNode => "enable",
            _ => "disable",
        };
        let Some(node) = args.first() else {
            return Ok(vec![Reply::Text(format!(
                "Oops, I need the name of the node you want me to {verb}."
            ))]);
        };

        let jenkins = self.jenkins().await?;
        match command {
            Command::DeleteNode => jenkins.delete_node(node).await?,
            Command::EnableNode => jenkins.enable_node(node).await?,
            _ => jenkins.disable_node(node).await?,
        }
        Ok(vec![Reply::Text(format!("Your node has been {verb}d."))])
    }
}
