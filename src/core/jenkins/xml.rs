use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::escape::escape;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use thiserror::Error;

const PIPELINE_TEMPLATE: &str = include_str!("templates/pipeline.xml");
const MULTIBRANCH_TEMPLATE: &str = include_str!("templates/multibranch.xml");

const BRANCH_SPEC: &[u8] = b"hudson.plugins.git.BranchSpec";
const BRANCH_NAME: &[u8] = b"name";

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("malformed job config: {0}")]
    Parse(String),
    #[error("could not write job config: {0}")]
    Write(String),
    #[error("job config has no git branch spec")]
    NoBranchSpec,
}

/// Job definitions the bot knows how to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobTemplate {
    Pipeline {
        repository: String,
    },
    Multibranch {
        repo_owner: String,
        repo_name: String,
    },
}

impl JobTemplate {
    /// Multibranch jobs need the GitHub owner and repository, taken from the
    /// last two path segments of the clone URL.
    pub fn multibranch_from_url(url: &str) -> Option<Self> {
        let (owner, repo) = parse_repo_slug(url)?;
        Some(JobTemplate::Multibranch {
            repo_owner: owner,
            repo_name: repo,
        })
    }

    /// Renders the job document, escaping every substituted value.
    pub fn render(&self) -> String {
        match self {
            JobTemplate::Pipeline { repository } => {
                PIPELINE_TEMPLATE.replace("{repository}", &escape(repository.as_str()))
            }
            JobTemplate::Multibranch {
                repo_owner,
                repo_name,
            } => MULTIBRANCH_TEMPLATE
                .replace("{repo_owner}", &escape(repo_owner.as_str()))
                .replace("{repo_name}", &escape(repo_name.as_str())),
        }
    }
}

/// `git@github.com:acme/widgets.git` and `https://github.com/acme/widgets`
/// both yield `("acme", "widgets")`.
pub fn parse_repo_slug(url: &str) -> Option<(String, String)> {
    let mut segments = url.rsplitn(3, '/');
    let repo = segments.next()?;
    let owner = segments.next()?;
    let owner = owner.rsplit(':').next().unwrap_or(owner);
    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some((owner.to_string(), repo.to_string()))
}

fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), XmlError> {
    writer
        .write_event(event)
        .map_err(|e| XmlError::Write(e.to_string()))
}

/// Replaces the text of the first `hudson.plugins.git.BranchSpec/name` element.
pub fn rewrite_branch(config_xml: &str, branch: &str) -> Result<String, XmlError> {
    let mut reader = Reader::from_str(config_xml);
    let mut writer = Writer::new(Vec::new());
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut in_target = false;
    let mut replaced = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| XmlError::Parse(e.to_string()))?;
        match event {
            Event::Eof => break,
            Event::Start(start) => {
                let name = start.name().as_ref().to_vec();
                let is_target = !replaced
                    && name == BRANCH_NAME
                    && path.last().is_some_and(|parent| parent == BRANCH_SPEC);
                path.push(name);
                emit(&mut writer, Event::Start(start))?;
                if is_target {
                    in_target = true;
                    emit(&mut writer, Event::Text(BytesText::new(branch)))?;
                }
            }
            Event::Empty(empty) => {
                let is_target = !replaced
                    && empty.name().as_ref() == BRANCH_NAME
                    && path.last().is_some_and(|parent| parent == BRANCH_SPEC);
                if is_target {
                    emit(&mut writer, Event::Start(BytesStart::new("name")))?;
                    emit(&mut writer, Event::Text(BytesText::new(branch)))?;
                    emit(&mut writer, Event::End(BytesEnd::new("name")))?;
                    replaced = true;
                } else {
                    emit(&mut writer, Event::Empty(empty))?;
                }
            }
            Event::End(end) => {
                path.pop();
                if in_target {
                    in_target = false;
                    replaced = true;
                }
                emit(&mut writer, Event::End(end))?;
            }
            Event::Text(_) | Event::CData(_) if in_target => {}
            other => emit(&mut writer, other)?,
        }
    }

    if !replaced {
        return Err(XmlError::NoBranchSpec);
    }
    String::from_utf8(writer.into_inner()).map_err(|e| XmlError::Write(e.to_string()))
}

/// Reads back the first branch spec name; used to confirm a rewrite.
#[cfg(test)]
pub fn current_branch(config_xml: &str) -> Result<Option<String>, XmlError> {
    let mut reader = Reader::from_str(config_xml);
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut in_target = false;
    let mut text = String::new();

    loop {
        match reader
            .read_event()
            .map_err(|e| XmlError::Parse(e.to_string()))?
        {
            Event::Eof => return Ok(None),
            Event::Start(start) => {
                let name = start.name().as_ref().to_vec();
                in_target = name == BRANCH_NAME
                    && path.last().is_some_and(|parent| parent == BRANCH_SPEC);
                path.push(name);
            }
            Event::Text(t) if in_target => {
                let unescaped = t.unescape().map_err(|e| XmlError::Parse(e.to_string()))?;
                text.push_str(&unescaped);
            }
            Event::End(_) => {
                if in_target {
                    return Ok(Some(text));
                }
                path.pop();
            }
            _ => {}
        }
    }
}
