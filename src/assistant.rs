//! External AI coding assistant, driven as a subprocess.
//!
//! The prompt (instructions first, then the task) goes to the CLI's stdin and the
//! CLI's stdout is taken as the answer. During implementation the CLI runs inside
//! the scratch clone and edits files there directly.

use async_trait::async_trait;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::AssistantConfig;
use crate::error::{Error, Result};
use crate::types::{Issue, RepoRef};

pub const INSUFFICIENT_INFO_MARKER: &str = "INSUFFICIENT_INFO";
const MAX_SUGGESTED_LABELS: usize = 3;

/// Issue fields handed to the assistant.
#[derive(Debug, Clone)]
pub struct IssueContext {
    pub repo: RepoRef,
    pub number: u64,
    pub title: String,
    pub body: String,
    pub url: String,
}

impl IssueContext {
    pub fn new(repo: &RepoRef, issue: &Issue) -> Self {
        Self {
            repo: repo.clone(),
            number: issue.number,
            title: issue.title.clone(),
            body: issue.body_text().to_string(),
            url: issue.html_url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    /// Response text with the insufficient-info marker removed.
    pub text: String,
    pub suggested_labels: Vec<String>,
    pub insufficient_info: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Implementation {
    pub summary: String,
}

#[async_trait]
pub trait Assistant: Send + Sync {
    async fn analyze(&self, issue: &IssueContext) -> Result<Analysis>;
    /// Modify the working copy at `workdir` to address the issue.
    async fn implement(&self, issue: &IssueContext, workdir: &Path) -> Result<Implementation>;
}

pub fn analysis_prompt(issue: &IssueContext) -> String {
    format!(
        r#"Analyze the following GitHub issue and propose how to address it.

# Issue
- Repository: {repo}
- Number: #{number}
- Title: {title}
- Body:
{body}

# Task
1. First decide whether the issue contains enough information to act on.
   Titles or bodies such as "it errors", "doesn't work" or "bug" with no
   reproduction steps, environment details or error messages are insufficient.
2. If information is missing, your answer MUST contain the keyword {marker},
   followed by an `## Analysis` section listing what is missing.
3. Otherwise:
   - analyze the problem,
   - suggest up to three labels (e.g. bug, enhancement, documentation),
   - describe a concrete plan.

# Output format (sufficient information)
## Analysis
<analysis>

## Suggested labels
- label1
- label2

## Plan
<steps>
"#,
        repo = issue.repo,
        number = issue.number,
        title = issue.title,
        body = issue.body,
        marker = INSUFFICIENT_INFO_MARKER,
    )
}

pub fn implementation_prompt(issue: &IssueContext, workdir: &Path) -> String {
    format!(
        r#"You are the developer assigned to fix a GitHub issue. Implement the change in the repository in the current directory.

# Issue
- Repository: {repo}
- Number: #{number}
- Title: {title}
- Body:
{body}

# Working directory
{workdir}

# Steps
1. Explore the repository layout.
2. Identify the relevant files.
3. Implement the required changes, updating tests where needed.
4. Finish with a short summary of what you changed.

Follow the existing code style, avoid breaking changes and handle errors.
"#,
        repo = issue.repo,
        number = issue.number,
        title = issue.title,
        body = issue.body,
        workdir = workdir.display(),
    )
}

/// Split an analysis response into display text, labels and the insufficient-info flag.
pub fn parse_analysis(response: &str) -> Analysis {
    let insufficient_info = response.contains(INSUFFICIENT_INFO_MARKER);
    let text = response
        .replace(INSUFFICIENT_INFO_MARKER, "")
        .trim()
        .to_string();
    let suggested_labels = if insufficient_info {
        Vec::new()
    } else {
        parse_suggested_labels(&text)
    };
    Analysis {
        text,
        suggested_labels,
        insufficient_info,
    }
}

/// Bullet items under the suggested-labels heading, cleaned of markdown and explanations.
pub fn parse_suggested_labels(text: &str) -> Vec<String> {
    let mut labels: Vec<String> = Vec::new();
    let mut in_section = false;
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("##") {
            in_section = trimmed.to_ascii_lowercase().contains("label");
            continue;
        }
        if !in_section {
            continue;
        }
        let Some(item) = trimmed
            .strip_prefix('-')
            .or_else(|| trimmed.strip_prefix('*'))
        else {
            continue;
        };
        let mut label = item.replace("**", "").replace('`', "");
        for open in ['（', '('] {
            if let Some(idx) = label.find(open) {
                label.truncate(idx);
            }
        }
        let label = label.trim().to_string();
        if !label.is_empty() && !labels.contains(&label) {
            labels.push(label);
        }
        if labels.len() == MAX_SUGGESTED_LABELS {
            break;
        }
    }
    labels
}

/// [`Assistant`] that shells out to a configured CLI.
pub struct CliAssistant {
    cfg: AssistantConfig,
}

impl CliAssistant {
    pub fn new(cfg: AssistantConfig) -> Self {
        Self { cfg }
    }

    fn instructions_path(&self, repo: &RepoRef) -> Option<PathBuf> {
        if let Some(dir) = &self.cfg.instructions_dir {
            let per_repo = dir.join(&repo.owner).join(format!("{}.md", repo.name));
            if per_repo.is_file() {
                return Some(per_repo);
            }
        }
        if self.cfg.instructions_file.is_file() {
            return Some(self.cfg.instructions_file.clone());
        }
        None
    }

    /// Repository-specific instructions when present, else the global file.
    pub fn instructions_for(&self, repo: &RepoRef) -> Option<String> {
        let Some(path) = self.instructions_path(repo) else {
            warn!(
                "Instructions file not found: {}",
                self.cfg.instructions_file.display()
            );
            return None;
        };
        match std::fs::read_to_string(&path) {
            Ok(s) => {
                info!("Loaded custom instructions from {}", path.display());
                Some(s)
            }
            Err(e) => {
                warn!("Failed to load instructions file {}: {}", path.display(), e);
                None
            }
        }
    }

    fn compose(&self, repo: &RepoRef, task: String) -> String {
        match self.instructions_for(repo) {
            Some(instructions) => format!("# Instructions\n\n{}\n\n---\n\n{}", instructions.trim(), task),
            None => task,
        }
    }

    async fn invoke(&self, prompt: &str, cwd: Option<&Path>, limit: Duration) -> Result<String> {
        let mut cmd = Command::new(&self.cfg.command);
        cmd.args(&self.cfg.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        let mut child = cmd.spawn().map_err(|e| {
            Error::Assistant(format!("failed to spawn {}: {}", self.cfg.command, e))
        })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Assistant("failed to get stdin handle".into()))?;
        let write_prompt = async move {
            // A CLI that ignores stdin may exit before reading it; that is not an error.
            let res = match stdin.write_all(prompt.as_bytes()).await {
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    debug!("{} closed stdin early", self.cfg.command);
                    Ok(())
                }
                other => other,
            };
            drop(stdin);
            res
        };

        // The prompt can exceed the pipe buffer, so writing and reading share one deadline.
        let exchange = async { tokio::join!(write_prompt, child.wait_with_output()) };
        let (written, output) = match tokio::time::timeout(limit, exchange).await {
            Ok(pair) => pair,
            Err(_) => {
                return Err(Error::Timeout {
                    what: format!("assistant `{}`", self.cfg.command),
                    after: limit,
                })
            }
        };
        let output = output?;
        written.map_err(|e| Error::Assistant(format!("failed to write prompt: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Assistant(format!(
                "{} exited with {}: {}",
                self.cfg.command,
                output.status,
                stderr.trim()
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if stdout.is_empty() {
            return Err(Error::Assistant("no response content received".into()));
        }
        Ok(stdout)
    }
}

#[async_trait]
impl Assistant for CliAssistant {
    async fn analyze(&self, issue: &IssueContext) -> Result<Analysis> {
        info!("Sending analysis prompt for issue #{}", issue.number);
        let prompt = self.compose(&issue.repo, analysis_prompt(issue));
        let limit = Duration::from_secs(self.cfg.analysis_timeout_secs);
        let response = self.invoke(&prompt, None, limit).await?;
        let analysis = parse_analysis(&response);
        info!("Analysis completed: {} characters", analysis.text.len());
        if analysis.insufficient_info {
            warn!("Issue #{} has insufficient information", issue.number);
        }
        Ok(analysis)
    }

    async fn implement(&self, issue: &IssueContext, workdir: &Path) -> Result<Implementation> {
        info!("Sending implementation request for issue #{}", issue.number);
        let prompt = self.compose(&issue.repo, implementation_prompt(issue, workdir));
        let limit = Duration::from_secs(self.cfg.implementation_timeout_secs);
        let summary = self.invoke(&prompt, Some(workdir), limit).await?;
        info!("Implementation completed: {} characters", summary.len());
        Ok(Implementation { summary })
    }
}
