use log::{error, info, warn};
use std::path::Path;
use std::time::Duration;

use crate::assistant::{Analysis, Assistant, IssueContext};
use crate::config::ProcessSettings;
use crate::error::Result;
use crate::git::GitOps;
use crate::github::GitHubClient;
use crate::types::{Issue, RepoRef};

const ANALYSIS_EXCERPT_CHARS: usize = 500;
const FOOTER: &str = "*This analysis was generated automatically by issue-triage-bot.*";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueOutcome {
    PullRequestOpened { url: String },
    NeedsMoreInfo,
    NoChanges,
    AssistantDisabled,
}

/// Tally for one repository.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoSummary {
    pub found: usize,
    pub pull_requests: usize,
    pub needs_info: usize,
    pub no_changes: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RepoSummary {
    fn record(&mut self, outcome: &Result<IssueOutcome>) {
        match outcome {
            Ok(IssueOutcome::PullRequestOpened { .. }) => self.pull_requests += 1,
            Ok(IssueOutcome::NeedsMoreInfo) => self.needs_info += 1,
            Ok(IssueOutcome::NoChanges) => self.no_changes += 1,
            Ok(IssueOutcome::AssistantDisabled) => self.skipped += 1,
            Err(_) => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub repos: Vec<(RepoRef, RepoSummary)>,
    pub failed_repos: Vec<RepoRef>,
}

impl RunSummary {
    pub fn pull_requests(&self) -> usize {
        self.repos.iter().map(|(_, s)| s.pull_requests).sum()
    }
}

pub fn fix_branch_name(number: u64) -> String {
    format!("fix/issue-{}", number)
}

fn excerpt(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub fn commit_message(issue: &Issue, analysis: &Analysis) -> String {
    format!(
        "Fix: {title} (#{n})\n\n{excerpt}\n\nCloses #{n}\n",
        title = issue.title,
        n = issue.number,
        excerpt = excerpt(&analysis.text, ANALYSIS_EXCERPT_CHARS),
    )
}

pub fn pull_request_body(issue: &Issue, analysis: &Analysis, summary: &str) -> String {
    format!(
        "## Summary\nAutomated change for issue #{n}.\n\n## Related issue\nCloses #{n}\n\n\
         ## Analysis\n{analysis}\n\n## Implementation\n{summary}\n\n---\n\
         **Important**: this pull request was generated automatically. Review it carefully before merging.\n\n\
         ### Review checklist\n- [ ] The change meets the requirements\n- [ ] Code quality is acceptable\n\
         - [ ] Tests are adequate\n- [ ] No security concerns\n- [ ] No performance regressions\n",
        n = issue.number,
        analysis = analysis.text,
        summary = summary,
    )
}

/// Sequences GitHub, git and the assistant for each qualifying issue.
pub struct Orchestrator<'a> {
    github: &'a GitHubClient,
    git: &'a dyn GitOps,
    assistant: Option<&'a dyn Assistant>,
    settings: ProcessSettings,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        github: &'a GitHubClient,
        git: &'a dyn GitOps,
        assistant: Option<&'a dyn Assistant>,
        settings: ProcessSettings,
    ) -> Self {
        Self {
            github,
            git,
            assistant,
            settings,
        }
    }

    /// Process every repository; a failing repository does not stop the others.
    pub async fn run(&self, repos: &[RepoRef]) -> RunSummary {
        let mut summary = RunSummary::default();
        if self.assistant.is_none() {
            info!("Assistant disabled - running in label-only mode");
        }
        for repo in repos {
            match self.process_repository(repo).await {
                Ok(s) => summary.repos.push((repo.clone(), s)),
                Err(e) => {
                    error!("Error processing repository {}: {}", repo, e);
                    summary.failed_repos.push(repo.clone());
                }
            }
        }
        summary
    }

    pub async fn process_repository(&self, repo: &RepoRef) -> Result<RepoSummary> {
        info!("=== Processing repository: {} ===", repo);
        self.ensure_bot_labels(repo).await;

        let issues = self
            .github
            .list_unprocessed_issues(repo, &self.settings.processed_label)
            .await?;
        let mut summary = RepoSummary {
            found: issues.len(),
            ..RepoSummary::default()
        };
        if issues.is_empty() {
            info!("No unprocessed issues found in {}", repo);
            return Ok(summary);
        }

        for (idx, issue) in issues.iter().enumerate() {
            if idx > 0 && self.settings.issue_delay_secs > 0 {
                tokio::time::sleep(Duration::from_secs(self.settings.issue_delay_secs)).await;
            }
            let outcome = self.process_issue(repo, issue).await;
            match &outcome {
                Ok(o) => info!("Issue #{} finished: {:?}", issue.number, o),
                Err(e) => error!("Error processing issue #{}: {}", issue.number, e),
            }
            summary.record(&outcome);
        }
        info!(
            "Completed {}: {}/{} issues produced pull requests",
            repo, summary.pull_requests, summary.found
        );
        Ok(summary)
    }

    // The sentinel label has to exist or marking issues processed silently fails.
    async fn ensure_bot_labels(&self, repo: &RepoRef) {
        let wanted = [
            (
                &self.settings.processed_label,
                "ededed",
                "Handled by issue-triage-bot",
            ),
            (
                &self.settings.needs_info_label,
                "d876e3",
                "More information is needed",
            ),
        ];
        for (label, color, description) in wanted {
            if let Err(e) = self.github.ensure_label(repo, label, color, description).await {
                warn!("Could not ensure label '{}' in {}: {}", label, repo, e);
            }
        }
    }

    async fn mark_processed(&self, repo: &RepoRef, number: u64) -> Result<()> {
        self.github
            .add_label(repo, number, &self.settings.processed_label)
            .await?;
        Ok(())
    }

    pub async fn process_issue(&self, repo: &RepoRef, issue: &Issue) -> Result<IssueOutcome> {
        info!("Processing issue #{}: {}", issue.number, issue.title);

        let Some(assistant) = self.assistant else {
            self.github
                .add_comment(
                    repo,
                    issue.number,
                    "This issue was detected, but automatic analysis and implementation are \
                     currently disabled. Please handle it manually.",
                )
                .await?;
            self.mark_processed(repo, issue.number).await?;
            return Ok(IssueOutcome::AssistantDisabled);
        };

        let ctx = IssueContext::new(repo, issue);
        info!("Analyzing issue #{}...", issue.number);
        let analysis = assistant.analyze(&ctx).await?;

        if analysis.insufficient_info {
            warn!(
                "Issue #{} has insufficient information - stopping processing",
                issue.number
            );
            let body = format!(
                "## Processing stopped: more information needed\n\n{}\n\n---\n\
                 **Next step**: once the details above are added, remove the `{}` label to have \
                 this issue picked up again.\n\n{}",
                analysis.text, self.settings.processed_label, FOOTER
            );
            self.github.add_comment(repo, issue.number, &body).await?;
            self.github
                .add_label(repo, issue.number, &self.settings.needs_info_label)
                .await?;
            self.mark_processed(repo, issue.number).await?;
            return Ok(IssueOutcome::NeedsMoreInfo);
        }

        info!("Suggested labels: {:?}", analysis.suggested_labels);
        let comment = format!("## Automated analysis\n\n{}\n\n---\n{}", analysis.text, FOOTER);
        self.github.add_comment(repo, issue.number, &comment).await?;
        for label in &analysis.suggested_labels {
            if let Err(e) = self.github.add_label(repo, issue.number, label).await {
                warn!("Failed to add label '{}' to issue #{}: {}", label, issue.number, e);
            }
        }

        let base = self
            .github
            .resolve_base_branch(repo, &self.settings.base_branch)
            .await?;
        info!("Cloning repository {}...", repo);
        let workdir = self.git.clone_repo(repo, &base).await?;
        let result = self
            .implement_and_open_pr(assistant, repo, issue, &ctx, &analysis, &base, &workdir)
            .await;
        info!("Cleaning up repository {}...", repo);
        if let Err(e) = self.git.cleanup(&workdir).await {
            warn!("Failed to remove {}: {}", workdir.display(), e);
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn implement_and_open_pr(
        &self,
        assistant: &dyn Assistant,
        repo: &RepoRef,
        issue: &Issue,
        ctx: &IssueContext,
        analysis: &Analysis,
        base: &str,
        workdir: &Path,
    ) -> Result<IssueOutcome> {
        let branch = fix_branch_name(issue.number);
        info!("Creating branch: {}", branch);
        self.git.checkout_branch(workdir, &branch, true).await?;
        self.github.create_branch(repo, &branch, base).await?;

        info!(
            "Implementing fix for issue #{}; this may take several minutes",
            issue.number
        );
        let implementation = assistant.implement(ctx, workdir).await?;

        let message = commit_message(issue, analysis);
        if !self.git.commit_all(workdir, &message).await? {
            self.github
                .add_comment(
                    repo,
                    issue.number,
                    "The analysis is complete, but no code changes were produced.",
                )
                .await?;
            self.mark_processed(repo, issue.number).await?;
            return Ok(IssueOutcome::NoChanges);
        }

        info!("Pushing branch {}...", branch);
        self.git.push_branch(workdir, &branch).await?;

        let title = format!("Fix: {} (#{})", issue.title, issue.number);
        let summary = self.github.redact_credentials(&implementation.summary).await;
        let body = pull_request_body(issue, analysis, &summary);
        let pr = self
            .github
            .create_pull_request(repo, &title, &body, &branch, base)
            .await?;
        self.github
            .add_comment(
                repo,
                issue.number,
                &format!("Implemented a fix and opened a pull request: {}", pr.html_url),
            )
            .await?;
        self.mark_processed(repo, issue.number).await?;
        Ok(IssueOutcome::PullRequestOpened { url: pr.html_url })
    }
}
