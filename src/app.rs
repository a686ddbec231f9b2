//! Entry points behind each subcommand.

use anyhow::{bail, Context};
use chrono::{Duration as ChronoDuration, Utc};
use log::{error, info, warn};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use crate::assistant::{Assistant, CliAssistant};
use crate::auth::AuthProvider;
use crate::cli::ScheduleKind;
use crate::config::{AppCredentials, Config, ConfigError, Credentials, HttpConfig};
use crate::git::GitCli;
use crate::github::GitHubClient;
use crate::orchestrator::{Orchestrator, RunSummary};
use crate::schedule::{self, ScheduleTarget};

const PAT_EXPIRY_WARNING_DAYS: i64 = 7;
const INSTALLATION_EXPIRY_WARNING_MINUTES: i64 = 10;

fn log_config_problems(err: &ConfigError) {
    error!("Configuration validation failed:");
    for p in &err.problems {
        error!("  - {}", p);
    }
}

/// Configuration from the environment, with `--repo` values replacing `GITHUB_REPOS`.
pub fn load_config(repo_overrides: &[String]) -> Result<Config, ConfigError> {
    if repo_overrides.is_empty() {
        return Config::from_env();
    }
    let joined = repo_overrides.join(",");
    Config::from_lookup(|key| {
        if key == "GITHUB_REPOS" {
            Some(joined.clone())
        } else {
            std::env::var(key).ok()
        }
    })
}

/// One pass over every configured repository.
pub async fn run(repo_overrides: &[String], dry_run: bool) -> anyhow::Result<RunSummary> {
    let cfg = match load_config(repo_overrides) {
        Ok(c) => c,
        Err(e) => {
            log_config_problems(&e);
            bail!(e);
        }
    };
    info!("Starting issue-triage-bot");
    info!(
        "Target repositories: {}",
        cfg.repos
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );

    let auth = Arc::new(
        AuthProvider::new(cfg.http.clone(), cfg.credentials.clone())
            .context("failed to initialise GitHub authentication")?,
    );
    let token = auth
        .access_token()
        .await
        .context("failed to obtain a GitHub access token")?;
    if auth.is_app()
        && token.expires_within(
            ChronoDuration::minutes(INSTALLATION_EXPIRY_WARNING_MINUTES),
            Utc::now(),
        )
    {
        warn!("Installation token expires soon; it will be refreshed automatically");
    }

    let github = GitHubClient::new(cfg.http.clone(), auth.clone())?;
    verify_token(&github).await?;

    if dry_run {
        print_pending(&github, &cfg).await?;
        return Ok(RunSummary::default());
    }

    let git = GitCli::new(cfg.git.clone(), Some(auth.clone()));
    let cli_assistant = cfg
        .assistant_enabled
        .then(|| CliAssistant::new(cfg.assistant.clone()));
    let assistant = cli_assistant.as_ref().map(|a| a as &dyn Assistant);

    let orchestrator = Orchestrator::new(&github, &git, assistant, cfg.process.clone());
    let summary = orchestrator.run(&cfg.repos).await;
    for (repo, s) in &summary.repos {
        info!(
            "{}: found={} pull_requests={} needs_info={} no_changes={} skipped={} failed={}",
            repo, s.found, s.pull_requests, s.needs_info, s.no_changes, s.skipped, s.failed
        );
    }
    for repo in &summary.failed_repos {
        warn!("{}: repository could not be processed", repo);
    }
    info!(
        "Issue processing completed: {} pull request(s) opened",
        summary.pull_requests()
    );
    Ok(summary)
}

// An invalid credential must stop the run before anything is touched.
async fn verify_token(github: &GitHubClient) -> anyhow::Result<()> {
    match github.authenticated_login().await {
        Ok(Some(login)) => info!("Authenticated as: {}", login),
        Ok(None) => info!("Authenticated as a GitHub App installation"),
        Err(e) => warn!("Could not determine authenticated user: {}", e),
    }
    let status = github
        .token_status()
        .await
        .context("GitHub token check failed")?;
    if let Some(at) = status.expires_at {
        let left = at - Utc::now();
        if left <= ChronoDuration::days(PAT_EXPIRY_WARNING_DAYS) {
            warn!(
                "GitHub token expires in {} day(s) ({}); renew it soon",
                left.num_days().max(0),
                at.to_rfc3339()
            );
        } else {
            info!("GitHub token expires at {}", at.to_rfc3339());
        }
    }
    match (status.rate.remaining, status.limit) {
        (Some(remaining), Some(limit)) => info!("API rate limit: {}/{} remaining", remaining, limit),
        (Some(remaining), None) => info!("API rate limit: {} remaining", remaining),
        _ => {}
    }
    Ok(())
}

async fn print_pending(github: &GitHubClient, cfg: &Config) -> anyhow::Result<()> {
    for repo in &cfg.repos {
        let issues = github
            .list_unprocessed_issues(repo, &cfg.process.processed_label)
            .await
            .with_context(|| format!("failed to list issues for {repo}"))?;
        let mut out = std::io::stdout().lock();
        writeln!(out, "{} ({} unprocessed)", repo, issues.len())?;
        for issue in issues {
            writeln!(out, "  #{} {}", issue.number, issue.title)?;
        }
    }
    Ok(())
}

/// Print every installation of the configured App.
pub async fn installations() -> anyhow::Result<()> {
    let creds = match AppCredentials::from_env_without_installation() {
        Ok(c) => c,
        Err(e) => {
            log_config_problems(&e);
            bail!(e);
        }
    };
    let http = HttpConfig::from_env()?;
    let auth = AuthProvider::new(http, Credentials::App(creds))?;
    let installs = auth.list_installations().await?;

    let mut out = std::io::stdout().lock();
    if installs.is_empty() {
        writeln!(out, "No installations found. Install the App on an account first.")?;
        return Ok(());
    }
    writeln!(out, "Found {} installation(s):", installs.len())?;
    for inst in &installs {
        writeln!(out)?;
        writeln!(out, "Installation ID: {}", inst.id)?;
        if let Some(acct) = &inst.account {
            writeln!(out, "  Account: {} ({})", acct.login, acct.account_type)?;
        }
        if !inst.target_type.is_empty() {
            writeln!(out, "  Target type: {}", inst.target_type)?;
        }
        writeln!(out, "  Repositories: {}", inst.total_repositories)?;
        for name in &inst.repositories {
            writeln!(out, "    - {}", name)?;
        }
        let shown = inst.repositories.len() as u64;
        if inst.total_repositories > shown {
            writeln!(out, "    ... and {} more", inst.total_repositories - shown)?;
        }
    }
    writeln!(out)?;
    writeln!(
        out,
        "Set GITHUB_APP_INSTALLATION_ID={} in your .env file",
        installs[0].id
    )?;
    Ok(())
}

/// Print scheduler configuration for running the bot hourly.
pub fn schedule(
    kind: ScheduleKind,
    binary: Option<PathBuf>,
    workdir: Option<PathBuf>,
    log_file: Option<PathBuf>,
) -> anyhow::Result<()> {
    let binary = match binary {
        Some(b) => b,
        None => std::env::current_exe().context("cannot locate the running executable")?,
    };
    let workdir = match workdir {
        Some(w) => w,
        None => std::env::current_dir().context("cannot determine the current directory")?,
    };
    let target = ScheduleTarget::new(binary, workdir, log_file);

    let mut out = std::io::stdout().lock();
    match kind {
        ScheduleKind::Cron => {
            writeln!(out, "# Add with `crontab -e`:")?;
            writeln!(out, "{}", schedule::cron_line(&target))?;
        }
        ScheduleKind::Systemd => {
            for unit in schedule::systemd_units(&target) {
                writeln!(out, "# /etc/systemd/system/{}", unit.file_name)?;
                writeln!(out, "{}", unit.contents)?;
            }
            writeln!(
                out,
                "# Enable with: systemctl daemon-reload && systemctl enable --now {}.timer",
                schedule::SERVICE_NAME
            )?;
        }
    }
    Ok(())
}
