use chrono::{DateTime, Utc};
use log::{info, warn};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::auth::{parse_token_expiration, AuthProvider};
use crate::config::HttpConfig;
use crate::error::{Error, Result};
use crate::http::{self, encode_path_segment};
use crate::types::{Issue, PullRequest, RateMeta, RepoRef};

/// What `GET /rate_limit` tells us about the active credential.
#[derive(Debug, Clone, Default)]
pub struct TokenStatus {
    pub rate: RateMeta,
    pub limit: Option<i64>,
    /// Set for expiring personal tokens only.
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct RepoInfo {
    default_branch: String,
}

#[derive(Deserialize)]
struct BranchInfo {
    commit: CommitRef,
}

#[derive(Deserialize)]
struct CommitRef {
    sha: String,
}

#[derive(Deserialize)]
struct UserInfo {
    login: String,
}

/// REST client for the handful of GitHub endpoints the bot touches.
pub struct GitHubClient {
    client: Client,
    http: HttpConfig,
    auth: Arc<AuthProvider>,
}

fn repo_path(repo: &RepoRef) -> String {
    format!(
        "/repos/{}/{}",
        encode_path_segment(&repo.owner),
        encode_path_segment(&repo.name)
    )
}

impl GitHubClient {
    pub fn new(http_cfg: HttpConfig, auth: Arc<AuthProvider>) -> Result<Self> {
        let client = http::build_client(&http_cfg)?;
        Ok(Self {
            client,
            http: http_cfg,
            auth,
        })
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        let token = self.auth.bearer().await?;
        http::rest_get_json(&self.client, &self.http, &token, path)
            .await
            .into_result()
    }

    async fn post<T: for<'de> Deserialize<'de>>(&self, path: &str, body: &Value) -> Result<T> {
        let token = self.auth.bearer().await?;
        http::rest_post_json(&self.client, &self.http, &token, path, body)
            .await
            .into_result()
    }

    /// `text` with the active credential masked, for assistant output headed to GitHub.
    pub async fn redact_credentials(&self, text: &str) -> String {
        match self.auth.bearer().await {
            Ok(token) => crate::git::redact(text, Some(&token)),
            Err(_) => text.to_string(),
        }
    }

    /// Login of the token owner. Installation tokens cannot read `/user` and yield `None`.
    pub async fn authenticated_login(&self) -> Result<Option<String>> {
        match self.get::<UserInfo>("/user").await {
            Ok(u) => Ok(Some(u.login)),
            Err(e) if e.is_status(403) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Verify the credential works and report rate limits and expiry.
    pub async fn token_status(&self) -> Result<TokenStatus> {
        let token = self.auth.bearer().await?;
        let resp =
            http::rest_get_json::<Value>(&self.client, &self.http, &token, "/rate_limit").await;
        let expires_at = resp
            .headers
            .as_ref()
            .and_then(|h| h.get("github-authentication-token-expiration"))
            .and_then(|v| v.to_str().ok())
            .and_then(parse_token_expiration);
        let header_rate = resp.rate.clone().unwrap_or_default();
        let body = match resp.into_result() {
            Ok(v) => v,
            Err(e) if e.is_status(401) => {
                return Err(Error::Auth(
                    "token is invalid or expired; update the configured credentials".into(),
                ))
            }
            Err(e) => return Err(e),
        };
        let core = body.get("resources").and_then(|r| r.get("core"));
        let limit = core.and_then(|c| c.get("limit")).and_then(Value::as_i64);
        let remaining = core
            .and_then(|c| c.get("remaining"))
            .and_then(Value::as_i64)
            .and_then(|n| i32::try_from(n).ok());
        Ok(TokenStatus {
            rate: RateMeta {
                remaining: remaining.or(header_rate.remaining),
                ..header_rate
            },
            limit,
            expires_at,
        })
    }

    /// Open issues (pull requests excluded) that do not carry `processed_label`.
    pub async fn list_unprocessed_issues(
        &self,
        repo: &RepoRef,
        processed_label: &str,
    ) -> Result<Vec<Issue>> {
        let token = self.auth.bearer().await?;
        let mut next = Some(format!("{}/issues?state=open&per_page=100", repo_path(repo)));
        let mut unprocessed = Vec::new();
        while let Some(page) = next.take() {
            let resp =
                http::rest_get_json::<Vec<Issue>>(&self.client, &self.http, &token, &page).await;
            next = resp.next_page();
            let issues = resp.into_result()?;
            unprocessed.extend(
                issues
                    .into_iter()
                    .filter(|i| !i.is_pull_request() && !i.has_label(processed_label)),
            );
        }
        info!("Found {} unprocessed issues in {}", unprocessed.len(), repo);
        Ok(unprocessed)
    }

    pub async fn add_comment(&self, repo: &RepoRef, number: u64, body: &str) -> Result<()> {
        let path = format!("{}/issues/{}/comments", repo_path(repo), number);
        self.post::<Value>(&path, &serde_json::json!({ "body": body }))
            .await?;
        info!("Added comment to issue #{}", number);
        Ok(())
    }

    pub async fn label_exists(&self, repo: &RepoRef, label: &str) -> Result<bool> {
        let path = format!("{}/labels/{}", repo_path(repo), encode_path_segment(label));
        match self.get::<Value>(&path).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_status(404) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Create `label` in the repository unless it already exists.
    pub async fn ensure_label(
        &self,
        repo: &RepoRef,
        label: &str,
        color: &str,
        description: &str,
    ) -> Result<()> {
        if self.label_exists(repo, label).await? {
            return Ok(());
        }
        let path = format!("{}/labels", repo_path(repo));
        let body = serde_json::json!({ "name": label, "color": color, "description": description });
        match self.post::<Value>(&path, &body).await {
            Ok(_) => {
                info!("Created label '{}' in {}", label, repo);
                Ok(())
            }
            Err(e) if e.is_status(422) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Add an existing label to an issue. Labels missing from the repository are skipped.
    pub async fn add_label(&self, repo: &RepoRef, number: u64, label: &str) -> Result<bool> {
        if !self.label_exists(repo, label).await? {
            warn!("Label '{}' does not exist in {} - skipping", label, repo);
            return Ok(false);
        }
        let path = format!("{}/issues/{}/labels", repo_path(repo), number);
        self.post::<Value>(&path, &serde_json::json!({ "labels": [label] }))
            .await?;
        info!("Added label '{}' to issue #{}", label, number);
        Ok(true)
    }

    pub async fn default_branch(&self, repo: &RepoRef) -> Result<String> {
        Ok(self.get::<RepoInfo>(&repo_path(repo)).await?.default_branch)
    }

    async fn branch_sha(&self, repo: &RepoRef, branch: &str) -> Result<String> {
        let path = format!("{}/branches/{}", repo_path(repo), encode_path_segment(branch));
        Ok(self.get::<BranchInfo>(&path).await?.commit.sha)
    }

    /// `preferred` when the repository has it, otherwise its default branch.
    pub async fn resolve_base_branch(&self, repo: &RepoRef, preferred: &str) -> Result<String> {
        match self.branch_sha(repo, preferred).await {
            Ok(_) => Ok(preferred.to_string()),
            Err(e) if e.is_status(404) => self.default_branch(repo).await,
            Err(e) => Err(e),
        }
    }

    /// Create `refs/heads/<branch>` at the tip of `base`. An existing ref is not an error.
    pub async fn create_branch(&self, repo: &RepoRef, branch: &str, base: &str) -> Result<()> {
        let sha = self.branch_sha(repo, base).await?;
        let path = format!("{}/git/refs", repo_path(repo));
        let body = serde_json::json!({ "ref": format!("refs/heads/{}", branch), "sha": sha });
        match self.post::<Value>(&path, &body).await {
            Ok(_) => {
                info!("Created branch: {}", branch);
                Ok(())
            }
            Err(e) if e.is_status(422) => {
                warn!("Branch {} already exists", branch);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn create_pull_request(
        &self,
        repo: &RepoRef,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<PullRequest> {
        let path = format!("{}/pulls", repo_path(repo));
        let payload = serde_json::json!({ "title": title, "body": body, "head": head, "base": base });
        let pr: PullRequest = self.post(&path, &payload).await?;
        info!("Created PR #{}: {}", pr.number, pr.html_url);
        Ok(pr)
    }
}
