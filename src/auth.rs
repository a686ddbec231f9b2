//! Credential selection and GitHub App token exchange.
//!
//! A personal token is used as-is. App credentials are turned into a short-lived
//! RS256 JWT, which is exchanged for a one-hour installation token. The installation
//! token is cached and re-minted shortly before it lapses.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use log::{info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::Mutex;

use crate::config::{AppCredentials, Credentials, HttpConfig};
use crate::error::{Error, Result};
use crate::http;

const REFRESH_WINDOW_MINUTES: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Personal,
    Installation,
}

#[derive(Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub kind: TokenKind,
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("kind", &self.kind)
            .finish()
    }
}

impl AccessToken {
    pub fn expires_within(&self, window: ChronoDuration, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at - now <= window)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AppClaims {
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

/// Sign the App JWT. Backdated a minute to tolerate clock drift; GitHub caps lifetime at 10 minutes.
pub fn app_jwt(app_id: u64, key: &EncodingKey, now: DateTime<Utc>) -> Result<String> {
    let claims = AppClaims {
        iat: (now - ChronoDuration::seconds(60)).timestamp(),
        exp: (now + ChronoDuration::minutes(9)).timestamp(),
        iss: app_id.to_string(),
    };
    Ok(jsonwebtoken::encode(
        &Header::new(Algorithm::RS256),
        &claims,
        key,
    )?)
}

#[derive(Deserialize)]
struct InstallationTokenResponse {
    token: String,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstallationAccount {
    pub login: String,
    #[serde(rename = "type", default)]
    pub account_type: String,
}

#[derive(Debug, Clone, Deserialize)]
struct Installation {
    id: u64,
    #[serde(default)]
    account: Option<InstallationAccount>,
    #[serde(default)]
    target_type: String,
}

#[derive(Deserialize)]
struct InstallationRepos {
    #[serde(default)]
    total_count: u64,
    repositories: Vec<RepoName>,
}

#[derive(Deserialize)]
struct RepoName {
    full_name: String,
}

/// One App installation and a preview of the repositories it can reach.
#[derive(Debug, Clone)]
pub struct InstallationSummary {
    pub id: u64,
    pub account: Option<InstallationAccount>,
    pub target_type: String,
    pub repositories: Vec<String>,
    pub total_repositories: u64,
}

struct AppSigner {
    creds: AppCredentials,
    key: EncodingKey,
}

pub struct AuthProvider {
    client: Client,
    http: HttpConfig,
    personal: Option<String>,
    app: Option<AppSigner>,
    cached: Mutex<Option<AccessToken>>,
}

impl AuthProvider {
    /// Reads the App private key up front so a bad key aborts before any work starts.
    pub fn new(http: HttpConfig, credentials: Credentials) -> Result<Self> {
        let client = http::build_client(&http)?;
        let (personal, app) = match credentials {
            Credentials::Token(t) => {
                info!("Using personal access token authentication");
                (Some(t), None)
            }
            Credentials::App(creds) => {
                let pem = std::fs::read(&creds.private_key_path).map_err(|e| {
                    Error::Auth(format!(
                        "cannot read private key {}: {e}",
                        creds.private_key_path.display()
                    ))
                })?;
                let key = EncodingKey::from_rsa_pem(&pem)?;
                info!("Using GitHub App authentication (App ID: {})", creds.app_id);
                (None, Some(AppSigner { creds, key }))
            }
        };
        Ok(Self {
            client,
            http,
            personal,
            app,
            cached: Mutex::new(None),
        })
    }

    pub fn is_app(&self) -> bool {
        self.app.is_some()
    }

    /// A token valid for at least the next few minutes.
    pub async fn access_token(&self) -> Result<AccessToken> {
        if let Some(t) = &self.personal {
            return Ok(AccessToken {
                token: t.clone(),
                expires_at: None,
                kind: TokenKind::Personal,
            });
        }
        let app = self
            .app
            .as_ref()
            .ok_or_else(|| Error::Auth("no credentials configured".into()))?;

        let mut cached = self.cached.lock().await;
        let now = Utc::now();
        if let Some(tok) = cached.as_ref() {
            if !tok.expires_within(ChronoDuration::minutes(REFRESH_WINDOW_MINUTES), now) {
                return Ok(tok.clone());
            }
        }
        let fresh = self
            .mint_installation_token(app, app.creds.installation_id)
            .await?;
        *cached = Some(fresh.clone());
        Ok(fresh)
    }

    pub async fn bearer(&self) -> Result<String> {
        Ok(self.access_token().await?.token)
    }

    async fn mint_installation_token(&self, app: &AppSigner, installation_id: u64) -> Result<AccessToken> {
        let jwt = app_jwt(app.creds.app_id, &app.key, Utc::now())?;
        let path = format!("/app/installations/{}/access_tokens", installation_id);
        let resp: InstallationTokenResponse =
            http::rest_post_json(&self.client, &self.http, &jwt, &path, &serde_json::json!({}))
                .await
                .into_result()
                .map_err(|e| Error::Auth(format!("installation token exchange failed: {e}")))?;
        match resp.expires_at {
            Some(at) => info!("Generated new installation token (expires: {})", at.to_rfc3339()),
            None => info!("Generated new installation token"),
        }
        Ok(AccessToken {
            token: resp.token,
            expires_at: resp.expires_at,
            kind: TokenKind::Installation,
        })
    }

    /// Installations of the configured App, for finding `GITHUB_APP_INSTALLATION_ID`.
    pub async fn list_installations(&self) -> Result<Vec<InstallationSummary>> {
        let app = self.app.as_ref().ok_or_else(|| {
            Error::Auth("listing installations requires GITHUB_APP_ID and GITHUB_APP_PRIVATE_KEY_PATH".into())
        })?;
        let jwt = app_jwt(app.creds.app_id, &app.key, Utc::now())?;
        let installs: Vec<Installation> =
            http::rest_get_json(&self.client, &self.http, &jwt, "/app/installations?per_page=100")
                .await
                .into_result()?;

        let mut out = Vec::with_capacity(installs.len());
        for inst in installs {
            let (repositories, total_repositories) = match self.preview_repositories(app, inst.id).await {
                Ok(r) => r,
                Err(e) => {
                    warn!("Could not fetch repositories for installation {}: {}", inst.id, e);
                    (Vec::new(), 0)
                }
            };
            out.push(InstallationSummary {
                id: inst.id,
                account: inst.account,
                target_type: inst.target_type,
                repositories,
                total_repositories,
            });
        }
        Ok(out)
    }

    async fn preview_repositories(&self, app: &AppSigner, installation_id: u64) -> Result<(Vec<String>, u64)> {
        let token = self.mint_installation_token(app, installation_id).await?;
        let repos: InstallationRepos = http::rest_get_json(
            &self.client,
            &self.http,
            &token.token,
            "/installation/repositories?per_page=10",
        )
        .await
        .into_result()?;
        Ok((
            repos.repositories.into_iter().map(|r| r.full_name).collect(),
            repos.total_count,
        ))
    }
}

/// Parse GitHub's `github-authentication-token-expiration` header.
///
/// Observed forms: `2023-03-21 21:27:37 UTC` and `2023-03-21 21:27:37 -0700`.
pub fn parse_token_expiration(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Some(naive) = raw.strip_suffix(" UTC") {
        return chrono::NaiveDateTime::parse_from_str(naive, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|n| n.and_utc());
    }
    DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S %z")
        .ok()
        .map(|d| d.with_timezone(&Utc))
}
