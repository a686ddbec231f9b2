use log::warn;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::types::RepoRef;

pub const DEFAULT_PROCESSED_LABEL: &str = "bot-processed";
pub const DEFAULT_NEEDS_INFO_LABEL: &str = "needs-more-info";

/// Every validation problem found while reading the environment.
#[derive(Debug, Error)]
#[error("configuration validation failed: {}", .problems.join("; "))]
pub struct ConfigError {
    pub problems: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Token(String),
    App(AppCredentials),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppCredentials {
    pub app_id: u64,
    pub private_key_path: PathBuf,
    pub installation_id: u64,
}

/// Settings shared by every REST call.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub api_url: String,
    pub api_version: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl HttpConfig {
    pub fn with_api_url(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_version: "2022-11-28".to_string(),
            user_agent: default_user_agent(),
            timeout_secs: 30,
            max_retries: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GitConfig {
    pub work_dir: PathBuf,
    pub remote_base: String,
    pub author_name: String,
    pub author_email: String,
}

#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub command: String,
    pub args: Vec<String>,
    pub instructions_file: PathBuf,
    pub instructions_dir: Option<PathBuf>,
    pub analysis_timeout_secs: u64,
    pub implementation_timeout_secs: u64,
}

/// Labels, branches and pacing used by the orchestrator.
#[derive(Debug, Clone)]
pub struct ProcessSettings {
    pub processed_label: String,
    pub needs_info_label: String,
    pub base_branch: String,
    pub issue_delay_secs: u64,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            processed_label: DEFAULT_PROCESSED_LABEL.to_string(),
            needs_info_label: DEFAULT_NEEDS_INFO_LABEL.to_string(),
            base_branch: "main".to_string(),
            issue_delay_secs: 5,
        }
    }
}

/// Runtime configuration, sourced from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub repos: Vec<RepoRef>,
    pub credentials: Credentials,
    pub http: HttpConfig,
    pub git: GitConfig,
    pub assistant: AssistantConfig,
    pub assistant_enabled: bool,
    pub process: ProcessSettings,
}

fn default_user_agent() -> String {
    format!("issue-triage-bot/{}", env!("CARGO_PKG_VERSION"))
}

fn parse_flag(s: &str) -> bool {
    matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// Call [`load_dotenv`] first when a `.env` file should be honoured.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    /// Build a config from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut problems = Vec::new();

        let credentials = select_credentials(&get, &mut problems);

        let mut repos = Vec::new();
        match get("GITHUB_REPOS") {
            None => problems.push("GITHUB_REPOS environment variable is required".to_string()),
            Some(raw) => {
                let mut malformed = 0;
                for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
                    match entry.parse::<RepoRef>() {
                        Ok(r) => repos.push(r),
                        Err(e) => {
                            malformed += 1;
                            problems.push(e);
                        }
                    }
                }
                if repos.is_empty() && malformed == 0 {
                    problems.push("GITHUB_REPOS environment variable is required".to_string());
                }
            }
        }

        let http = http_config(&get, &mut problems);

        let git = GitConfig {
            work_dir: get("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| env::temp_dir().join("issue-triage-bot")),
            remote_base: get("GIT_REMOTE_BASE")
                .unwrap_or_else(|| "https://github.com".to_string())
                .trim_end_matches('/')
                .to_string(),
            author_name: get("GIT_AUTHOR_NAME").unwrap_or_else(|| "Issue Triage Bot".to_string()),
            author_email: get("GIT_AUTHOR_EMAIL")
                .unwrap_or_else(|| "bot@issue-triage-bot.local".to_string()),
        };

        let analysis_timeout_secs = number(&get, "ANALYSIS_TIMEOUT_SECS", 180, &mut problems);
        let implementation_timeout_secs = number(&get, "IMPLEMENTATION_TIMEOUT_SECS", 600, &mut problems);
        let assistant = AssistantConfig {
            command: get("ASSISTANT_COMMAND").unwrap_or_else(|| "copilot".to_string()),
            args: get("ASSISTANT_ARGS")
                .map(|a| a.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            instructions_file: get("ASSISTANT_INSTRUCTIONS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("assistant-instructions.md")),
            instructions_dir: get("ASSISTANT_INSTRUCTIONS_DIR").map(PathBuf::from),
            analysis_timeout_secs,
            implementation_timeout_secs,
        };
        let assistant_enabled = !get("DISABLE_ASSISTANT").as_deref().is_some_and(parse_flag);

        let process = ProcessSettings {
            processed_label: get("BOT_PROCESSED_LABEL")
                .unwrap_or_else(|| DEFAULT_PROCESSED_LABEL.to_string()),
            needs_info_label: get("NEEDS_INFO_LABEL")
                .unwrap_or_else(|| DEFAULT_NEEDS_INFO_LABEL.to_string()),
            base_branch: get("BASE_BRANCH").unwrap_or_else(|| "main".to_string()),
            issue_delay_secs: number(&get, "ISSUE_DELAY_SECS", 5, &mut problems),
        };

        match credentials {
            Some(credentials) if problems.is_empty() => Ok(Self {
                repos,
                credentials,
                http,
                git,
                assistant,
                assistant_enabled,
                process,
            }),
            _ => Err(ConfigError { problems }),
        }
    }
}

fn number<G>(get: &G, key: &str, default: u64, problems: &mut Vec<String>) -> u64
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => default,
        Some(raw) => raw.parse::<u64>().unwrap_or_else(|_| {
            problems.push(format!("{key} must be a non-negative integer, got {raw:?}"));
            default
        }),
    }
}

fn http_config<G>(get: &G, problems: &mut Vec<String>) -> HttpConfig
where
    G: Fn(&str) -> Option<String>,
{
    let api_url = get("GITHUB_API_URL")
        .unwrap_or_else(|| "https://api.github.com".to_string())
        .trim_end_matches('/')
        .to_string();
    let timeout_secs = number(get, "GITHUB_HTTP_TIMEOUT_SECS", 30, problems);
    let max_retries = number(get, "GITHUB_HTTP_MAX_RETRIES", 0, problems);
    HttpConfig {
        api_url,
        api_version: get("GITHUB_API_VERSION").unwrap_or_else(|| "2022-11-28".to_string()),
        user_agent: get("GITHUB_USER_AGENT").unwrap_or_else(default_user_agent),
        timeout_secs,
        max_retries: u32::try_from(max_retries).unwrap_or(u32::MAX),
    }
}

fn env_lookup(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl HttpConfig {
    /// Only the HTTP settings; used by commands that do not need a full [`Config`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut problems = Vec::new();
        let cfg = http_config(&env_lookup, &mut problems);
        if problems.is_empty() {
            Ok(cfg)
        } else {
            Err(ConfigError { problems })
        }
    }
}

impl AppCredentials {
    /// App id and key from the environment, for calls that precede choosing an installation.
    pub fn from_env_without_installation() -> Result<Self, ConfigError> {
        let mut problems = Vec::new();
        let app_id = match env_lookup("GITHUB_APP_ID") {
            Some(raw) => parse_id("GITHUB_APP_ID", &raw, &mut problems),
            None => {
                problems.push("GITHUB_APP_ID must be set".to_string());
                0
            }
        };
        let private_key_path = match env_lookup("GITHUB_APP_PRIVATE_KEY_PATH") {
            Some(p) => PathBuf::from(p),
            None => {
                problems.push("GITHUB_APP_PRIVATE_KEY_PATH must be set".to_string());
                PathBuf::new()
            }
        };
        if !private_key_path.as_os_str().is_empty() && !private_key_path.exists() {
            problems.push(format!(
                "GitHub App private key file not found: {}",
                private_key_path.display()
            ));
        }
        if !problems.is_empty() {
            return Err(ConfigError { problems });
        }
        Ok(Self {
            app_id,
            private_key_path,
            installation_id: 0,
        })
    }
}

// App credentials win when the full triple is present; otherwise fall back to a token.
fn select_credentials<G>(get: &G, problems: &mut Vec<String>) -> Option<Credentials>
where
    G: Fn(&str) -> Option<String>,
{
    let app_id = get("GITHUB_APP_ID");
    let key_path = get("GITHUB_APP_PRIVATE_KEY_PATH");
    let installation_id = get("GITHUB_APP_INSTALLATION_ID");
    let token = get("GITHUB_TOKEN").or_else(|| get("GH_TOKEN"));

    if let (Some(app_id), Some(key_path), Some(installation_id)) =
        (&app_id, &key_path, &installation_id)
    {
        let before = problems.len();
        let app_id = parse_id("GITHUB_APP_ID", app_id, problems);
        let installation_id = parse_id("GITHUB_APP_INSTALLATION_ID", installation_id, problems);
        let private_key_path = PathBuf::from(key_path);
        if !Path::new(&private_key_path).exists() {
            problems.push(format!(
                "GitHub App private key file not found: {}",
                private_key_path.display()
            ));
        }
        if problems.len() > before {
            return None;
        }
        return Some(Credentials::App(AppCredentials {
            app_id,
            private_key_path,
            installation_id,
        }));
    }

    let partial_app = app_id.is_some() || key_path.is_some() || installation_id.is_some();
    match token {
        Some(token) => {
            if partial_app {
                warn!("Incomplete GitHub App credentials; falling back to GITHUB_TOKEN");
            }
            Some(Credentials::Token(token))
        }
        None => {
            problems.push(
                "No GitHub authentication found. Please set either GITHUB_TOKEN or GitHub App \
                 credentials (GITHUB_APP_ID, GITHUB_APP_PRIVATE_KEY_PATH, GITHUB_APP_INSTALLATION_ID)"
                    .to_string(),
            );
            None
        }
    }
}

fn parse_id(key: &str, raw: &str, problems: &mut Vec<String>) -> u64 {
    raw.parse::<u64>().unwrap_or_else(|_| {
        problems.push(format!("{key} must be numeric, got {raw:?}"));
        0
    })
}

/// Load a `.env` file into the process environment. Existing variables win.
///
/// With no explicit path, `./.env` is used when present.
pub fn load_dotenv(path: Option<&Path>) -> Result<Option<PathBuf>, dotenvy::Error> {
    match path {
        Some(p) => dotenvy::from_path(p).map(|_| Some(p.to_path_buf())),
        None => match dotenvy::dotenv() {
            Ok(p) => Ok(Some(p)),
            Err(e) if e.not_found() => Ok(None),
            Err(e) => Err(e),
        },
    }
}
