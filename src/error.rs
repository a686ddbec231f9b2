use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("authentication failed: {0}")]
    Auth(String),

    /// Non-success REST response, already mapped to a stable code.
    #[error("GitHub API {code} (HTTP {status}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("http client: {0}")]
    Http(#[from] reqwest::Error),

    #[error("`git {command}` failed: {stderr}")]
    Git { command: String, stderr: String },

    #[error("assistant: {0}")]
    Assistant(String),

    #[error("{what} timed out after {after:?}")]
    Timeout { what: String, after: Duration },

    #[error("app jwt: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn is_status(&self, code: u16) -> bool {
        matches!(self, Error::Api { status, .. } if *status == code)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
