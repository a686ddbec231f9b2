use crate::config::HttpConfig;
use crate::error::Error;
use crate::types::RateMeta;
use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, LINK, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
    pub retriable: bool,
}

#[derive(Debug, Clone)]
pub struct RestResponse<T> {
    pub value: Option<T>,
    pub rate: Option<RateMeta>,
    pub error: Option<ErrorInfo>,
    pub status: StatusCode,
    pub headers: Option<HeaderMap>,
}

impl<T> RestResponse<T> {
    fn failed(status: StatusCode, rate: Option<RateMeta>, headers: Option<HeaderMap>, error: ErrorInfo) -> Self {
        Self {
            value: None,
            rate,
            error: Some(error),
            status,
            headers,
        }
    }

    /// Collapse into a `Result`, turning a mapped error into [`Error::Api`].
    pub fn into_result(self) -> Result<T, Error> {
        match (self.value, self.error) {
            (Some(v), None) => Ok(v),
            (_, Some(e)) => Err(Error::Api {
                status: self.status.as_u16(),
                code: e.code,
                message: e.message,
            }),
            (None, None) => Err(Error::Api {
                status: self.status.as_u16(),
                code: "server_error".into(),
                message: "empty response".into(),
            }),
        }
    }

    pub fn next_page(&self) -> Option<String> {
        self.headers.as_ref().and_then(next_page_from_link)
    }
}

pub fn build_client(cfg: &HttpConfig) -> reqwest::Result<Client> {
    let mut default_headers = HeaderMap::new();
    if let Ok(ua) = HeaderValue::from_str(&cfg.user_agent) {
        default_headers.insert(USER_AGENT, ua);
    }
    // Authorization is injected per request; installation tokens rotate during a run.
    Client::builder()
        .default_headers(default_headers)
        .timeout(Duration::from_secs(cfg.timeout_secs))
        .use_rustls_tls()
        .build()
}

fn auth_header(token: &str) -> Option<HeaderValue> {
    let mut v = HeaderValue::from_str(&format!("Bearer {}", token)).ok()?;
    v.set_sensitive(true);
    Some(v)
}

pub fn map_status_to_error(status: StatusCode, message: String) -> ErrorInfo {
    let (code, retriable) = match status {
        StatusCode::BAD_REQUEST => ("bad_request", false),
        StatusCode::UNAUTHORIZED => ("unauthorized", false),
        StatusCode::FORBIDDEN => ("forbidden", false),
        StatusCode::NOT_FOUND => ("not_found", false),
        StatusCode::CONFLICT => ("conflict", false),
        StatusCode::UNPROCESSABLE_ENTITY => ("unprocessable", false),
        StatusCode::TOO_MANY_REQUESTS => ("rate_limited", true),
        s if s.is_server_error() => ("upstream_error", true),
        _ => ("server_error", false),
    };
    ErrorInfo {
        code: code.to_string(),
        message,
        retriable,
    }
}

pub fn extract_rate_from_rest(headers: &HeaderMap) -> RateMeta {
    let header_num = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<i64>().ok())
    };
    RateMeta {
        remaining: header_num("x-ratelimit-remaining").and_then(|n| i32::try_from(n).ok()),
        used: header_num("x-ratelimit-used").and_then(|n| i32::try_from(n).ok()),
        reset_at: header_num("x-ratelimit-reset")
            .and_then(|epoch| chrono::DateTime::<chrono::Utc>::from_timestamp(epoch, 0))
            .map(|t| t.to_rfc3339()),
    }
}

/// Absolute URL of the `rel="next"` entry in a `Link` header.
pub fn next_page_from_link(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|p| p.trim() == "rel=\"next\"");
        if !is_next {
            return None;
        }
        let url = target.strip_prefix('<')?.strip_suffix('>')?;
        url::Url::parse(url).ok().map(|u| u.to_string())
    })
}

fn compute_backoff(attempt: u32, retry_after: Option<Duration>) -> Duration {
    if let Some(d) = retry_after {
        return d;
    }
    // Exponential backoff with jitter: base 200ms * 2^attempt, max 5s.
    let base = 200u64.saturating_mul(1u64 << attempt.min(5));
    let max = 5_000u64.min(base);
    let jitter = fastrand::u64(0..=max / 2);
    Duration::from_millis(max / 2 + jitter)
}

fn resolve_url(cfg: &HttpConfig, path_or_url: &str) -> String {
    if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
        path_or_url.to_string()
    } else {
        format!("{}{}", cfg.api_url, path_or_url)
    }
}

/// Send one REST request and decode a JSON body.
///
/// `path` may be relative to the API root or an absolute pagination URL.
/// Retries on 429/5xx and transport errors only when `max_retries > 0`.
pub async fn rest_json<B, T>(
    client: &Client,
    cfg: &HttpConfig,
    token: &str,
    method: Method,
    path: &str,
    body: Option<&B>,
) -> RestResponse<T>
where
    B: Serialize + ?Sized,
    T: DeserializeOwned,
{
    let url = resolve_url(cfg, path);
    let mut attempt: u32 = 0;
    loop {
        let mut req = client
            .request(method.clone(), &url)
            .header("X-GitHub-Api-Version", &cfg.api_version)
            .header(
                ACCEPT,
                HeaderValue::from_static("application/vnd.github+json"),
            );
        if let Some(h) = auth_header(token) {
            req = req.header(AUTHORIZATION, h);
        }
        if let Some(b) = body {
            req = req.json(b);
        }
        debug!("REST {} {}", method, url);

        let res = match req.send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("REST {} error sending request: {}", method, e);
                if attempt < cfg.max_retries {
                    tokio::time::sleep(compute_backoff(attempt, None)).await;
                    attempt += 1;
                    continue;
                }
                return RestResponse::failed(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    None,
                    None,
                    ErrorInfo {
                        code: "upstream_error".into(),
                        message: e.to_string(),
                        retriable: true,
                    },
                );
            }
        };

        let status = res.status();
        let headers = res.headers().clone();
        let rate = extract_rate_from_rest(&headers);
        let retry_after = headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs);

        if status.is_success() {
            // 204 and similar carry no body; decode `null` so unit-like targets still succeed.
            let bytes = match res.bytes().await {
                Ok(b) => b,
                Err(e) => {
                    return RestResponse::failed(
                        status,
                        Some(rate),
                        Some(headers),
                        ErrorInfo {
                            code: "server_error".into(),
                            message: e.to_string(),
                            retriable: false,
                        },
                    )
                }
            };
            let parsed = if bytes.is_empty() {
                serde_json::from_slice::<T>(b"null")
            } else {
                serde_json::from_slice::<T>(&bytes)
            };
            return match parsed {
                Ok(val) => RestResponse {
                    value: Some(val),
                    rate: Some(rate),
                    error: None,
                    status,
                    headers: Some(headers),
                },
                Err(e) => RestResponse::failed(
                    status,
                    Some(rate),
                    Some(headers),
                    ErrorInfo {
                        code: "server_error".into(),
                        message: e.to_string(),
                        retriable: false,
                    },
                ),
            };
        }

        if (status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error())
            && attempt < cfg.max_retries
        {
            let backoff = compute_backoff(attempt, retry_after);
            warn!(
                "REST {} {} retrying (status {}), backoff {:?}",
                method, url, status, backoff
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
            continue;
        }
        let text = res.text().await.unwrap_or_default();
        let err = map_status_to_error(status, github_message(&text));
        return RestResponse::failed(status, Some(rate), Some(headers), err);
    }
}

pub async fn rest_get_json<T: DeserializeOwned>(
    client: &Client,
    cfg: &HttpConfig,
    token: &str,
    path: &str,
) -> RestResponse<T> {
    rest_json::<(), T>(client, cfg, token, Method::GET, path, None).await
}

pub async fn rest_post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
    client: &Client,
    cfg: &HttpConfig,
    token: &str,
    path: &str,
    body: &B,
) -> RestResponse<T> {
    rest_json(client, cfg, token, Method::POST, path, Some(body)).await
}

// GitHub error bodies look like {"message": "...", "documentation_url": "..."}.
fn github_message(text: &str) -> String {
    #[derive(Deserialize)]
    struct Body {
        message: String,
    }
    serde_json::from_str::<Body>(text)
        .map(|b| b.message)
        .unwrap_or_else(|_| text.to_string())
}

pub fn encode_path_segment(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}
