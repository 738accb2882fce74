use std::time::Duration;

use log::{debug, warn};
use reqwest::header::HeaderMap;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::auth::Token;
use crate::error::{ReconError, Result, SourceControlError};

const USER_AGENT: &str = concat!("release-recon/", env!("CARGO_PKG_VERSION"));

/// How often a request is retried on 429, 5xx and transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    #[cfg(test)]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            delay: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Auth {
    Anonymous,
    Bearer(Token),
    Basic { username: String, password: Token },
}

impl Auth {
    pub fn bearer(token: Option<Token>) -> Self {
        token.map_or(Self::Anonymous, Self::Bearer)
    }
}

/// Why a request did not produce a decoded body. Each platform maps this onto
/// its own error taxonomy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HttpFailure {
    Status { status: u16, body: String },
    Transport(String),
    Decode(String),
}

impl HttpFailure {
    pub fn into_source_control(
        self,
        not_found: impl FnOnce() -> SourceControlError,
    ) -> SourceControlError {
        match self {
            Self::Status { status: 401, body } => SourceControlError::Unauthorized(body),
            Self::Status { status: 404, .. } => not_found(),
            Self::Status { status: 429, body } => SourceControlError::RateLimitExceeded(body),
            Self::Status { status, body } => {
                SourceControlError::ApiError(format!("HTTP {status}: {body}"))
            }
            Self::Transport(message) => SourceControlError::NetworkError(message),
            Self::Decode(message) => SourceControlError::InvalidResponse(message),
        }
    }
}

/// Authenticated JSON-over-HTTP client shared by the platform adapters.
pub(crate) struct RestClient {
    client: Client,
    auth: Auth,
    retry: RetryPolicy,
}

impl RestClient {
    pub fn new(auth: Auth, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ReconError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            auth,
            retry,
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Auth::Anonymous => request,
            Auth::Bearer(token) => request.bearer_auth(token.as_str()),
            Auth::Basic { username, password } => {
                request.basic_auth(username, Some(password.as_str()))
            }
        }
    }

    /// GET `url` and decode the JSON body, retrying on rate limits, server
    /// errors and connection failures.
    pub async fn get_json<T>(&self, url: Url) -> std::result::Result<(T, HeaderMap), HttpFailure>
    where
        T: DeserializeOwned,
    {
        let mut retry_count = 0;
        loop {
            debug!("GET {url}");
            let request = self.authorize(self.client.get(url.clone()));

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || e.is_timeout() => {
                    if retry_count >= self.retry.max_retries {
                        return Err(HttpFailure::Transport(e.to_string()));
                    }
                    warn!(
                        "Network error ({e}), retrying in {:?} ({}/{})...",
                        self.retry.delay,
                        retry_count + 1,
                        self.retry.max_retries
                    );
                    tokio::time::sleep(self.retry.delay).await;
                    retry_count += 1;
                    continue;
                }
                Err(e) => return Err(HttpFailure::Transport(e.to_string())),
            };

            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                if retry_count < self.retry.max_retries {
                    warn!(
                        "API error (status {status}). Waiting {:?} before retry {}/{}...",
                        self.retry.delay,
                        retry_count + 1,
                        self.retry.max_retries
                    );
                    tokio::time::sleep(self.retry.delay).await;
                    retry_count += 1;
                    continue;
                }
            }

            if !status.is_success() {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unable to read error response".to_string());
                return Err(HttpFailure::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            let headers = response.headers().clone();
            let text = response
                .text()
                .await
                .map_err(|e| HttpFailure::Transport(e.to_string()))?;
            let body = serde_json::from_str(&text)
                .map_err(|e| HttpFailure::Decode(format!("{e} while decoding {url}")))?;

            return Ok((body, headers));
        }
    }
}

/// Joins `path` onto `base` and appends query pairs.
pub(crate) fn build_url(base: &Url, path: &str, query: &[(&str, &str)]) -> Result<Url> {
    let mut url = base
        .join(path)
        .map_err(|e| ReconError::Config(format!("Invalid URL {base}{path}: {e}")))?;
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query.iter().copied());
    }
    Ok(url)
}

/// Parses a base URL and guarantees a trailing slash so `join` appends rather than replaces.
pub(crate) fn parse_base_url(base_url: &str) -> Result<Url> {
    let normalized = if base_url.ends_with('/') {
        base_url.to_owned()
    } else {
        format!("{base_url}/")
    };
    Url::parse(&normalized).map_err(|e| ReconError::Config(format!("Invalid base URL: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let not_found = || SourceControlError::ProjectNotFound("group/app".into());
        let status = |status: u16| HttpFailure::Status {
            status,
            body: "body".into(),
        };

        assert_eq!(
            status(401).into_source_control(not_found),
            SourceControlError::Unauthorized("body".into())
        );
        assert_eq!(
            status(404).into_source_control(not_found),
            SourceControlError::ProjectNotFound("group/app".into())
        );
        assert_eq!(status(429).into_source_control(not_found).code(), "SourceControl.RateLimitExceeded");
        assert_eq!(
            status(500).into_source_control(not_found),
            SourceControlError::ApiError("HTTP 500: body".into())
        );
        assert_eq!(
            HttpFailure::Transport("refused".into()).into_source_control(not_found),
            SourceControlError::NetworkError("refused".into())
        );
        assert_eq!(
            HttpFailure::Decode("eof".into()).into_source_control(not_found).code(),
            "SourceControl.InvalidResponse"
        );
    }

    #[test]
    fn test_build_url_appends_path_and_query() {
        let base = parse_base_url("https://gitlab.example.com/api/v4").unwrap();
        let url = build_url(&base, "projects/group%2Fapp/merge_requests", &[("state", "merged")])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://gitlab.example.com/api/v4/projects/group%2Fapp/merge_requests?state=merged"
        );
    }
}
