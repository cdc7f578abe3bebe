//! HTTP fetch utilities, relational row store and cache writer for Shelfsync.

pub mod cache;
pub mod store;
pub mod upsert;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info_span, Instrument};

pub use cache::{CacheError, CacheKey, CacheWriter, RedisCache};
pub use store::{redact_database_url, PgRowStore, RowStore, StoreError};
pub use upsert::{build_upsert, UpsertStatement};

pub const CRATE_NAME: &str = "shelf-storage";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            global_concurrency: 8,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Credential attached to an upstream request.
#[derive(Clone, PartialEq, Eq)]
pub enum HttpAuth {
    None,
    /// POS style: API key as the basic-auth username, empty password.
    Basic { username: String },
    Bearer(String),
}

impl std::fmt::Debug for HttpAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpAuth::None => f.write_str("None"),
            HttpAuth::Basic { .. } => f.write_str("Basic(<redacted>)"),
            HttpAuth::Bearer(_) => f.write_str("Bearer(<redacted>)"),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("decoding response from {url}: {message}")]
    Decode { url: String, message: String },
    #[error("upstream rejected the request: {0}")]
    Upstream(String),
    #[error("http client is shutting down")]
    Closed,
}

impl FetchError {
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, FetchError::HttpStatus { status: 401 | 403, .. })
    }
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    backoff: BackoffPolicy,
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    /// Empty bodies decode as JSON null so callers can treat them as "no records".
    pub fn json(&self) -> Result<JsonValue, FetchError> {
        decode_json_body(&self.final_url, &self.body)
    }
}

fn decode_json_body(url: &str, body: &[u8]) -> Result<JsonValue, FetchError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(JsonValue::Null);
    }
    serde_json::from_slice(body).map_err(|e| FetchError::Decode {
        url: url.to_string(),
        message: e.to_string(),
    })
}

fn apply_auth(builder: RequestBuilder, auth: &HttpAuth) -> RequestBuilder {
    match auth {
        HttpAuth::None => builder,
        HttpAuth::Basic { username } => builder.basic_auth(username, Some("")),
        HttpAuth::Bearer(token) => builder.bearer_auth(token),
    }
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            backoff: config.backoff,
        })
    }

    pub async fn get_json(&self, url: &str, auth: &HttpAuth) -> Result<JsonValue, FetchError> {
        let span = info_span!("http_get", url);
        self.send_with_retry(url, || apply_auth(self.client.get(url), auth))
            .instrument(span)
            .await?
            .json()
    }

    pub async fn post_json(
        &self,
        url: &str,
        auth: &HttpAuth,
        body: &JsonValue,
    ) -> Result<JsonValue, FetchError> {
        let span = info_span!("http_post", url);
        self.send_with_retry(url, || apply_auth(self.client.post(url).json(body), auth))
            .instrument(span)
            .await?
            .json()
    }

    pub async fn put_json(
        &self,
        url: &str,
        auth: &HttpAuth,
        body: &JsonValue,
    ) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_put", url);
        self.send_with_retry(url, || apply_auth(self.client.put(url).json(body), auth))
            .instrument(span)
            .await
    }

    async fn send_with_retry<F>(&self, url: &str, build: F) -> Result<FetchedResponse, FetchError>
    where
        F: Fn() -> RequestBuilder,
    {
        let _permit = self
            .global_limit
            .acquire()
            .await
            .map_err(|_| FetchError::Closed)?;

        let mut last_request_error: Option<reqwest::Error> = None;

        for attempt in 0..=self.backoff.max_retries {
            match build().send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        let body = resp.bytes().await?.to_vec();
                        return Ok(FetchedResponse {
                            status,
                            final_url,
                            body,
                        });
                    }

                    let disposition = classify_status(status);
                    if disposition == RetryDisposition::Retryable && attempt < self.backoff.max_retries
                    {
                        debug!(%status, attempt, "retrying upstream request");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    let disposition = classify_reqwest_error(&err);
                    if disposition == RetryDisposition::Retryable && attempt < self.backoff.max_retries
                    {
                        debug!(error = %err, attempt, url, "retrying upstream request");
                        last_request_error = Some(err);
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }

        match last_request_error {
            Some(err) => Err(FetchError::Request(err)),
            None => Err(FetchError::Upstream(format!("retries exhausted for {url}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_backoff_doubles_until_the_five_second_ceiling() {
        let policy = BackoffPolicy::default();
        let delays: Vec<u64> = (0..7)
            .map(|attempt| policy.delay_for_attempt(attempt).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![250, 500, 1_000, 2_000, 4_000, 5_000, 5_000]);
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(5));
    }

    #[test]
    fn only_server_errors_and_throttling_retry() {
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED),
            RetryDisposition::NonRetryable
        );
    }

    #[test]
    fn empty_body_decodes_as_null() {
        assert_eq!(decode_json_body("http://pos", b"").expect("empty"), JsonValue::Null);
        assert_eq!(decode_json_body("http://pos", b" \n").expect("blank"), JsonValue::Null);
        assert!(decode_json_body("http://pos", b"[1,").is_err());
    }

    #[test]
    fn auth_failures_are_recognised() {
        let err = FetchError::HttpStatus {
            status: 401,
            url: "http://pos/reporting/inventory".into(),
        };
        assert!(err.is_auth_failure());
        assert!(!FetchError::Upstream("boom".into()).is_auth_failure());
    }

    #[test]
    fn auth_debug_hides_credentials() {
        let rendered = format!("{:?}", HttpAuth::Basic { username: "k-123".into() });
        assert!(!rendered.contains("k-123"));
    }
}
