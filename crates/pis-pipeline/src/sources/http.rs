//! HTTP client with retry and backoff
//!
//! Every upstream call goes through [`RetryingClient::get`]:
//! - network errors, timeouts and 5xx are retried with exponential backoff
//! - 429 waits for `Retry-After` (seconds) or the backoff delay
//! - 404 is a definitive "not found" (`Ok(None)`)
//! - any other 4xx fails immediately with `PipelineError::Upstream`

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::HttpSettings;
use crate::error::{PipelineError, Result};

/// User agent sent with every request
pub const USER_AGENT: &str = concat!("pis-pipeline/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per request, first try included
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Cap for backoff and `Retry-After` waits
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&HttpSettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &HttpSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
    }

    /// Delay before retrying after `attempt` (1-based) failed
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Honour a `Retry-After: <seconds>` header, capped by `max_delay`
    fn retry_after(&self, headers: &HeaderMap, attempt: u32) -> Duration {
        headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(|secs| Duration::from_secs(secs).min(self.max_delay))
            .unwrap_or_else(|| self.backoff(attempt))
    }
}

/// Successful response body with its headers
#[derive(Debug, Clone)]
pub struct Fetched {
    pub headers: HeaderMap,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct RetryingClient {
    client: Client,
    policy: RetryPolicy,
}

impl RetryingClient {
    pub fn new(settings: &HttpSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout())
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PipelineError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            policy: RetryPolicy::from_settings(settings),
        })
    }

    pub fn with_policy(client: Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// GET `url`; `Ok(None)` when the upstream answers 404
    pub async fn get(&self, url: &str) -> Result<Option<Fetched>> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let delay = match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status == StatusCode::NOT_FOUND {
                        debug!(url = %url, "Upstream returned 404");
                        return Ok(None);
                    }

                    if status.is_success() {
                        let headers = response.headers().clone();
                        match response.text().await {
                            Ok(body) => return Ok(Some(Fetched { headers, body })),
                            Err(e) => {
                                last_error = format!("failed to read body: {}", e);
                                self.policy.backoff(attempt)
                            }
                        }
                    } else if status == StatusCode::TOO_MANY_REQUESTS {
                        last_error = "HTTP 429 Too Many Requests".to_string();
                        self.policy.retry_after(response.headers(), attempt)
                    } else if status.is_server_error() {
                        last_error = format!("HTTP {}", status.as_u16());
                        self.policy.backoff(attempt)
                    } else {
                        return Err(PipelineError::Upstream {
                            url: url.to_string(),
                            status: status.as_u16(),
                        });
                    }
                }
                Err(e) => {
                    last_error = if e.is_timeout() {
                        format!("timeout: {}", e)
                    } else {
                        e.to_string()
                    };
                    self.policy.backoff(attempt)
                }
            };

            if attempt < max_attempts {
                warn!(
                    url = %url,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_error,
                    "Request failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }

        Err(PipelineError::TransientFetch {
            url: url.to_string(),
            attempts: max_attempts,
            reason: last_error,
        })
    }
}
