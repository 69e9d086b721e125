//! Blocking HTTP client for the remote classifier with bounded retry.
//!
//! Retry discipline: connect errors, timeouts, and 5xx responses are
//! transient and retried with exponential backoff plus jitter up to the
//! configured attempt ceiling. 4xx responses are permanent failures of the
//! request itself and are never retried. The client owns nothing but the
//! connection pool; it never mutates shared state.

#![allow(missing_docs)]

use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::client::response::TimedResponse;
use crate::core::errors::{HarnessError, Result};

/// Client tuning: endpoint, timeout, and retry/backoff policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Classifier base URL, e.g. `http://127.0.0.1:8080`.
    pub base_url: String,
    /// Whole-request timeout per attempt.
    pub timeout_ms: u64,
    /// Total attempt ceiling, including the first try.
    pub max_attempts: u32,
    /// Backoff for the first retry; doubles per attempt.
    pub backoff_base_ms: u64,
    /// Upper bound on any single backoff delay.
    pub backoff_cap_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            timeout_ms: 10_000,
            max_attempts: 4,
            backoff_base_ms: 250,
            backoff_cap_ms: 5_000,
        }
    }
}

/// How one attempt resolved, before retry policy is applied.
#[derive(Debug)]
enum Attempt {
    Success(TimedResponse),
    Transient(String),
    Permanent { status: u16, details: String },
    /// 2xx status but a body that is not JSON: a contract violation.
    Contract(String),
}

/// Blocking classifier client.
pub struct ClassifierClient {
    config: ClientConfig,
    http: reqwest::blocking::Client,
}

impl ClassifierClient {
    /// Build a client from config. Fails only if the HTTP stack cannot
    /// be constructed.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|error| HarnessError::Runtime {
                details: format!("failed to build HTTP client: {error}"),
            })?;
        Ok(Self { config, http })
    }

    /// Classify one message, retrying transient failures.
    pub fn analyze(&self, message: &str) -> Result<TimedResponse> {
        self.analyze_with_timeout(message, None)
    }

    /// Classify one message with a per-call timeout override.
    pub fn analyze_with_timeout(
        &self,
        message: &str,
        timeout: Option<Duration>,
    ) -> Result<TimedResponse> {
        if message.trim().is_empty() {
            return Err(HarnessError::PermanentRequest {
                status: 0,
                details: "message text must be non-empty".to_string(),
            });
        }

        let url = join_url(&self.config.base_url, "v1/analyze");
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_transient = String::new();

        for attempt in 1..=max_attempts {
            match self.one_attempt(&url, message, timeout) {
                Attempt::Success(response) => return Ok(response),
                Attempt::Permanent { status, details } => {
                    return Err(HarnessError::PermanentRequest { status, details });
                }
                Attempt::Contract(details) => {
                    return Err(HarnessError::ShapeViolation { details });
                }
                Attempt::Transient(details) => {
                    last_transient = details;
                    if attempt < max_attempts {
                        std::thread::sleep(backoff_delay(
                            attempt,
                            self.config.backoff_base_ms,
                            self.config.backoff_cap_ms,
                        ));
                    }
                }
            }
        }

        Err(HarnessError::Transport {
            details: last_transient,
            attempts: max_attempts,
        })
    }

    /// Classify a sequence of messages, one result per message.
    pub fn analyze_batch(&self, messages: &[String]) -> Vec<Result<TimedResponse>> {
        messages
            .iter()
            .map(|message| self.analyze(message))
            .collect()
    }

    /// Whether the classifier answers its health endpoint.
    #[must_use]
    pub fn health(&self) -> bool {
        let url = join_url(&self.config.base_url, "health");
        self.http
            .get(url)
            .send()
            .is_ok_and(|resp| resp.status().is_success())
    }

    fn one_attempt(&self, url: &str, message: &str, timeout: Option<Duration>) -> Attempt {
        let mut request = self.http.post(url).json(&json!({ "message": message }));
        if let Some(t) = timeout {
            request = request.timeout(t);
        }

        let started = Instant::now();
        let response = match request.send() {
            Ok(response) => response,
            // Connect errors, timeouts, and protocol failures all surface
            // here; every send-side failure is treated as transient.
            Err(error) => return Attempt::Transient(error.to_string()),
        };

        let status = response.status();
        if status.is_success() {
            let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            return match response.json::<serde_json::Value>() {
                Ok(body) => Attempt::Success(TimedResponse { body, latency_ms }),
                Err(error) => {
                    Attempt::Contract(format!("response body is not JSON: {error}"))
                }
            };
        }

        let details = body_snippet(response);
        if status.is_client_error() {
            Attempt::Permanent {
                status: status.as_u16(),
                details,
            }
        } else {
            Attempt::Transient(format!("status {status}: {details}"))
        }
    }
}

/// Exponential backoff with jitter: `base * 2^(attempt-1)` capped at `cap`,
/// plus up to half that again of random jitter to avoid thundering herds.
fn backoff_delay(attempt: u32, base_ms: u64, cap_ms: u64) -> Duration {
    let exp = base_ms.saturating_mul(1_u64 << attempt.saturating_sub(1).min(20));
    let capped = exp.min(cap_ms);
    let jitter = rand::rng().random_range(0..=capped / 2);
    Duration::from_millis(capped + jitter)
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{path}", base.trim_end_matches('/'))
}

fn body_snippet(response: reqwest::blocking::Response) -> String {
    const MAX_SNIPPET: usize = 200;
    match response.text() {
        Ok(text) => {
            let mut snippet: String = text.chars().take(MAX_SNIPPET).collect();
            if text.chars().count() > MAX_SNIPPET {
                snippet.push('…');
            }
            snippet
        }
        Err(_) => "<unreadable body>".to_string(),
    }
}
