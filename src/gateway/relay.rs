//! Relay client delivering outcomes to the host listener.
//!
//! One retry loop serves both reliability modes; the mode only decides
//! whether a response counts as delivered.

use super::mode::{AckRejection, ReliabilityMode};
use crate::config::GatewaySettings;
use crate::types::{RelayMessage, SECRET_HEADER};
use std::time::Duration;

/// Retry schedule for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Wait after the first failed attempt; doubles after each further failure
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    /// Wait before retry number `retry` (0-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        self.initial_backoff.saturating_mul(1u32 << retry.min(16))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
        }
    }
}

/// Relay client configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Host listener address
    pub host: String,
    pub port: u16,
    /// Event path on the host
    pub path: String,
    /// Shared secret, sent as `X-Matrix-Secret` when set
    pub secret: Option<String>,
    /// Per-attempt timeout
    pub attempt_timeout: Duration,
    pub retry: RetryPolicy,
}

impl RelayConfig {
    /// Create a configuration with default path, timeout and retry schedule.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            path: "/event".to_string(),
            secret: None,
            attempt_timeout: Duration::from_millis(1_200),
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_settings(settings: &GatewaySettings) -> Self {
        Self {
            host: settings.relay_host.clone(),
            port: settings.relay_port,
            path: settings.relay_path.clone(),
            secret: settings.secret.clone(),
            attempt_timeout: settings.attempt_timeout,
            retry: RetryPolicy {
                max_attempts: settings.max_attempts,
                initial_backoff: settings.initial_backoff,
            },
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Get the base URL of the host listener.
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Get the event endpoint URL.
    pub fn event_url(&self) -> String {
        if self.path.starts_with('/') {
            format!("{}{}", self.url(), self.path)
        } else {
            format!("{}/{}", self.url(), self.path)
        }
    }

    /// Get the health check endpoint URL.
    pub fn health_url(&self) -> String {
        format!("{}/health", self.url())
    }
}

/// Relay error types.
#[derive(Debug)]
pub enum RelayError {
    /// Connect failure, timeout or unreadable response
    Network(String),
    /// The host answered but the response did not count as delivered
    Rejected(AckRejection),
    /// Every attempt failed; carries the last failure
    Exhausted { attempts: u32, last: Box<RelayError> },
    /// The outcome never reached the relay worker
    QueueFull,
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayError::Network(msg) => write!(f, "Relay network error: {msg}"),
            RelayError::Rejected(reason) => write!(f, "Relay rejected: {reason}"),
            RelayError::Exhausted { attempts, last } => {
                write!(f, "Delivery failed after {attempts} attempts: {last}")
            }
            RelayError::QueueFull => write!(f, "Relay queue full"),
        }
    }
}

impl std::error::Error for RelayError {}

/// Result of a successful delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub seq: u32,
    /// Attempts used, 1-based
    pub attempts: u32,
    pub status: u16,
}

/// HTTP relay client.
pub struct RelayClient {
    config: RelayConfig,
    client: reqwest::Client,
}

impl RelayClient {
    /// Create a new relay client.
    pub fn new(config: RelayConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.attempt_timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self { config, client }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Test connection to the host listener.
    pub async fn test_connection(&self) -> Result<bool, RelayError> {
        let response = self
            .client
            .get(self.config.health_url())
            .send()
            .await
            .map_err(|e| RelayError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }

    /// Deliver one message, retrying with exponential backoff.
    ///
    /// The message is never re-queued: after the last failed attempt the
    /// error is returned and the caller moves on.
    pub async fn deliver(
        &self,
        message: &RelayMessage,
        mode: ReliabilityMode,
    ) -> Result<DeliveryReport, RelayError> {
        let policy = self.config.retry;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let last = match self.attempt(message, mode).await {
                Ok(status) => {
                    tracing::debug!(seq = message.seq, attempt, status, "relay delivered");
                    return Ok(DeliveryReport {
                        seq: message.seq,
                        attempts: attempt,
                        status,
                    });
                }
                Err(e) => e,
            };

            tracing::warn!(seq = message.seq, attempt, %mode, "relay attempt failed: {last}");

            if attempt >= policy.max_attempts {
                return Err(RelayError::Exhausted {
                    attempts: attempt,
                    last: Box::new(last),
                });
            }
            tokio::time::sleep(policy.backoff(attempt - 1)).await;
        }
    }

    async fn attempt(&self, message: &RelayMessage, mode: ReliabilityMode) -> Result<u16, RelayError> {
        let mut request = self
            .client
            .post(self.config.event_url())
            .header("Content-Type", "application/json")
            .json(message);
        if let Some(secret) = &self.config.secret {
            request = request.header(SECRET_HEADER, secret);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RelayError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| RelayError::Network(e.to_string()))?;

        mode.check_response(status, &body, message.seq)
            .map_err(RelayError::Rejected)?;
        Ok(status)
    }
}
