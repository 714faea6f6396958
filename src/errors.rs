//! Error taxonomy and retry helpers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Errors produced by the engine and its collaborators
#[derive(Debug, Error)]
pub enum EngineError {
    /// Transient failure (network hiccup, service briefly unavailable) - retryable
    #[error("temporary failure: {0}")]
    Temporary(String),

    /// Failure that will not go away on its own (bad input, bad state) - never retried
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// A referenced resource does not exist
    #[error("resource not found: {0}")]
    NotFound(String),

    /// The engine or a component is misconfigured
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Error reported by an external API; temporariness is inferred from the status code
    #[error("API error from {service:?} ({status_code:?}): {message}")]
    Api {
        message: String,
        status_code: Option<u16>,
        service: Option<String>,
    },

    /// A pipeline run ended in the failed state
    #[error("pipeline '{pipeline}' failed: {message}")]
    Pipeline { pipeline: String, message: String },
}

impl EngineError {
    /// Whether retrying this error could plausibly succeed.
    ///
    /// API errors follow HTTP conventions: 4xx (except 429) are permanent,
    /// 429 and 5xx are temporary, and an unknown status is assumed temporary.
    pub fn is_temporary(&self) -> bool {
        match self {
            EngineError::Temporary(_) => true,
            EngineError::Permanent(_)
            | EngineError::NotFound(_)
            | EngineError::Configuration(_)
            | EngineError::Pipeline { .. } => false,
            EngineError::Api { status_code, .. } => match status_code {
                Some(429) => true,
                Some(code) if (400..500).contains(code) => false,
                Some(code) if *code >= 500 => true,
                _ => true,
            },
        }
    }

    pub fn should_retry(&self) -> bool {
        self.is_temporary()
    }

    /// Short tag used in error reports
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Temporary(_) => "temporary",
            EngineError::Permanent(_) => "permanent",
            EngineError::NotFound(_) => "not_found",
            EngineError::Configuration(_) => "configuration",
            EngineError::Api { .. } => "api",
            EngineError::Pipeline { .. } => "pipeline",
        }
    }
}

/// Which errors a retry policy applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryCondition {
    /// Retry errors classified temporary
    #[default]
    TemporaryOnly,

    /// Retry any error
    Always,

    /// Never retry
    Never,
}

/// Settings for [`with_retry`]
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failure
    pub backoff_factor: f64,
    /// Proportional jitter (0.1 = up to ±10% of the current delay)
    pub jitter: f64,
    /// Which errors to retry
    pub retry_on: RetryCondition,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            jitter: 0.1,
            retry_on: RetryCondition::TemporaryOnly,
        }
    }
}

impl RetryPolicy {
    pub fn with_condition(mut self, condition: RetryCondition) -> Self {
        self.retry_on = condition;
        self
    }

    fn retryable(&self, error: &EngineError) -> bool {
        match self.retry_on {
            RetryCondition::TemporaryOnly => error.is_temporary(),
            RetryCondition::Always => true,
            RetryCondition::Never => false,
        }
    }

    fn delay_for(&self, delay: Duration) -> Duration {
        let jitter_range = self.jitter * delay.as_secs_f64();
        let jitter = jitter_range * (2.0 * (0.5 - rand::random::<f64>()));
        let with_jitter = (delay.as_secs_f64() + jitter).max(0.0);
        Duration::from_secs_f64(with_jitter.min(self.max_delay.as_secs_f64()))
    }
}

/// Run an async operation with retries for temporary errors.
///
/// Only errors classified temporary by [`EngineError::is_temporary`] are
/// retried. On exhaustion the last error is wrapped with the attempt count.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, EngineError>>,
{
    let mut attempt = 0u32;
    let mut delay = policy.base_delay;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !policy.retryable(&err) || attempt >= policy.max_attempts {
                    if attempt > 1 {
                        return Err(EngineError::Permanent(format!(
                            "failed after {} attempts: {}",
                            attempt, err
                        )));
                    }
                    return Err(err);
                }

                let actual = policy.delay_for(delay);
                warn!(
                    "retry {}/{} after {:.2}s due to {}: {}",
                    attempt,
                    policy.max_attempts,
                    actual.as_secs_f64(),
                    err.kind(),
                    err
                );
                tokio::time::sleep(actual).await;

                let next = delay.as_secs_f64() * policy.backoff_factor;
                delay = Duration::from_secs_f64(next.min(policy.max_delay.as_secs_f64()));
            }
        }
    }
}

/// Structured error report for logging and telemetry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub timestamp: DateTime<Utc>,
    pub error_type: String,
    pub error_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub context: HashMap<String, serde_json::Value>,
}

impl ErrorReport {
    pub fn new(error: &EngineError) -> Self {
        let (status_code, service) = match error {
            EngineError::Api {
                status_code,
                service,
                ..
            } => (*status_code, service.clone()),
            _ => (None, None),
        };

        Self {
            timestamp: Utc::now(),
            error_type: error.kind().to_string(),
            error_message: error.to_string(),
            status_code,
            service,
            context: HashMap::new(),
        }
    }

    pub fn with_context(mut self, key: &str, value: serde_json::Value) -> Self {
        self.context.insert(key.to_string(), value);
        self
    }
}

/// Log an error at a severity matching its classification and return the report
pub fn log_error(error: &EngineError, context: HashMap<String, serde_json::Value>) -> ErrorReport {
    let mut report = ErrorReport::new(error);
    report.context = context;

    if error.is_temporary() {
        warn!("{}: {}", report.error_type, report.error_message);
    } else {
        tracing::error!("{}: {}", report.error_type, report.error_message);
    }

    report
}
