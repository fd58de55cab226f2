//! Retry policies with exponential backoff
//!
//! A policy is an explicit value: attempt bound, backoff shape and a predicate
//! deciding which failure classes are worth another attempt. It wraps any of
//! the executors since they all resolve to `Result<ResponseEnvelope, ApiError>`.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use rand::Rng;

use crate::api::envelope::ResponseEnvelope;
use crate::api::error::ApiError;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    /// Three attempts, 250ms then 500ms, never more than 20s
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(20),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// One retry after a long pause; for jobs sharing an instance with people
    pub fn conservative() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(15),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Many quick retries; for bulk fan-out against an instance that throttles
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 6,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(45),
            backoff_multiplier: 3.0,
            jitter: true,
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    /// Pause before the attempt following `attempt`, without jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.backoff_multiplier.max(1.0).powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }
}

/// Failure classes and their default retry behavior
#[derive(Debug, Clone, PartialEq)]
pub enum RetryableError {
    /// Connection-level failure (DNS, reset, refused)
    Network,
    /// Per-call timeout elapsed
    Timeout,
    /// HTTP 5xx server errors
    ServerError(u16),
    /// HTTP 429 Too Many Requests
    RateLimited,
    /// HTTP 401/403, or a credential failure
    AuthError,
    /// HTTP 404
    NotFound,
    /// Other 4xx client errors
    ClientError(u16),
    /// Lockout banner served by the platform
    Blocked,
    /// Structural failures: loop stage, result contract, unbuildable request
    Structural,
    Unknown,
}

impl RetryableError {
    /// Default predicate: transient transport and server-side failures only
    pub fn should_retry(&self) -> bool {
        match self {
            RetryableError::Network => true,
            RetryableError::Timeout => true,
            RetryableError::ServerError(_) => true,
            RetryableError::RateLimited => true,
            RetryableError::AuthError => false,
            RetryableError::NotFound => false,
            RetryableError::ClientError(_) => false,
            RetryableError::Blocked => false,
            RetryableError::Structural => false,
            RetryableError::Unknown => false,
        }
    }

    /// Classify an HTTP status code into retry behavior
    pub fn from_status_code(status: u16) -> Self {
        match status {
            401 | 403 => RetryableError::AuthError,
            404 => RetryableError::NotFound,
            408 => RetryableError::Timeout,
            429 => RetryableError::RateLimited,
            400..=499 => RetryableError::ClientError(status),
            500..=599 => RetryableError::ServerError(status),
            _ => RetryableError::Unknown,
        }
    }

    pub fn from_api_error(error: &ApiError) -> Self {
        match error {
            ApiError::Transport { timed_out: true, .. } => RetryableError::Timeout,
            ApiError::Transport { .. } => RetryableError::Network,
            ApiError::Credential { .. } => RetryableError::AuthError,
            ApiError::PlatformBlock { .. } => RetryableError::Blocked,
            ApiError::LoopStage { .. }
            | ApiError::ResultContract { .. }
            | ApiError::InvalidRequest { .. } => RetryableError::Structural,
        }
    }

    /// Classify the outcome of one attempt; `None` means it succeeded
    pub fn classify(outcome: &Result<ResponseEnvelope, ApiError>) -> Option<Self> {
        match outcome {
            Ok(envelope) if envelope.success => None,
            Ok(envelope) => Some(Self::from_status_code(envelope.status)),
            Err(error) => Some(Self::from_api_error(error)),
        }
    }
}

type RetryPredicate = Arc<dyn Fn(&RetryableError) -> bool + Send + Sync>;

/// Retry policy that implements exponential backoff with jitter
#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    predicate: RetryPredicate,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy").field("config", &self.config).finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config, predicate: Arc::new(RetryableError::should_retry) }
    }

    /// Policy that makes exactly one attempt
    pub fn none() -> Self {
        Self::new(RetryConfig::none())
    }

    /// Replace the predicate deciding which failure classes are retried.
    /// Auth, not-found and structural failures stay fatal whatever it returns.
    pub fn with_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&RetryableError) -> bool + Send + Sync + 'static,
    {
        self.predicate = Arc::new(predicate);
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    fn is_retryable(&self, class: &RetryableError) -> bool {
        match class {
            RetryableError::AuthError
            | RetryableError::NotFound
            | RetryableError::Blocked
            | RetryableError::Structural => false,
            other => (self.predicate)(other),
        }
    }

    /// Execute an operation with retry logic. The final outcome is returned
    /// unchanged once attempts run out or the failure is not retryable.
    pub async fn execute<F, Fut>(&self, mut operation: F) -> Result<ResponseEnvelope, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<ResponseEnvelope, ApiError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            debug!("Executing operation (attempt {}/{})", attempt, max_attempts);
            let outcome = operation().await;

            let class = match RetryableError::classify(&outcome) {
                None => {
                    if attempt > 1 {
                        info!("Operation succeeded after {} attempts", attempt);
                    }
                    return outcome;
                }
                Some(class) => class,
            };

            let should_retry = self.is_retryable(&class);
            if !should_retry || attempt >= max_attempts {
                if attempt > 1 || should_retry {
                    warn!(
                        "Operation failed permanently on attempt {} ({:?}, should_retry: {})",
                        attempt, class, should_retry
                    );
                }
                return outcome;
            }

            let delay = self.calculate_delay(attempt);
            warn!("Operation failed on attempt {} ({:?}), retrying in {:?}", attempt, class, delay);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }

    /// Backoff for `attempt`, scaled into `[delay / 2, delay]` when jitter is on.
    /// Never exceeds `max_delay`.
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay = self.config.backoff(attempt);
        if !self.config.jitter || delay.is_zero() {
            return delay;
        }
        delay.mul_f64(rand::rng().random_range(0.5..=1.0))
    }
}
