//! Retry policies, client configuration and structured call logging

pub mod config;
pub mod logging;
pub mod retry;

pub use config::{ClientConfig, ClientConfigBuilder, LogLevel, MonitoringConfig};
pub use logging::{ApiLogger, CallTrace, sanitize_headers};
pub use retry::{RetryConfig, RetryPolicy, RetryableError};
