//! Structured logging with correlation tracking for API calls
//!
//! The logger is the telemetry sink carried inside an
//! [`ExecutionContext`](crate::api::ExecutionContext). It renders JSON events
//! through the `log` facade and never installs a logger itself.

use super::config::{LogLevel, MonitoringConfig};
use log::{error, info, log, trace, warn};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

const REDACTED: &str = "[REDACTED]";

/// Structured logger for API calls with correlation tracking
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiLogger {
    config: MonitoringConfig,
}

/// Trace of a single call, created by [`ApiLogger::start_call`]
#[derive(Debug, Clone)]
pub struct CallTrace {
    pub correlation_id: String,
    pub method: String,
    pub url: String,
    /// Calling component, for attributing the call in logs
    pub parent_class: Option<String>,
    /// Per-call override of the configured level
    pub level_override: Option<LogLevel>,
    /// Raises request/response events to info
    pub debug_api: bool,
    pub start_time: Instant,
}

impl ApiLogger {
    pub fn new(config: MonitoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MonitoringConfig {
        &self.config
    }

    /// Start tracking a call
    pub fn start_call(
        &self,
        method: &str,
        url: &str,
        parent_class: Option<&str>,
        level_override: Option<LogLevel>,
        debug_api: bool,
    ) -> CallTrace {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let call = CallTrace {
            correlation_id,
            method: method.to_string(),
            url: url.to_string(),
            parent_class: parent_class.map(str::to_string),
            level_override,
            debug_api,
            start_time: Instant::now(),
        };

        if self.config.request_logging && self.should_log(&call, LogLevel::Trace) {
            trace!("API Call Started: {}", self.event(&call, "call_started", json!({})));
        }

        call
    }

    /// Log outgoing request details
    pub fn log_request(&self, call: &CallTrace, headers: &BTreeMap<String, String>, body: Option<&Value>) {
        let level = if call.debug_api { LogLevel::Info } else { LogLevel::Debug };
        if !self.config.request_logging || !self.should_log(call, level) {
            return;
        }

        let log_data = self.event(
            call,
            "http_request",
            json!({
                "headers": sanitize_headers(headers),
                "body": body,
            }),
        );
        log!(level.to_log_level(), "HTTP Request: {}", log_data);
    }

    /// Log response details
    pub fn log_response(&self, call: &CallTrace, status_code: u16, duration: Duration) {
        let level = if status_code >= 400 {
            LogLevel::Warn
        } else if call.debug_api {
            LogLevel::Info
        } else {
            LogLevel::Debug
        };
        if !self.config.request_logging || !self.should_log(call, level) {
            return;
        }

        let log_data = self.event(
            call,
            "http_response",
            json!({
                "status_code": status_code,
                "duration_ms": duration.as_millis(),
            }),
        );

        if status_code >= 400 {
            warn!("HTTP Response (Error): {}", log_data);
        } else {
            log!(level.to_log_level(), "HTTP Response: {}", log_data);
        }
    }

    /// Log a dry run that skipped the network
    pub fn log_dry_run(&self, call: &CallTrace) {
        if !self.should_log(call, LogLevel::Info) {
            return;
        }
        info!("Dry Run: {}", self.event(call, "dry_run", json!({})));
    }

    /// Log a token refresh triggered by an expired token
    pub fn log_token_refresh(&self, call: &CallTrace, instance: &str) {
        if !self.should_log(call, LogLevel::Info) {
            return;
        }
        info!(
            "Token Refresh: {}",
            self.event(call, "token_refresh", json!({ "instance": instance }))
        );
    }

    /// Log one page of a pagination loop
    pub fn log_page(&self, call: &CallTrace, skip: usize, limit: usize, received: usize, accumulated: usize) {
        let level = if call.debug_api { LogLevel::Info } else { LogLevel::Debug };
        if !self.should_log(call, level) {
            return;
        }

        let log_data = self.event(
            call,
            "page_received",
            json!({
                "skip": skip,
                "limit": limit,
                "received": received,
                "accumulated": accumulated,
            }),
        );
        log!(level.to_log_level(), "Page Received: {}", log_data);
    }

    /// Complete a call and log its outcome
    pub fn complete_call(&self, call: &CallTrace, status_code: Option<u16>, success: bool, error_message: Option<&str>) {
        if !self.config.performance_metrics {
            return;
        }
        let level = if success { LogLevel::Info } else { LogLevel::Error };
        if !self.should_log(call, level) {
            return;
        }

        let log_data = self.event(
            call,
            "call_completed",
            json!({
                "duration_ms": call.elapsed().as_millis(),
                "success": success,
                "status_code": status_code,
                "error_message": error_message,
            }),
        );

        if success {
            info!("API Call Completed: {}", log_data);
        } else {
            error!("API Call Failed: {}", log_data);
        }
    }

    /// Log performance warning for slow calls
    pub fn log_performance_warning(&self, call: &CallTrace, threshold: Duration) {
        let duration = call.elapsed();
        if duration <= threshold || !self.config.performance_metrics || !self.should_log(call, LogLevel::Warn) {
            return;
        }

        let log_data = self.event(
            call,
            "performance_warning",
            json!({
                "duration_ms": duration.as_millis(),
                "threshold_ms": threshold.as_millis(),
            }),
        );
        warn!("Slow Call Detected: {}", log_data);
    }

    fn event(&self, call: &CallTrace, name: &str, fields: Value) -> Value {
        let mut log_data = json!({
            "event": name,
            "method": call.method,
            "url": call.url,
            "parent_class": call.parent_class,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        if self.config.correlation_ids {
            log_data["correlation_id"] = Value::String(call.correlation_id.clone());
        }
        if let (Value::Object(target), Value::Object(extra)) = (&mut log_data, fields) {
            target.extend(extra);
        }
        log_data
    }

    /// Check if we should log at the given level for this call
    fn should_log(&self, call: &CallTrace, level: LogLevel) -> bool {
        level <= call.level_override.unwrap_or(self.config.log_level)
    }
}

impl CallTrace {
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// Sanitize headers to remove credentials
pub fn sanitize_headers(headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(key, value)| {
            let key_lower = key.to_lowercase();
            let sensitive = key_lower == "authorization"
                || key_lower.contains("authentication")
                || key_lower.contains("token")
                || key_lower.contains("secret")
                || key_lower.contains("password");
            let value = if sensitive { REDACTED.to_string() } else { value.clone() };
            (key.clone(), value)
        })
        .collect()
}
