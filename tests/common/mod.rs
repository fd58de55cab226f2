//! Helpers shared by the integration tests

#![allow(dead_code)]

use std::time::Duration;

use domo_api_core::api::{RetryConfig, RetryPolicy};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Retry policy with millisecond backoff so tests stay fast
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(RetryConfig {
        max_attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 1.0,
        jitter: false,
    })
}

/// Address on localhost that refuses connections
pub fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);
    format!("http://127.0.0.1:{}/api/data", port)
}
