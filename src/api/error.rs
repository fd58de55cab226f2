//! Typed failures raised by the request-execution core

use std::fmt;

use thiserror::Error;

use super::constants::TRANSPORT_FAILURE_STATUS;

/// Which caller-supplied function failed inside the pagination loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStage {
    BodyFn,
    ArrFn,
}

impl LoopStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopStage::BodyFn => "processing body_fn",
            LoopStage::ArrFn => "processing arr_fn",
        }
    }
}

impl fmt::Display for LoopStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lockout page served instead of the real response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Caller is behind a VPN the instance refuses
    Vpn,
    /// Caller's address is missing from the instance allow list
    AllowList,
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockKind::Vpn => f.write_str("blocked by VPN"),
            BlockKind::AllowList => f.write_str("blocked by IP allow list"),
        }
    }
}

/// Classification of an [`ApiError`] without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Credential,
    Transport,
    PlatformBlock,
    LoopStage,
    ResultContract,
    InvalidRequest,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("credential error for instance {instance}: {message}")]
    Credential {
        instance: String,
        message: String,
        /// HTTP status of the failed auth or identity call, if one was received
        status: Option<u16>,
    },

    #[error("transport error calling {url}: {message}")]
    Transport {
        url: String,
        message: String,
        timed_out: bool,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("{url} {kind}; offending address: {}", .ip_address.as_deref().unwrap_or("unknown"))]
    PlatformBlock {
        url: String,
        kind: BlockKind,
        ip_address: Option<String>,
        status: u16,
    },

    #[error("pagination of {url} failed while {stage}: {source}")]
    LoopStage {
        url: String,
        stage: LoopStage,
        #[source]
        source: anyhow::Error,
    },

    #[error("{function} did not return a well-formed envelope: {message}")]
    ResultContract { function: String, message: String },

    #[error("invalid request for {url}: {message}")]
    InvalidRequest { url: String, message: String },
}

impl ApiError {
    pub fn credential(instance: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError::Credential { instance: instance.into(), message: message.into(), status: None }
    }

    pub fn invalid_request(url: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError::InvalidRequest { url: url.into(), message: message.into() }
    }

    /// Wrap a reqwest failure, keeping the URL it was aimed at
    pub fn from_reqwest(url: &str, error: reqwest::Error) -> Self {
        if error.is_builder() {
            return ApiError::invalid_request(url, error.to_string());
        }
        ApiError::Transport {
            url: url.to_string(),
            message: error.to_string(),
            timed_out: error.is_timeout(),
            source: Some(error),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Credential { .. } => ErrorKind::Credential,
            ApiError::Transport { .. } => ErrorKind::Transport,
            ApiError::PlatformBlock { .. } => ErrorKind::PlatformBlock,
            ApiError::LoopStage { .. } => ErrorKind::LoopStage,
            ApiError::ResultContract { .. } => ErrorKind::ResultContract,
            ApiError::InvalidRequest { .. } => ErrorKind::InvalidRequest,
        }
    }

    /// Only connection-level failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Transport { .. })
    }

    /// HTTP status tied to this error, or the transport sentinel
    pub fn status(&self) -> u16 {
        match self {
            ApiError::Credential { status: Some(status), .. } => *status,
            ApiError::PlatformBlock { status, .. } => *status,
            _ => TRANSPORT_FAILURE_STATUS,
        }
    }

    /// URL or instance the error concerns
    pub fn target(&self) -> &str {
        match self {
            ApiError::Credential { instance, .. } => instance,
            ApiError::Transport { url, .. }
            | ApiError::PlatformBlock { url, .. }
            | ApiError::LoopStage { url, .. }
            | ApiError::InvalidRequest { url, .. } => url,
            ApiError::ResultContract { function, .. } => function,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_stage_names() {
        assert_eq!(LoopStage::BodyFn.to_string(), "processing body_fn");
        assert_eq!(LoopStage::ArrFn.to_string(), "processing arr_fn");
    }

    #[test]
    fn test_only_transport_is_retryable() {
        let transport = ApiError::Transport {
            url: "https://acme.domo.com".into(),
            message: "connection reset".into(),
            timed_out: false,
            source: None,
        };
        assert!(transport.is_retryable());
        assert_eq!(transport.status(), TRANSPORT_FAILURE_STATUS);

        let credential = ApiError::credential("acme", "missing password");
        assert!(!credential.is_retryable());
        assert_eq!(credential.kind(), ErrorKind::Credential);
        assert_eq!(credential.target(), "acme");
    }

    #[test]
    fn test_block_message_carries_address() {
        let err = ApiError::PlatformBlock {
            url: "https://acme.domo.com/api/x".into(),
            kind: BlockKind::Vpn,
            ip_address: Some("10.1.2.3".into()),
            status: 200,
        };
        let message = err.to_string();
        assert!(message.contains("10.1.2.3"));
        assert!(message.contains("https://acme.domo.com/api/x"));
        assert_eq!(err.status(), 200);
    }

    #[test]
    fn test_loop_stage_keeps_source() {
        let err = ApiError::LoopStage {
            url: "https://acme.domo.com/api/list".into(),
            stage: LoopStage::ArrFn,
            source: anyhow::anyhow!("missing 'users' key"),
        };
        assert!(err.to_string().contains("processing arr_fn"));
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("missing 'users' key"));
    }
}
