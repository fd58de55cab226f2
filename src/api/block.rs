//! Detection of platform lockout pages
//!
//! The platform answers some requests with an HTML page saying the caller is
//! blocked, often under a 200 or 303 status. Matching is done on fragments of
//! that presentation HTML, so it lives behind [`BlockMatcher`] and can be
//! swapped per request when upstream pages change.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use super::error::BlockKind;

static IPV4: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)(?:\.(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)){3}\b")
        .expect("static IPv4 pattern")
});

/// A detected lockout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDetection {
    pub kind: BlockKind,
    pub ip_address: Option<String>,
}

pub trait BlockMatcher: Send + Sync + fmt::Debug {
    /// Inspect a response body; `None` means it is a real response
    fn detect(&self, body: &str) -> Option<BlockDetection>;
}

/// Substring matcher over known banner fragments
#[derive(Debug, Clone)]
pub struct BannerMatcher {
    banners: Vec<(BlockKind, String)>,
}

impl Default for BannerMatcher {
    fn default() -> Self {
        Self::new()
            .with_banner(BlockKind::Vpn, "blocked by vpn")
            .with_banner(BlockKind::Vpn, "vpn connections are not allowed")
            .with_banner(BlockKind::AllowList, "not on the allowlist")
            .with_banner(BlockKind::AllowList, "not on the allow list")
            .with_banner(BlockKind::AllowList, "your ip address is not allowed")
    }
}

impl BannerMatcher {
    /// Matcher with no banners
    pub fn new() -> Self {
        Self { banners: Vec::new() }
    }

    /// Add a banner fragment; matching ignores ASCII case
    pub fn with_banner(mut self, kind: BlockKind, fragment: impl Into<String>) -> Self {
        self.banners.push((kind, fragment.into().to_ascii_lowercase()));
        self
    }

    /// First IPv4 address in the body
    pub fn extract_ip(body: &str) -> Option<String> {
        IPV4.find(body).map(|m| m.as_str().to_string())
    }
}

impl BlockMatcher for BannerMatcher {
    fn detect(&self, body: &str) -> Option<BlockDetection> {
        let lowered = body.to_ascii_lowercase();
        self.banners
            .iter()
            .find(|(_, fragment)| lowered.contains(fragment.as_str()))
            .map(|(kind, _)| BlockDetection { kind: *kind, ip_address: Self::extract_ip(body) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vpn_banner_with_address() {
        let body = "<html><title>Blocked</title><p>Access Blocked by VPN. Your IP: 203.0.113.42</p></html>";
        let detection = BannerMatcher::default().detect(body).unwrap();

        assert_eq!(detection.kind, BlockKind::Vpn);
        assert_eq!(detection.ip_address.as_deref(), Some("203.0.113.42"));
    }

    #[test]
    fn test_allow_list_banner() {
        let body = "<p>The address 198.51.100.7 is not on the allowlist for this instance.</p>";
        let detection = BannerMatcher::default().detect(body).unwrap();

        assert_eq!(detection.kind, BlockKind::AllowList);
        assert_eq!(detection.ip_address.as_deref(), Some("198.51.100.7"));
    }

    #[test]
    fn test_normal_body_passes() {
        assert!(BannerMatcher::default().detect(r#"{"id": 1, "ip": "10.0.0.1"}"#).is_none());
    }

    #[test]
    fn test_banner_without_address() {
        let detection = BannerMatcher::default().detect("blocked by VPN").unwrap();
        assert_eq!(detection.ip_address, None);
    }

    #[test]
    fn test_custom_banner() {
        let matcher = BannerMatcher::new().with_banner(BlockKind::AllowList, "Zugriff verweigert");
        assert!(matcher.detect("<h1>ZUGRIFF VERWEIGERT</h1> 192.0.2.1").is_some());
        assert!(BannerMatcher::new().detect("blocked by vpn").is_none());
    }

    #[test]
    fn test_invalid_octets_not_extracted() {
        assert_eq!(BannerMatcher::extract_ip("999.1.1.1 and 10.0.0.256"), None);
    }
}
