//! API constants and URL builders for the Domo platform

/// Domain every instance lives under
pub const PLATFORM_DOMAIN: &str = "domo.com";

/// Base URL of the public developer API (client-credential flow)
pub const PUBLIC_API_BASE: &str = "https://api.domo.com";

/// Status recorded on an envelope when no HTTP response was received
pub const TRANSPORT_FAILURE_STATUS: u16 = 0;

/// Default page size for the pagination loop
pub const DEFAULT_PAGE_LIMIT: usize = 1000;

/// Standard headers for platform requests
pub mod headers {
    /// Content type for JSON requests
    pub const CONTENT_TYPE_JSON: &str = "application/json";

    /// Content type for plain text bodies
    pub const CONTENT_TYPE_TEXT: &str = "text/plain";

    /// Session token header minted by the password flow
    pub const X_DOMO_AUTHENTICATION: &str = "x-domo-authentication";

    /// Pre-issued access token header
    pub const X_DOMO_DEVELOPER_TOKEN: &str = "x-domo-developer-token";

    /// Correlation header attached when monitoring enables it
    pub const X_CORRELATION_ID: &str = "x-correlation-id";

    pub const AUTHORIZATION: &str = "authorization";
}

/// Paths on an instance
pub mod paths {
    pub const AUTHENTICATION: &str = "/api/content/v2/authentication";
    pub const WHO_AM_I: &str = "/api/content/v2/users/me";
    pub const OAUTH_TOKEN: &str = "/oauth/token";
}

/// Build the base URL of an instance
pub fn instance_url(instance: &str) -> String {
    format!("https://{}.{}", instance, PLATFORM_DOMAIN)
}

/// Join a base URL and a path without doubling the slash
pub fn join(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}
