//! Authentication strategies
//!
//! Every strategy implements [`Credential`]: it supplies the headers a request
//! needs, obtains its token lazily and can check itself against the identity
//! endpoint. Token state lives in a [`CredentialCore`] behind an `ArcSwap`, so
//! one credential can be shared by concurrent calls and updated in place.
//! Minting is single-flight: concurrent callers that find no token wait for
//! one token flow instead of each starting their own.

pub mod credentials;
pub mod flows;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::api::context::ExecutionContext;
use crate::api::error::ApiError;

pub use credentials::{
    AccessTokenCredential, BaseCredential, ClientCredential, EmbeddedEnvironmentCredential,
    UsernamePasswordCredential,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    AccessToken,
    UsernamePassword,
    Client,
    EmbeddedEnvironment,
}

/// Where a credential is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    /// Required fields verified, no token yet
    Constructed,
    TokenObtained,
    Validated,
    Invalid,
}

/// User the token resolves to
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub id: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub raw: Value,
}

impl Identity {
    /// Read an identity out of a users/me response body
    pub fn from_json(value: &Value) -> Option<Self> {
        let id = match value.get("id")? {
            Value::String(id) => id.clone(),
            Value::Number(id) => id.to_string(),
            _ => return None,
        };
        Some(Self {
            id,
            display_name: value.get("displayName").and_then(Value::as_str).map(str::to_string),
            email: value
                .get("emailAddress")
                .or_else(|| value.get("email"))
                .and_then(Value::as_str)
                .map(str::to_string),
            raw: value.clone(),
        })
    }
}

/// Snapshot of a credential's mutable state
#[derive(Debug, Clone, PartialEq)]
pub struct TokenState {
    pub status: TokenStatus,
    pub token: Option<String>,
    pub identity: Option<Identity>,
    pub obtained_at: Option<DateTime<Utc>>,
}

impl TokenState {
    fn constructed() -> Self {
        Self { status: TokenStatus::Constructed, token: None, identity: None, obtained_at: None }
    }

    pub fn is_valid(&self) -> bool {
        self.status == TokenStatus::Validated
    }
}

/// Instance identity plus the swappable token state
pub struct CredentialCore {
    instance: String,
    base_url: String,
    state: ArcSwap<TokenState>,
    mint: Mutex<()>,
}

impl CredentialCore {
    pub fn new(instance: impl Into<String>) -> Self {
        let instance = instance.into();
        let base_url = crate::api::constants::instance_url(&instance);
        Self {
            instance,
            base_url,
            state: ArcSwap::from_pointee(TokenState::constructed()),
            mint: Mutex::new(()),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn state(&self) -> Arc<TokenState> {
        self.state.load_full()
    }

    pub fn token(&self) -> Option<String> {
        self.state.load().token.clone()
    }

    pub fn store_token(&self, token: String) {
        debug!("Token obtained for instance {}", self.instance);
        self.state.store(Arc::new(TokenState {
            status: TokenStatus::TokenObtained,
            token: Some(token),
            identity: None,
            obtained_at: Some(Utc::now()),
        }));
    }

    pub fn mark_validated(&self, identity: Identity) {
        self.state.rcu(|current| TokenState {
            status: TokenStatus::Validated,
            identity: Some(identity.clone()),
            ..TokenState::clone(current)
        });
    }

    pub fn mark_invalid(&self) {
        self.state.rcu(|current| TokenState {
            status: TokenStatus::Invalid,
            identity: None,
            ..TokenState::clone(current)
        });
    }

    /// Forget the cached token so the next call mints a new one
    pub fn clear_token(&self) {
        self.state.store(Arc::new(TokenState::constructed()));
    }

    /// Cached token, or the result of `mint` run by exactly one caller.
    /// Callers queued behind a successful mint reuse its token. Dry-run mints
    /// are not stored.
    pub(crate) async fn get_or_mint<F, Fut>(&self, context: &ExecutionContext, mint: F) -> Result<String, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, ApiError>>,
    {
        if let Some(token) = self.token() {
            return Ok(token);
        }

        let _guard = self.mint.lock().await;
        if let Some(token) = self.token() {
            return Ok(token);
        }

        let token = mint().await?;
        if !context.dry_run() {
            self.store_token(token.clone());
        }
        Ok(token)
    }
}

impl fmt::Debug for CredentialCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.load();
        f.debug_struct("CredentialCore")
            .field("instance", &self.instance)
            .field("base_url", &self.base_url)
            .field("status", &state.status)
            .field("has_token", &state.token.is_some())
            .finish()
    }
}

/// Authentication strategy used by every executor
#[async_trait]
pub trait Credential: Send + Sync + fmt::Debug {
    fn kind(&self) -> CredentialKind;

    fn core(&self) -> &CredentialCore;

    /// Headers carrying the current token; empty until one is obtained
    fn auth_header(&self) -> BTreeMap<String, String>;

    /// Whether `get_token` can mint a fresh token after invalidation
    fn can_refresh(&self) -> bool;

    /// Cached token, or a freshly obtained one
    async fn get_token(&self, context: &ExecutionContext) -> Result<String, ApiError>;

    fn instance(&self) -> &str {
        self.core().instance()
    }

    fn base_url(&self) -> &str {
        self.core().base_url()
    }

    fn state(&self) -> Arc<TokenState> {
        self.core().state()
    }

    fn is_valid(&self) -> bool {
        self.state().is_valid()
    }

    /// Drop a token the platform rejected
    fn invalidate(&self) {
        if self.can_refresh() {
            self.core().clear_token();
        } else {
            self.core().mark_invalid();
        }
    }

    /// Check the token against the identity endpoint. Always issues exactly
    /// one identity request; nothing is cached between invocations.
    async fn validate(&self, context: &ExecutionContext) -> Result<Identity, ApiError> {
        self.get_token(context).await?;
        flows::who_am_i(self.core(), self.auth_header(), context).await
    }
}

/// Require a non-blank construction field
pub(crate) fn require(instance: &str, field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::credential(instance, format!("{} is required", field)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identity_from_numeric_id() {
        let identity = Identity::from_json(&json!({
            "id": 1893952720,
            "displayName": "Jae Wilson",
            "emailAddress": "jae@example.com"
        }))
        .unwrap();

        assert_eq!(identity.id, "1893952720");
        assert_eq!(identity.display_name.as_deref(), Some("Jae Wilson"));
        assert_eq!(identity.email.as_deref(), Some("jae@example.com"));
    }

    #[test]
    fn test_identity_requires_id() {
        assert!(Identity::from_json(&json!({"displayName": "x"})).is_none());
    }

    #[test]
    fn test_core_state_transitions() {
        let core = CredentialCore::new("acme");
        assert_eq!(core.base_url(), "https://acme.domo.com");
        assert_eq!(core.state().status, TokenStatus::Constructed);

        core.store_token("abc".into());
        assert_eq!(core.state().status, TokenStatus::TokenObtained);
        assert!(core.state().obtained_at.is_some());

        core.mark_validated(Identity::from_json(&json!({"id": "7"})).unwrap());
        let state = core.state();
        assert!(state.is_valid());
        assert_eq!(state.token.as_deref(), Some("abc"));

        core.mark_invalid();
        assert_eq!(core.state().status, TokenStatus::Invalid);
        assert!(core.state().identity.is_none());

        core.clear_token();
        assert_eq!(core.token(), None);
    }

    #[tokio::test]
    async fn test_concurrent_mints_run_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::time::Duration;

        let core = CredentialCore::new("acme");
        let context = ExecutionContext::new();
        let counter = AtomicUsize::new(0);
        let mints = &counter;

        let mint = move || async move {
            mints.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok("minted".to_string())
        };
        let (a, b, c) = tokio::join!(
            core.get_or_mint(&context, mint),
            core.get_or_mint(&context, mint),
            core.get_or_mint(&context, mint),
        );

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        for token in [a, b, c] {
            assert_eq!(token.unwrap(), "minted");
        }
        assert_eq!(core.state().status, TokenStatus::TokenObtained);
    }

    #[tokio::test]
    async fn test_failed_mint_lets_next_caller_retry() {
        let core = CredentialCore::new("acme");
        let context = ExecutionContext::new();

        let failed = core
            .get_or_mint(&context, || async { Err(ApiError::credential("acme", "login refused")) })
            .await;
        assert!(failed.is_err());
        assert_eq!(core.token(), None);

        let token = core.get_or_mint(&context, || async { Ok("second".to_string()) }).await.unwrap();
        assert_eq!(token, "second");
    }

    #[tokio::test]
    async fn test_dry_run_mint_is_not_stored() {
        let core = CredentialCore::new("acme");
        let context = ExecutionContext::new().with_dry_run(true);

        core.get_or_mint(&context, || async { Ok(String::new()) }).await.unwrap();
        assert_eq!(core.state().status, TokenStatus::Constructed);
        assert_eq!(core.token(), None);
    }

    #[test]
    fn test_require_rejects_blank() {
        assert!(require("acme", "password", "  ").is_err());
        assert!(require("acme", "password", "hunter2").is_ok());
    }
}
