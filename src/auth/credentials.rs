//! Concrete credential variants
//!
//! Construction verifies the required fields, so a credential missing them
//! cannot exist. Tokens are obtained lazily on first use.

use std::collections::BTreeMap;

use async_trait::async_trait;
use log::info;

use super::{Credential, CredentialCore, CredentialKind, flows, require};
use crate::api::constants::{PUBLIC_API_BASE, headers};
use crate::api::context::ExecutionContext;
use crate::api::error::ApiError;

/// Pre-issued developer access token
#[derive(Debug)]
pub struct AccessTokenCredential {
    core: CredentialCore,
    access_token: String,
}

impl AccessTokenCredential {
    pub fn new(instance: impl Into<String>, access_token: impl Into<String>) -> Result<Self, ApiError> {
        let core = CredentialCore::new(instance);
        let access_token = access_token.into();
        require(core.instance(), "access token", &access_token)?;
        core.store_token(access_token.clone());
        Ok(Self { core, access_token })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.core = self.core.with_base_url(base_url);
        self.core.store_token(self.access_token.clone());
        self
    }
}

#[async_trait]
impl Credential for AccessTokenCredential {
    fn kind(&self) -> CredentialKind {
        CredentialKind::AccessToken
    }

    fn core(&self) -> &CredentialCore {
        &self.core
    }

    fn auth_header(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(headers::X_DOMO_DEVELOPER_TOKEN.to_string(), self.access_token.clone())])
    }

    fn can_refresh(&self) -> bool {
        false
    }

    async fn get_token(&self, _context: &ExecutionContext) -> Result<String, ApiError> {
        Ok(self.access_token.clone())
    }
}

/// Username and password exchanged for a session token
pub struct UsernamePasswordCredential {
    core: CredentialCore,
    username: String,
    password: String,
}

impl UsernamePasswordCredential {
    pub fn new(
        instance: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, ApiError> {
        let core = CredentialCore::new(instance);
        let username = username.into();
        let password = password.into();
        require(core.instance(), "username", &username)?;
        require(core.instance(), "password", &password)?;
        Ok(Self { core, username, password })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.core = self.core.with_base_url(base_url);
        self
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

impl std::fmt::Debug for UsernamePasswordCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsernamePasswordCredential")
            .field("core", &self.core)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Credential for UsernamePasswordCredential {
    fn kind(&self) -> CredentialKind {
        CredentialKind::UsernamePassword
    }

    fn core(&self) -> &CredentialCore {
        &self.core
    }

    fn auth_header(&self) -> BTreeMap<String, String> {
        self.core
            .token()
            .map(|token| BTreeMap::from([(headers::X_DOMO_AUTHENTICATION.to_string(), token)]))
            .unwrap_or_default()
    }

    fn can_refresh(&self) -> bool {
        true
    }

    async fn get_token(&self, context: &ExecutionContext) -> Result<String, ApiError> {
        self.core
            .get_or_mint(context, move || async move {
                let token = flows::password_login(&self.core, &self.username, &self.password, context).await?;
                info!("Obtained session token for {} on {}", self.username, self.core.instance());
                Ok(token)
            })
            .await
    }
}

/// Client id and secret, client-credential flow
pub struct ClientCredential {
    core: CredentialCore,
    client_id: String,
    client_secret: String,
    api_base: String,
}

impl ClientCredential {
    pub fn new(
        instance: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, ApiError> {
        let core = CredentialCore::new(instance);
        let client_id = client_id.into();
        let client_secret = client_secret.into();
        require(core.instance(), "client id", &client_id)?;
        require(core.instance(), "client secret", &client_secret)?;
        Ok(Self { core, client_id, client_secret, api_base: PUBLIC_API_BASE.to_string() })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.core = self.core.with_base_url(base_url);
        self
    }

    /// Override where the token grant is requested
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl std::fmt::Debug for ClientCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredential")
            .field("core", &self.core)
            .field("client_id", &self.client_id)
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Credential for ClientCredential {
    fn kind(&self) -> CredentialKind {
        CredentialKind::Client
    }

    fn core(&self) -> &CredentialCore {
        &self.core
    }

    fn auth_header(&self) -> BTreeMap<String, String> {
        self.core
            .token()
            .map(|token| BTreeMap::from([(headers::AUTHORIZATION.to_string(), format!("bearer {}", token))]))
            .unwrap_or_default()
    }

    fn can_refresh(&self) -> bool {
        true
    }

    async fn get_token(&self, context: &ExecutionContext) -> Result<String, ApiError> {
        self.core
            .get_or_mint(context, move || async move {
                let token = flows::client_credentials_token(
                    &self.core,
                    &self.api_base,
                    &self.client_id,
                    &self.client_secret,
                    context,
                )
                .await?;
                info!("Obtained client-credential token for {}", self.core.instance());
                Ok(token)
            })
            .await
    }
}

/// Credential an embedded environment can wrap
#[derive(Debug)]
pub enum BaseCredential {
    AccessToken(AccessTokenCredential),
    UsernamePassword(UsernamePasswordCredential),
}

impl BaseCredential {
    fn as_credential(&self) -> &dyn Credential {
        match self {
            BaseCredential::AccessToken(credential) => credential,
            BaseCredential::UsernamePassword(credential) => credential,
        }
    }
}

impl From<AccessTokenCredential> for BaseCredential {
    fn from(credential: AccessTokenCredential) -> Self {
        BaseCredential::AccessToken(credential)
    }
}

impl From<UsernamePasswordCredential> for BaseCredential {
    fn from(credential: UsernamePasswordCredential) -> Self {
        BaseCredential::UsernamePassword(credential)
    }
}

/// A base credential plus the tokens an embedded runtime hands out
pub struct EmbeddedEnvironmentCredential {
    inner: BaseCredential,
    environment_token: String,
    service_location: String,
    service_prefix: String,
}

impl EmbeddedEnvironmentCredential {
    pub fn new(
        inner: impl Into<BaseCredential>,
        environment_token: impl Into<String>,
        service_location: impl Into<String>,
        service_prefix: impl Into<String>,
    ) -> Result<Self, ApiError> {
        let inner = inner.into();
        let environment_token = environment_token.into();
        let service_location = service_location.into();
        let instance = inner.as_credential().instance().to_string();
        require(&instance, "environment token", &environment_token)?;
        require(&instance, "service location", &service_location)?;
        Ok(Self { inner, environment_token, service_location, service_prefix: service_prefix.into() })
    }

    pub fn inner(&self) -> &BaseCredential {
        &self.inner
    }

    /// Address of the environment's own service
    pub fn service_url(&self) -> String {
        format!("{}{}", self.service_location, self.service_prefix)
    }
}

impl std::fmt::Debug for EmbeddedEnvironmentCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedEnvironmentCredential")
            .field("inner", &self.inner)
            .field("service_location", &self.service_location)
            .field("service_prefix", &self.service_prefix)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Credential for EmbeddedEnvironmentCredential {
    fn kind(&self) -> CredentialKind {
        CredentialKind::EmbeddedEnvironment
    }

    fn core(&self) -> &CredentialCore {
        self.inner.as_credential().core()
    }

    fn auth_header(&self) -> BTreeMap<String, String> {
        let mut headers = self.inner.as_credential().auth_header();
        headers.insert(headers::AUTHORIZATION.to_string(), format!("Token {}", self.environment_token));
        headers
    }

    fn can_refresh(&self) -> bool {
        self.inner.as_credential().can_refresh()
    }

    async fn get_token(&self, context: &ExecutionContext) -> Result<String, ApiError> {
        self.inner.as_credential().get_token(context).await
    }
}
