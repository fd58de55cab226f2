//! Live token and identity calls
//!
//! These go through the single request executor without a credential, so
//! they share its session handling, dry-run and logging behavior. Each makes
//! exactly one attempt; retrying a token fetch is left to the policy of the
//! call that needed the token.
//!
//! Under a dry run nothing is sent and nothing is concluded: token flows yield
//! an empty token and the identity check yields an identity with an empty id.

use std::collections::BTreeMap;

use log::{debug, warn};
use serde_json::{Value, json};

use super::{CredentialCore, Identity};
use crate::api::client::{HttpRequest, execute_request};
use crate::api::constants::{join, paths};
use crate::api::context::ExecutionContext;
use crate::api::envelope::ResponseEnvelope;
use crate::api::error::ApiError;
use crate::api::resilience::RetryPolicy;

fn auth_failure(core: &CredentialCore, envelope: &ResponseEnvelope, what: &str) -> ApiError {
    let reason = envelope
        .payload
        .as_json()
        .and_then(|body| body.get("reason").or_else(|| body.get("error_description")).or_else(|| body.get("error")))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| envelope.payload.as_text().map(str::to_string))
        .unwrap_or_else(|| format!("status {}", envelope.status));

    ApiError::Credential {
        instance: core.instance().to_string(),
        message: format!("{} failed: {}", what, reason),
        status: Some(envelope.status),
    }
}

/// Exchange a username and password for a session token
pub async fn password_login(
    core: &CredentialCore,
    username: &str,
    password: &str,
    context: &ExecutionContext,
) -> Result<String, ApiError> {
    let url = join(core.base_url(), paths::AUTHENTICATION);
    debug!("Requesting session token for {} on {}", username, core.instance());

    let request = HttpRequest::post(&url)
        .json(json!({
            "method": "password",
            "emailAddress": username,
            "password": password,
        }))
        .retry(RetryPolicy::none());
    let envelope = execute_request(&request, None, context).await?;
    if context.dry_run() {
        return Ok(String::new());
    }

    let token = envelope
        .payload
        .as_json()
        .and_then(|body| body.get("sessionToken"))
        .and_then(Value::as_str)
        .map(str::to_string);

    match token {
        Some(token) if envelope.success => Ok(token),
        _ => Err(auth_failure(core, &envelope, "password login")),
    }
}

/// Client-credential flow against the public API
pub async fn client_credentials_token(
    core: &CredentialCore,
    api_base: &str,
    client_id: &str,
    client_secret: &str,
    context: &ExecutionContext,
) -> Result<String, ApiError> {
    let url = join(api_base, paths::OAUTH_TOKEN);
    debug!("Requesting client-credential token for {}", core.instance());

    let request = HttpRequest::get(&url)
        .param("grant_type", "client_credentials")
        .basic_auth(client_id, client_secret)
        .retry(RetryPolicy::none());
    let envelope = execute_request(&request, None, context).await?;
    if context.dry_run() {
        return Ok(String::new());
    }

    let token = envelope
        .payload
        .as_json()
        .and_then(|body| body.get("access_token"))
        .and_then(Value::as_str)
        .map(str::to_string);

    match token {
        Some(token) if envelope.success => Ok(token),
        _ => Err(auth_failure(core, &envelope, "client credential grant")),
    }
}

/// Resolve the identity behind the given auth headers and record the outcome
pub async fn who_am_i(
    core: &CredentialCore,
    auth_header: BTreeMap<String, String>,
    context: &ExecutionContext,
) -> Result<Identity, ApiError> {
    let url = join(core.base_url(), paths::WHO_AM_I);
    let request = HttpRequest::get(&url).headers(auth_header).retry(RetryPolicy::none());
    let envelope = match execute_request(&request, None, context).await {
        Ok(envelope) => envelope,
        Err(err) => {
            core.mark_invalid();
            return Err(err);
        }
    };

    if context.dry_run() {
        let raw = envelope.payload.as_json().cloned().unwrap_or_default();
        return Ok(Identity { id: String::new(), display_name: None, email: None, raw });
    }

    if !envelope.success {
        warn!("Identity check for {} returned {}", core.instance(), envelope.status);
        core.mark_invalid();
        return Err(auth_failure(core, &envelope, "identity check"));
    }

    match envelope.payload.as_json().and_then(Identity::from_json) {
        Some(identity) => {
            core.mark_validated(identity.clone());
            Ok(identity)
        }
        None => {
            core.mark_invalid();
            Err(ApiError::Credential {
                instance: core.instance().to_string(),
                message: "identity check returned no user id".to_string(),
                status: Some(envelope.status),
            })
        }
    }
}
