//! Single request executor
//!
//! [`execute_request`] performs one HTTP exchange and wraps the outcome in a
//! [`ResponseEnvelope`]. It resolves the session from the context, attaches
//! the credential's headers, retries under the request's policy, replays once
//! after a rejected token and turns lockout pages into
//! [`ApiError::PlatformBlock`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};
use once_cell::sync::Lazy;
use reqwest::{Method, StatusCode};
use serde_json::Value;

use super::block::{BannerMatcher, BlockDetection, BlockMatcher};
use super::constants::headers;
use super::context::ExecutionContext;
use super::envelope::{Payload, RequestMetadata, ResponseEnvelope};
use super::error::ApiError;
use super::resilience::{CallTrace, RetryPolicy};
use super::session::{Session, SessionGuard};
use crate::auth::Credential;

static DEFAULT_MATCHER: Lazy<BannerMatcher> = Lazy::new(BannerMatcher::default);

/// Calls slower than this are reported by the logger
const SLOW_CALL_THRESHOLD: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    Text(String),
}

impl RequestBody {
    pub fn to_value(&self) -> Value {
        match self {
            RequestBody::Json(value) => value.clone(),
            RequestBody::Text(text) => Value::String(text.clone()),
        }
    }
}

/// Description of one HTTP exchange
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub method: Method,
    /// Extra headers; keys are stored lowercased
    pub headers: BTreeMap<String, String>,
    pub body: Option<RequestBody>,
    pub params: BTreeMap<String, Value>,
    /// Per-call timeout overriding the session's
    pub timeout: Option<Duration>,
    /// Hand back the body as text, skipping parsing and banner checks
    pub return_raw: bool,
    pub follow_redirects: bool,
    pub dry_run: bool,
    pub basic_auth: Option<(String, String)>,
    /// Invalidate and replay once when the platform rejects the token
    pub refresh_on_unauthorized: bool,
    /// Falls back to the session's retry config when absent
    pub retry: Option<RetryPolicy>,
    pub block_matcher: Option<Arc<dyn BlockMatcher>>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            headers: BTreeMap::new(),
            body: None,
            params: BTreeMap::new(),
            timeout: None,
            return_raw: false,
            follow_redirects: true,
            dry_run: false,
            basic_auth: None,
            refresh_on_unauthorized: true,
            retry: None,
            block_matcher: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn headers(mut self, headers: BTreeMap<String, String>) -> Self {
        for (name, value) in headers {
            self.headers.insert(name.to_ascii_lowercase(), value);
        }
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.body = Some(RequestBody::Text(body.into()));
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn params(mut self, params: BTreeMap<String, Value>) -> Self {
        self.params.extend(params);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn return_raw(mut self, return_raw: bool) -> Self {
        self.return_raw = return_raw;
        self
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some((username.into(), password.into()));
        self
    }

    pub fn refresh_on_unauthorized(mut self, refresh: bool) -> Self {
        self.refresh_on_unauthorized = refresh;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn block_matcher(mut self, matcher: Arc<dyn BlockMatcher>) -> Self {
        self.block_matcher = Some(matcher);
        self
    }

    /// Headers as sent: content type, then request headers, then the
    /// credential's auth headers
    pub fn effective_headers(&self, credential: Option<&dyn Credential>) -> BTreeMap<String, String> {
        let content_type = match self.body {
            Some(RequestBody::Text(_)) => headers::CONTENT_TYPE_TEXT,
            _ => headers::CONTENT_TYPE_JSON,
        };
        let mut merged = BTreeMap::from([("content-type".to_string(), content_type.to_string())]);
        merged.extend(self.headers.clone());
        if let Some(credential) = credential {
            merged.extend(credential.auth_header());
        }
        merged
    }

    pub fn metadata(&self, headers: BTreeMap<String, String>) -> RequestMetadata {
        RequestMetadata {
            method: self.method.to_string(),
            url: self.url.clone(),
            headers,
            body: self.body.as_ref().map(RequestBody::to_value),
            params: self.params.clone(),
        }
    }

    pub(crate) fn detect_block(&self, body: &str) -> Option<BlockDetection> {
        match &self.block_matcher {
            Some(matcher) => matcher.detect(body),
            None => DEFAULT_MATCHER.detect(body),
        }
    }

    fn query_pairs(&self) -> Vec<(String, String)> {
        self.params
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    Value::String(text) => text.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                (name.clone(), value)
            })
            .collect()
    }
}

/// How the executor consumes a response body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadMode {
    Buffered,
    Streamed,
}

/// Perform one request and wrap the result in an envelope.
///
/// HTTP error statuses come back as `Ok` envelopes with `success == false`;
/// `Err` is reserved for transport failures, lockout pages and credential
/// errors raised while obtaining a token.
pub async fn execute_request(
    request: &HttpRequest,
    credential: Option<&dyn Credential>,
    context: &ExecutionContext,
) -> Result<ResponseEnvelope, ApiError> {
    execute(request, credential, context, ReadMode::Buffered).await
}

pub(crate) async fn execute(
    request: &HttpRequest,
    credential: Option<&dyn Credential>,
    context: &ExecutionContext,
    mode: ReadMode,
) -> Result<ResponseEnvelope, ApiError> {
    let logger = context.logger();
    let call = logger.start_call(
        request.method.as_str(),
        &request.url,
        context.parent_class(),
        context.log_level,
        context.debug_api(),
    );

    if request.dry_run || context.dry_run() {
        logger.log_dry_run(&call);
        return Ok(dry_run_envelope(request, credential));
    }

    let guard = SessionGuard::acquire(context)?;
    let session: &Session = &guard;
    let policy = request
        .retry
        .clone()
        .unwrap_or_else(|| RetryPolicy::new(session.config().retry.clone()));

    let trace = &call;
    let outcome = policy
        .execute(|| attempt(request, credential, context, session, trace, mode))
        .await
        .map(|envelope| {
            envelope
                .with_info("correlation_id", call.correlation_id.clone())
                .with_info("duration_ms", call.elapsed().as_millis() as u64)
                .with_info("parent_class", context.parent_class().map(str::to_string))
                .with_info("stacks_to_drop", context.stacks_to_drop() as u64)
        });

    match &outcome {
        Ok(envelope) => logger.complete_call(&call, Some(envelope.status), envelope.success, None),
        Err(err) => logger.complete_call(&call, Some(err.status()), false, Some(&err.to_string())),
    }
    logger.log_performance_warning(&call, SLOW_CALL_THRESHOLD);

    outcome
}

/// Echo of the request that would have been sent
fn dry_run_envelope(request: &HttpRequest, credential: Option<&dyn Credential>) -> ResponseEnvelope {
    let metadata = request.metadata(request.effective_headers(credential));
    let payload = Payload::Json(metadata.to_json());
    ResponseEnvelope::new(StatusCode::OK.as_u16(), payload, true, metadata).with_info("dry_run", true)
}

async fn attempt(
    request: &HttpRequest,
    credential: Option<&dyn Credential>,
    context: &ExecutionContext,
    session: &Session,
    call: &CallTrace,
    mode: ReadMode,
) -> Result<ResponseEnvelope, ApiError> {
    let (response, metadata) = authorized_send(request, credential, context, session, call).await?;
    match mode {
        ReadMode::Buffered => read_buffered(request, response, metadata).await,
        ReadMode::Streamed => super::stream::read_streamed(request, response, metadata).await,
    }
}

async fn authorized_send(
    request: &HttpRequest,
    credential: Option<&dyn Credential>,
    context: &ExecutionContext,
    session: &Session,
    call: &CallTrace,
) -> Result<(reqwest::Response, RequestMetadata), ApiError> {
    if let Some(credential) = credential {
        credential.get_token(context).await?;
    }

    let (response, metadata) = send(request, credential, context, session, call).await?;
    if response.status() != StatusCode::UNAUTHORIZED || !request.refresh_on_unauthorized {
        return Ok((response, metadata));
    }

    match credential {
        Some(credential) if credential.can_refresh() => {
            context.logger().log_token_refresh(call, credential.instance());
            credential.invalidate();
            credential.get_token(context).await?;
            send(request, Some(credential), context, session, call).await
        }
        _ => Ok((response, metadata)),
    }
}

async fn send(
    request: &HttpRequest,
    credential: Option<&dyn Credential>,
    context: &ExecutionContext,
    session: &Session,
    call: &CallTrace,
) -> Result<(reqwest::Response, RequestMetadata), ApiError> {
    let logger = context.logger();
    let client = session.client(request.follow_redirects)?;

    let mut sent_headers = request.effective_headers(credential);
    if logger.config().correlation_ids {
        sent_headers.insert(headers::X_CORRELATION_ID.to_string(), call.correlation_id.clone());
    }
    let metadata = request.metadata(sent_headers);
    logger.log_request(call, &metadata.headers, metadata.body.as_ref());

    let mut builder = client.request(request.method.clone(), &request.url);
    for (name, value) in &metadata.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if !request.params.is_empty() {
        builder = builder.query(&request.query_pairs());
    }
    builder = match &request.body {
        Some(RequestBody::Json(body)) => builder.json(body),
        Some(RequestBody::Text(body)) => builder.body(body.clone()),
        None => builder,
    };
    if let Some(timeout) = request.timeout {
        builder = builder.timeout(timeout);
    }
    if let Some((username, password)) = &request.basic_auth {
        builder = builder.basic_auth(username, Some(password));
    }

    let started = Instant::now();
    let response = builder.send().await.map_err(|err| {
        warn!("Request to {} failed before a response: {}", request.url, err);
        ApiError::from_reqwest(&request.url, err)
    })?;
    logger.log_response(call, response.status().as_u16(), started.elapsed());

    Ok((response, metadata))
}

async fn read_buffered(
    request: &HttpRequest,
    response: reqwest::Response,
    metadata: RequestMetadata,
) -> Result<ResponseEnvelope, ApiError> {
    let status = response.status();
    let text = response.text().await.map_err(|err| ApiError::from_reqwest(&request.url, err))?;

    if request.return_raw {
        return Ok(ResponseEnvelope::new(status.as_u16(), Payload::Text(text), status.is_success(), metadata));
    }

    if let Some(detection) = request.detect_block(&text) {
        warn!("{} answered with a {} page", request.url, detection.kind);
        return Err(ApiError::PlatformBlock {
            url: request.url.clone(),
            kind: detection.kind,
            ip_address: detection.ip_address,
            status: status.as_u16(),
        });
    }

    let payload = if text.trim().is_empty() {
        Payload::Empty
    } else {
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => Payload::Json(value),
            Err(_) => {
                debug!("Body from {} is not JSON, keeping text", request.url);
                Payload::Text(text)
            }
        }
    };

    Ok(ResponseEnvelope::new(status.as_u16(), payload, status.is_success(), metadata))
}
