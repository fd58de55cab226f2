//! Context-building wrapper for domain endpoints
//!
//! Domain code implements [`Endpoint`] (or wraps a closure with
//! [`endpoint_fn`]) and is invoked through [`run_endpoint`], which merges the
//! call-site keyword values into an [`ExecutionContext`] and checks the
//! returned envelope before handing it back.

use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use log::error;

use super::context::{ContextParams, ExecutionContext};
use super::envelope::ResponseEnvelope;
use super::error::ApiError;

#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Name reported when the returned envelope is malformed
    fn name(&self) -> &str;

    /// Keyword defaults this endpoint declares
    fn default_params(&self) -> ContextParams {
        ContextParams::default()
    }

    async fn call(&self, context: ExecutionContext) -> Result<ResponseEnvelope, ApiError>;
}

/// Build the context, invoke the endpoint and verify its envelope
pub async fn run_endpoint<E>(
    endpoint: &E,
    context: Option<ExecutionContext>,
    params: ContextParams,
) -> Result<ResponseEnvelope, ApiError>
where
    E: Endpoint + ?Sized,
{
    let context = ExecutionContext::merge(context, params, &endpoint.default_params());
    let envelope = endpoint.call(context).await?;
    if let Err(err) = envelope.check_contract(endpoint.name()) {
        error!("{}", err);
        return Err(err);
    }
    Ok(envelope)
}

/// Endpoint backed by a closure
pub struct FnEndpoint<F> {
    name: String,
    defaults: ContextParams,
    function: F,
}

impl<F> FnEndpoint<F> {
    /// Override the keyword defaults used by the merge
    pub fn with_defaults(mut self, defaults: ContextParams) -> Self {
        self.defaults = defaults;
        self
    }
}

impl<F> fmt::Debug for FnEndpoint<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnEndpoint").field("name", &self.name).field("defaults", &self.defaults).finish()
    }
}

#[async_trait]
impl<F, Fut> Endpoint for FnEndpoint<F>
where
    F: Fn(ExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ResponseEnvelope, ApiError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn default_params(&self) -> ContextParams {
        self.defaults.clone()
    }

    async fn call(&self, context: ExecutionContext) -> Result<ResponseEnvelope, ApiError> {
        (self.function)(context).await
    }
}

/// Wrap a closure that takes the execution context
pub fn endpoint_fn<F, Fut>(name: impl Into<String>, function: F) -> FnEndpoint<F>
where
    F: Fn(ExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ResponseEnvelope, ApiError>> + Send + 'static,
{
    FnEndpoint { name: name.into(), defaults: ContextParams::default(), function }
}

/// Wrap a closure that has no use for the context; it is built and dropped
pub fn endpoint_fn_without_context<F, Fut>(
    name: impl Into<String>,
    function: F,
) -> FnEndpoint<impl Fn(ExecutionContext) -> Fut + Send + Sync>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<ResponseEnvelope, ApiError>> + Send + 'static,
{
    endpoint_fn(name, move |_context: ExecutionContext| function())
}
