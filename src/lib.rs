//! Request-execution core of a Domo API client
//!
//! Credentials supply headers and manage their tokens, executors turn one
//! [`HttpRequest`] into a [`ResponseEnvelope`], and the [`Looper`] and
//! fan-out helpers build on them. Domain endpoints are wrapped with
//! [`run_endpoint`] so every call goes through the same context merge and
//! envelope check.

pub mod api;
pub mod auth;

pub use api::{
    ApiError, ContextParams, ExecutionContext, HttpRequest, Looper, Payload, ResponseEnvelope, RetryPolicy,
    Session, execute_request, execute_stream, gather_settled, gather_with_concurrency, run_endpoint,
};
pub use auth::{
    AccessTokenCredential, BaseCredential, ClientCredential, Credential, EmbeddedEnvironmentCredential,
    UsernamePasswordCredential,
};
