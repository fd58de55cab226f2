//! Request-execution core for the Domo API
//!
//! Everything a domain endpoint needs to talk to an instance: the single and
//! streaming executors, the pagination loop, bounded fan-out, the execution
//! context with its merge rule and the endpoint wrapper that ties them
//! together. Retry, client configuration and call logging live in
//! [`resilience`].

pub mod block;
pub mod client;
pub mod concurrency;
pub mod constants;
pub mod context;
pub mod endpoint;
pub mod envelope;
pub mod error;
pub mod looper;
pub mod resilience;
pub mod session;
pub mod stream;

pub use block::{BannerMatcher, BlockDetection, BlockMatcher};
pub use client::{HttpRequest, RequestBody, execute_request};
pub use concurrency::{gather_settled, gather_with_concurrency};
pub use context::{ContextParams, ExecutionContext};
pub use endpoint::{Endpoint, FnEndpoint, endpoint_fn, endpoint_fn_without_context, run_endpoint};
pub use envelope::{Payload, RequestMetadata, ResponseEnvelope};
pub use error::{ApiError, BlockKind, ErrorKind, LoopStage};
pub use looper::{Looper, OffsetKeys, OffsetLocation, records_at};
pub use resilience::{
    ApiLogger, ClientConfig, ClientConfigBuilder, LogLevel, MonitoringConfig, RetryConfig, RetryPolicy,
    RetryableError,
};
pub use session::{Session, SessionGuard};
pub use stream::execute_stream;
