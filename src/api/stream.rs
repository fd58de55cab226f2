//! Streaming request executor
//!
//! Same contract as [`execute_request`](super::client::execute_request), but
//! the body is read chunk by chunk into a byte payload. A non-200 status is
//! reported without draining the body.

use futures::StreamExt;
use log::{debug, warn};
use reqwest::StatusCode;

use super::client::{HttpRequest, ReadMode, execute};
use super::context::ExecutionContext;
use super::envelope::{Payload, RequestMetadata, ResponseEnvelope};
use super::error::ApiError;
use crate::auth::Credential;

/// Perform one request, accumulating the body as it arrives
pub async fn execute_stream(
    request: &HttpRequest,
    credential: Option<&dyn Credential>,
    context: &ExecutionContext,
) -> Result<ResponseEnvelope, ApiError> {
    execute(request, credential, context, ReadMode::Streamed).await
}

pub(crate) async fn read_streamed(
    request: &HttpRequest,
    response: reqwest::Response,
    metadata: RequestMetadata,
) -> Result<ResponseEnvelope, ApiError> {
    let status = response.status();
    if status != StatusCode::OK {
        debug!("Stream from {} returned {}, not reading body", request.url, status);
        return Ok(ResponseEnvelope::new(status.as_u16(), Payload::Empty, false, metadata));
    }

    let mut body = Vec::new();
    let mut chunks: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| {
            warn!("Stream from {} broke after {} chunks: {}", request.url, chunks, err);
            ApiError::from_reqwest(&request.url, err)
        })?;
        chunks += 1;
        body.extend_from_slice(&chunk);
    }

    if !request.return_raw {
        if let Some(detection) = std::str::from_utf8(&body).ok().and_then(|text| request.detect_block(text)) {
            return Err(ApiError::PlatformBlock {
                url: request.url.clone(),
                kind: detection.kind,
                ip_address: detection.ip_address,
                status: status.as_u16(),
            });
        }
    }

    let size = body.len() as u64;
    Ok(ResponseEnvelope::new(status.as_u16(), Payload::Bytes(body), true, metadata)
        .with_info("chunks", chunks)
        .with_info("bytes", size))
}
