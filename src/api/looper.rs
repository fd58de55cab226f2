//! Pagination loop
//!
//! Drives the single request executor with growing offsets and accumulates
//! the records each page yields. The loop ends on an empty page, or once the
//! configured maximum is reached unless `loop_until_end` is set. Failures in
//! the caller's closures surface as [`ApiError::LoopStage`]; a failed page is
//! returned as is and no partial accumulation ever escapes.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use log::debug;
use serde_json::Value;

use super::client::{HttpRequest, RequestBody, execute_request};
use super::constants::DEFAULT_PAGE_LIMIT;
use super::context::ExecutionContext;
use super::envelope::{Payload, ResponseEnvelope};
use super::error::{ApiError, LoopStage};
use crate::auth::Credential;

/// Maps one page to its records
pub type ArrFn = Box<dyn FnMut(&ResponseEnvelope) -> anyhow::Result<Vec<Value>> + Send>;

/// Rewrites the request body before each page: `(skip, limit, body) -> body`
pub type BodyFn = Box<dyn FnMut(usize, usize, Option<Value>) -> anyhow::Result<Option<Value>> + Send>;

/// Names of the offset and page-size fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetKeys {
    pub offset: String,
    pub limit: String,
}

impl Default for OffsetKeys {
    fn default() -> Self {
        Self { offset: "offset".to_string(), limit: "limit".to_string() }
    }
}

impl OffsetKeys {
    pub fn new(offset: impl Into<String>, limit: impl Into<String>) -> Self {
        Self { offset: offset.into(), limit: limit.into() }
    }
}

/// Where the offset fields are injected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OffsetLocation {
    #[default]
    Params,
    Body,
}

/// Extractor returning the array found at a JSON pointer of each page
pub fn records_at(pointer: impl Into<String>) -> impl FnMut(&ResponseEnvelope) -> anyhow::Result<Vec<Value>> + Send {
    let pointer = pointer.into();
    move |envelope| {
        let body = envelope
            .payload
            .as_json()
            .ok_or_else(|| anyhow::anyhow!("page payload is not JSON"))?;
        match body.pointer(&pointer) {
            Some(Value::Array(items)) => Ok(items.clone()),
            Some(other) => anyhow::bail!("value at '{}' is not an array: {}", pointer, other),
            None => anyhow::bail!("page has no '{}'", pointer),
        }
    }
}

pub struct Looper {
    request: HttpRequest,
    arr_fn: ArrFn,
    body_fn: Option<BodyFn>,
    offset_keys: OffsetKeys,
    location: OffsetLocation,
    fixed_params: BTreeMap<String, Value>,
    limit: usize,
    skip: usize,
    maximum: Option<usize>,
    loop_until_end: bool,
    wait: Duration,
    return_raw: bool,
}

impl Looper {
    pub fn new<F>(request: HttpRequest, arr_fn: F) -> Self
    where
        F: FnMut(&ResponseEnvelope) -> anyhow::Result<Vec<Value>> + Send + 'static,
    {
        Self {
            request,
            arr_fn: Box::new(arr_fn),
            body_fn: None,
            offset_keys: OffsetKeys::default(),
            location: OffsetLocation::Params,
            fixed_params: BTreeMap::new(),
            limit: DEFAULT_PAGE_LIMIT,
            skip: 0,
            maximum: None,
            loop_until_end: false,
            wait: Duration::ZERO,
            return_raw: false,
        }
    }

    pub fn body_fn<F>(mut self, body_fn: F) -> Self
    where
        F: FnMut(usize, usize, Option<Value>) -> anyhow::Result<Option<Value>> + Send + 'static,
    {
        self.body_fn = Some(Box::new(body_fn));
        self
    }

    pub fn offset_keys(mut self, keys: OffsetKeys) -> Self {
        self.offset_keys = keys;
        self
    }

    pub fn offset_location(mut self, location: OffsetLocation) -> Self {
        self.location = location;
        self
    }

    pub fn fixed_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fixed_params.insert(name.into(), value.into());
        self
    }

    pub fn fixed_params(mut self, params: BTreeMap<String, Value>) -> Self {
        self.fixed_params.extend(params);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    /// Cap on accumulated records; zero means no cap
    pub fn maximum(mut self, maximum: usize) -> Self {
        self.maximum = (maximum > 0).then_some(maximum);
        self
    }

    /// Keep paging until an empty page even past the maximum
    pub fn loop_until_end(mut self, loop_until_end: bool) -> Self {
        self.loop_until_end = loop_until_end;
        self
    }

    /// Pause between pages
    pub fn wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// Return the first page untouched
    pub fn return_raw(mut self, return_raw: bool) -> Self {
        self.return_raw = return_raw;
        self
    }

    fn cap(&self) -> Option<usize> {
        if self.loop_until_end { None } else { self.maximum }
    }

    fn page_body(&mut self, skip: usize, limit: usize) -> Result<Option<RequestBody>, ApiError> {
        let url = &self.request.url;
        let template = self.request.body.clone();

        let mut body = match &mut self.body_fn {
            Some(body_fn) => {
                let current = template.as_ref().map(RequestBody::to_value);
                body_fn(skip, limit, current)
                    .map_err(|source| ApiError::LoopStage { url: url.clone(), stage: LoopStage::BodyFn, source })?
                    .map(RequestBody::Json)
            }
            None => template,
        };

        if self.location == OffsetLocation::Body {
            match &mut body {
                Some(RequestBody::Json(Value::Object(fields))) => {
                    fields.insert(self.offset_keys.offset.clone(), Value::from(skip));
                    fields.insert(self.offset_keys.limit.clone(), Value::from(limit));
                }
                None => {
                    let mut fields = serde_json::Map::new();
                    fields.insert(self.offset_keys.offset.clone(), Value::from(skip));
                    fields.insert(self.offset_keys.limit.clone(), Value::from(limit));
                    body = Some(RequestBody::Json(Value::Object(fields)));
                }
                Some(_) => {
                    return Err(ApiError::invalid_request(
                        url.clone(),
                        "offsets go in the body but the body is not a JSON object",
                    ));
                }
            }
        }

        Ok(body)
    }

    fn page_request(&mut self, skip: usize, limit: usize) -> Result<HttpRequest, ApiError> {
        let body = self.page_body(skip, limit)?;
        let mut page = self.request.clone();
        page.body = body;
        page.params.extend(self.fixed_params.clone());
        if self.location == OffsetLocation::Params {
            page.params.insert(self.offset_keys.offset.clone(), Value::from(skip));
            page.params.insert(self.offset_keys.limit.clone(), Value::from(limit));
        }
        Ok(page)
    }

    /// Fetch every page and combine the records into one envelope
    pub async fn run(
        &mut self,
        credential: Option<&dyn Credential>,
        context: &ExecutionContext,
    ) -> Result<ResponseEnvelope, ApiError> {
        if self.limit == 0 {
            return Err(ApiError::invalid_request(&self.request.url, "page limit must be positive"));
        }

        let cap = self.cap();
        let mut limit = cap.map_or(self.limit, |max| self.limit.min(max));
        let mut skip = self.skip;
        let mut records: Vec<Value> = Vec::new();
        let mut pages: u64 = 0;

        let logger = context.logger();
        let call = logger.start_call(
            self.request.method.as_str(),
            &self.request.url,
            context.parent_class(),
            context.log_level,
            context.debug_api(),
        );

        let last = loop {
            let page = self.page_request(skip, limit)?;
            let envelope = execute_request(&page, credential, context).await?;
            pages += 1;

            if !envelope.success {
                debug!("Page {} of {} failed with {}, stopping", pages, self.request.url, envelope.status);
                return Ok(envelope);
            }
            if self.return_raw || page.dry_run || context.dry_run() {
                return Ok(envelope);
            }

            let batch = (self.arr_fn)(&envelope).map_err(|source| ApiError::LoopStage {
                url: self.request.url.clone(),
                stage: LoopStage::ArrFn,
                source,
            })?;
            let received = batch.len();
            records.extend(batch);
            if let Some(max) = cap {
                records.truncate(max);
            }
            logger.log_page(&call, skip, limit, received, records.len());

            if received == 0 {
                break envelope;
            }
            if let Some(max) = cap {
                if records.len() >= max {
                    break envelope;
                }
                limit = limit.min(max - records.len());
            }

            skip += received;
            if !self.wait.is_zero() {
                tokio::time::sleep(self.wait).await;
            }
        };

        let count = records.len() as u64;
        logger.complete_call(&call, Some(last.status), true, None);
        Ok(ResponseEnvelope::new(last.status, Payload::Json(Value::Array(records)), true, last.request_metadata)
            .with_info("pages", pages)
            .with_info("records", count))
    }
}

impl fmt::Debug for Looper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Looper")
            .field("url", &self.request.url)
            .field("offset_keys", &self.offset_keys)
            .field("location", &self.location)
            .field("limit", &self.limit)
            .field("skip", &self.skip)
            .field("maximum", &self.maximum)
            .field("loop_until_end", &self.loop_until_end)
            .finish_non_exhaustive()
    }
}
