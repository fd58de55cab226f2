//! Per-call execution context and its merge rule
//!
//! Every field of [`ExecutionContext`] is optional so that "absent" can be told
//! apart from "explicitly set". [`ContextParams`] is the flat set of keyword
//! values a call site passes; [`ExecutionContext::merge`] folds only the values
//! that differ from the endpoint's declared defaults into a pre-built context.

use once_cell::sync::Lazy;

use super::resilience::{ApiLogger, LogLevel};
use super::session::Session;

static DEFAULT_LOGGER: Lazy<ApiLogger> = Lazy::new(ApiLogger::default);

/// Stack frames dropped from diagnostics when nothing else is requested
pub const DEFAULT_STACKS_TO_DROP: usize = 1;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionContext {
    /// Connection pool to reuse; a private one is opened when absent
    pub session: Option<Session>,
    pub debug_api: Option<bool>,
    /// Diagnostic depth: frames to drop when attributing a call
    pub debug_num_stacks_to_drop: Option<usize>,
    /// Name of the calling component
    pub parent_class: Option<String>,
    pub log_level: Option<LogLevel>,
    pub dry_run: Option<bool>,
    /// Telemetry sink for this call
    pub logger: Option<ApiLogger>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_debug_api(mut self, debug_api: bool) -> Self {
        self.debug_api = Some(debug_api);
        self
    }

    pub fn with_stacks_to_drop(mut self, depth: usize) -> Self {
        self.debug_num_stacks_to_drop = Some(depth);
        self
    }

    pub fn with_parent_class(mut self, parent_class: impl Into<String>) -> Self {
        self.parent_class = Some(parent_class.into());
        self
    }

    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = Some(level);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = Some(dry_run);
        self
    }

    pub fn with_logger(mut self, logger: ApiLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn debug_api(&self) -> bool {
        self.debug_api.unwrap_or(false)
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run.unwrap_or(false)
    }

    pub fn stacks_to_drop(&self) -> usize {
        self.debug_num_stacks_to_drop.unwrap_or(DEFAULT_STACKS_TO_DROP)
    }

    pub fn parent_class(&self) -> Option<&str> {
        self.parent_class.as_deref()
    }

    /// Explicit logger, else the session's, else the process default
    pub fn logger(&self) -> &ApiLogger {
        self.logger
            .as_ref()
            .or_else(|| self.session.as_ref().map(Session::logger))
            .unwrap_or(&DEFAULT_LOGGER)
    }

    /// Build a context from a pre-built one and call-site keyword values.
    ///
    /// Without a pre-built context every keyword value is taken as is. With
    /// one, a keyword value is folded in only when it differs from the
    /// endpoint's declared default; default-valued keywords never touch it.
    pub fn merge(context: Option<ExecutionContext>, params: ContextParams, defaults: &ContextParams) -> Self {
        let Some(mut context) = context else {
            return ExecutionContext::from(params);
        };

        if params.session != defaults.session {
            context.session = params.session;
        }
        if params.debug_api != defaults.debug_api {
            context.debug_api = Some(params.debug_api);
        }
        if params.debug_num_stacks_to_drop != defaults.debug_num_stacks_to_drop {
            context.debug_num_stacks_to_drop = Some(params.debug_num_stacks_to_drop);
        }
        if params.parent_class != defaults.parent_class {
            context.parent_class = params.parent_class;
        }
        if params.log_level != defaults.log_level {
            context.log_level = params.log_level;
        }
        if params.dry_run != defaults.dry_run {
            context.dry_run = Some(params.dry_run);
        }
        if params.logger != defaults.logger {
            context.logger = params.logger;
        }

        context
    }
}

/// Keyword values as passed at a call site
#[derive(Debug, Clone, PartialEq)]
pub struct ContextParams {
    pub session: Option<Session>,
    pub debug_api: bool,
    pub debug_num_stacks_to_drop: usize,
    pub parent_class: Option<String>,
    pub log_level: Option<LogLevel>,
    pub dry_run: bool,
    pub logger: Option<ApiLogger>,
}

impl Default for ContextParams {
    fn default() -> Self {
        Self {
            session: None,
            debug_api: false,
            debug_num_stacks_to_drop: DEFAULT_STACKS_TO_DROP,
            parent_class: None,
            log_level: None,
            dry_run: false,
            logger: None,
        }
    }
}

impl ContextParams {
    pub fn session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    pub fn debug_api(mut self, debug_api: bool) -> Self {
        self.debug_api = debug_api;
        self
    }

    pub fn stacks_to_drop(mut self, depth: usize) -> Self {
        self.debug_num_stacks_to_drop = depth;
        self
    }

    pub fn parent_class(mut self, parent_class: impl Into<String>) -> Self {
        self.parent_class = Some(parent_class.into());
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = Some(level);
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn logger(mut self, logger: ApiLogger) -> Self {
        self.logger = Some(logger);
        self
    }
}

impl From<ContextParams> for ExecutionContext {
    fn from(params: ContextParams) -> Self {
        Self {
            session: params.session,
            debug_api: Some(params.debug_api),
            debug_num_stacks_to_drop: Some(params.debug_num_stacks_to_drop),
            parent_class: params.parent_class,
            log_level: params.log_level,
            dry_run: Some(params.dry_run),
            logger: params.logger,
        }
    }
}
