//! Connection-pool sessions and their scoped acquisition
//!
//! A caller-supplied session is borrowed and never closed by the callee. A
//! session the executor creates for itself is closed when its guard drops,
//! whichever way the call exits.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;
use uuid::Uuid;

use super::context::ExecutionContext;
use super::error::ApiError;
use super::resilience::{ApiLogger, ClientConfig};

/// Shared connection pool
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: Uuid,
    client: reqwest::Client,
    no_redirect_client: reqwest::Client,
    config: ClientConfig,
    logger: ApiLogger,
    closed: AtomicBool,
}

impl Session {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let client = Self::builder(config).build().map_err(|e| ApiError::from_reqwest("session", e))?;
        let no_redirect_client = Self::builder(config)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ApiError::from_reqwest("session", e))?;

        let id = Uuid::new_v4();
        debug!("Opened session {}", id);

        Ok(Self {
            inner: Arc::new(SessionInner {
                id,
                client,
                no_redirect_client,
                config: config.clone(),
                logger: ApiLogger::new(config.monitoring.clone()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    fn builder(config: &ClientConfig) -> reqwest::ClientBuilder {
        reqwest::Client::builder()
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(config.pool_idle_timeout)
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Logger built from the session's monitoring settings
    pub fn logger(&self) -> &ApiLogger {
        &self.inner.logger
    }

    /// Client honoring the requested redirect behavior
    pub fn client(&self, follow_redirects: bool) -> Result<&reqwest::Client, ApiError> {
        if self.is_closed() {
            return Err(ApiError::invalid_request(
                format!("session {}", self.inner.id),
                "session is closed",
            ));
        }
        Ok(if follow_redirects { &self.inner.client } else { &self.inner.no_redirect_client })
    }

    /// Mark the session closed; later requests through it are refused
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            debug!("Closed session {}", self.inner.id);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Session acquired for the duration of one call
pub enum SessionGuard<'a> {
    Borrowed(&'a Session),
    Owned(Session),
}

impl<'a> SessionGuard<'a> {
    /// Reuse the context's session or open a private one
    pub fn acquire(context: &'a ExecutionContext) -> Result<Self, ApiError> {
        match context.session.as_ref() {
            Some(session) => Ok(SessionGuard::Borrowed(session)),
            None => Ok(SessionGuard::Owned(Session::new(&ClientConfig::default())?)),
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, SessionGuard::Owned(_))
    }
}

impl Deref for SessionGuard<'_> {
    type Target = Session;

    fn deref(&self) -> &Session {
        match self {
            SessionGuard::Borrowed(session) => session,
            SessionGuard::Owned(session) => session,
        }
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if let SessionGuard::Owned(session) = self {
            session.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owned_session_closed_on_drop() {
        let context = ExecutionContext::default();
        let guard = SessionGuard::acquire(&context).unwrap();
        assert!(guard.is_owned());
        let session = (*guard).clone();

        drop(guard);
        assert!(session.is_closed());
        assert!(session.client(true).is_err());
    }

    #[test]
    fn test_borrowed_session_left_open() {
        let session = Session::new(&ClientConfig::default()).unwrap();
        let context = ExecutionContext::default().with_session(session.clone());

        {
            let guard = SessionGuard::acquire(&context).unwrap();
            assert!(!guard.is_owned());
            assert_eq!(*guard, session);
        }

        assert!(!session.is_closed());
        assert!(session.client(false).is_ok());
    }

    #[test]
    fn test_sessions_compare_by_identity() {
        let a = Session::new(&ClientConfig::default()).unwrap();
        let b = Session::new(&ClientConfig::default()).unwrap();
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }
}
