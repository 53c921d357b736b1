//! Authenticated transport session.
//!
//! A [`Session`] owns one pooled HTTP client with the credential attached
//! once as a default header. Requests lease a clone of that client, so any
//! number of them can be in flight at the same time and no lock is held
//! across network I/O.

use crate::{config::wipe_string, ClientConfiguration, Error, Result};
use base64::Engine;
use http::{header::AUTHORIZATION, HeaderMap, HeaderValue};
use std::sync::{PoisonError, RwLock};

/// One long-lived authenticated connection context.
///
/// The session is closed explicitly with [`close`](Session::close) or
/// implicitly when dropped. Either way the connection pool and the
/// configuration holding the credential are released exactly once.
#[derive(Debug)]
pub struct Session {
    state: RwLock<Option<SessionState>>,
}

#[derive(Debug)]
struct SessionState {
    http: reqwest::Client,
    config: ClientConfiguration,
}

impl Session {
    /// Opens a session authenticated with HTTP Basic credentials made of
    /// `username` and the configured credential.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationInvalid` if the credential cannot be carried in
    /// a header, or `TransportFailure` if the HTTP client cannot be built.
    pub fn open(config: ClientConfiguration, username: &str) -> Result<Self> {
        let plain = format!("{}:{}", username, config.credential().expose());
        let token = base64::engine::general_purpose::STANDARD.encode(plain.as_bytes());
        wipe_string(plain);
        let header = format!("Basic {}", token);
        wipe_string(token);
        let authorization = HeaderValue::from_str(&header);
        wipe_string(header);
        let mut authorization = authorization
            .map_err(|_| Error::invalid("ClientConfiguration", "credential", "cannot be sent as a header"))?;
        authorization.set_sensitive(true);

        let mut default_headers = HeaderMap::new();
        default_headers.insert(AUTHORIZATION, authorization);

        let http = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::TransportFailure { source: Box::new(e) })?;

        tracing::debug!(
            endpoint = %config.endpoint(),
            timeout_secs = config.timeout().as_secs(),
            "Opened transport session"
        );

        Ok(Self {
            state: RwLock::new(Some(SessionState { http, config })),
        })
    }

    /// Returns a handle to the pooled client for one request.
    ///
    /// # Errors
    ///
    /// Returns `SessionClosed` once the session has been closed.
    pub(crate) fn lease(&self) -> Result<reqwest::Client> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|state| state.http.clone())
            .ok_or(Error::SessionClosed)
    }

    /// Returns `true` once the session has been closed.
    pub fn is_closed(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Releases the connection pool and drops the credential.
    ///
    /// Requests already in flight finish on the connections they hold.
    ///
    /// # Errors
    ///
    /// Returns `SessionClosed` if the session was already closed.
    pub fn close(&self) -> Result<()> {
        if self.release() {
            Ok(())
        } else {
            Err(Error::SessionClosed)
        }
    }

    /// Takes the state out; `true` only for the call that actually released it.
    fn release(&self) -> bool {
        let state = self
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match state {
            Some(state) => {
                tracing::debug!(endpoint = %state.config.endpoint(), "Closed transport session");
                drop(state);
                true
            }
            None => false,
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.release();
    }
}
