//! Client configuration and its validation.
//!
//! A [`ClientConfiguration`] can only be obtained through validation, so an
//! invalid one never reaches the transport session.

use crate::{retry::RetryPolicy, Error, Result};
use std::fmt;
use std::time::Duration;
use url::Url;

const SUBJECT: &str = "ClientConfiguration";

/// Default session timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Default per-request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Default number of items requested per listing page.
pub const DEFAULT_PAGE_SIZE: u32 = 1000;

/// An opaque secret used to authenticate against the remote service.
///
/// The value is never printed: `Debug` shows a redacted marker and there is
/// no `Display` or `Serialize` implementation. The bytes are overwritten
/// when the credential is dropped, and it cannot be cloned, so no copy
/// outlives the session that owns it.
///
/// ```compile_fail
/// let credential = outcall::Credential::new("abc");
/// let copy = credential.clone();
/// ```
pub struct Credential(String);

impl Credential {
    /// Wraps a secret.
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub(crate) fn expose(&self) -> &str {
        &self.0
    }

    fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

impl From<&str> for Credential {
    fn from(secret: &str) -> Self {
        Self::new(secret)
    }
}

impl From<String> for Credential {
    fn from(secret: String) -> Self {
        Self::new(secret)
    }
}

impl Drop for Credential {
    fn drop(&mut self) {
        wipe_string(std::mem::take(&mut self.0));
    }
}

/// Overwrites secret bytes in place.
pub(crate) fn wipe(bytes: &mut [u8]) {
    bytes.iter_mut().for_each(|b| *b = 0);
    std::hint::black_box(&*bytes);
}

/// Overwrites and frees a string that held secret material.
pub(crate) fn wipe_string(secret: String) {
    let mut bytes = secret.into_bytes();
    wipe(&mut bytes);
}

/// Validated connection parameters for a remote service.
///
/// # Examples
///
/// ```
/// use outcall::ClientConfiguration;
///
/// let config = ClientConfiguration::builder()
///     .endpoint("https://dev.example.org")
///     .organization("acme")
///     .credential("abc")
///     .timeout_secs(60)
///     .build()
///     .unwrap();
///
/// assert_eq!(config.organization(), "acme");
/// assert!(!format!("{:?}", config).contains("abc"));
/// ```
#[derive(Debug)]
pub struct ClientConfiguration {
    endpoint: Url,
    organization: String,
    credential: Credential,
    timeout: Duration,
    request_timeout: Duration,
    retry_policy: Option<RetryPolicy>,
    page_size: u32,
}

impl ClientConfiguration {
    /// Creates a new `ClientConfigurationBuilder`.
    pub fn builder() -> ClientConfigurationBuilder {
        ClientConfigurationBuilder::new()
    }

    /// Validates the four core fields, taking defaults for everything else.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationInvalid` naming the first offending field.
    pub fn new(
        endpoint: impl Into<String>,
        organization: impl Into<String>,
        credential: impl Into<Credential>,
        timeout_secs: u64,
    ) -> Result<Self> {
        Self::builder()
            .endpoint(endpoint)
            .organization(organization)
            .credential(credential)
            .timeout_secs(timeout_secs)
            .build()
    }

    /// The base URL of the remote service.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// The organization (API client) or account (storage client) name.
    pub fn organization(&self) -> &str {
        &self.organization
    }

    pub(crate) fn credential(&self) -> &Credential {
        &self.credential
    }

    /// The session-wide default timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The timeout applied to each individual request.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// The retry policy override, if one was configured.
    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry_policy.as_ref()
    }

    /// Items requested per listing page.
    pub fn page_size(&self) -> u32 {
        self.page_size
    }
}

/// Builder for [`ClientConfiguration`].
///
/// Setters only record raw values; everything is validated in
/// [`build`](ClientConfigurationBuilder::build).
#[derive(Debug)]
pub struct ClientConfigurationBuilder {
    endpoint: Option<String>,
    organization: Option<String>,
    credential: Option<Credential>,
    timeout_secs: u64,
    request_timeout: Duration,
    retry_policy: Option<RetryPolicy>,
    page_size: u32,
}

impl ClientConfigurationBuilder {
    /// Creates a builder with default timeouts and page size.
    pub fn new() -> Self {
        Self {
            endpoint: None,
            organization: None,
            credential: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            retry_policy: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Sets the base URL of the remote service.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the organization or account name.
    pub fn organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    /// Sets the credential.
    pub fn credential(mut self, credential: impl Into<Credential>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    /// Sets the session timeout in whole seconds.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Sets the per-request timeout in whole seconds.
    pub fn request_timeout_secs(self, secs: u64) -> Self {
        self.request_timeout(Duration::from_secs(secs))
    }

    /// Sets the per-request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Overrides the client's default retry policy.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Sets how many items a listing requests per page.
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Validates the recorded values and builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationInvalid` naming the first offending field.
    pub fn build(self) -> Result<ClientConfiguration> {
        let endpoint = parse_endpoint(self.endpoint.as_deref())?;

        let organization = self
            .organization
            .filter(|o| !o.trim().is_empty())
            .ok_or_else(|| Error::invalid(SUBJECT, "organization", "must not be empty"))?;

        let credential = self
            .credential
            .filter(|c| !c.is_blank())
            .ok_or_else(|| Error::invalid(SUBJECT, "credential", "is missing"))?;

        if self.timeout_secs == 0 {
            return Err(Error::invalid(SUBJECT, "timeout", "must be a positive number of seconds"));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::invalid(SUBJECT, "request_timeout", "must be positive"));
        }
        if self.page_size == 0 {
            return Err(Error::invalid(SUBJECT, "page_size", "must be positive"));
        }
        if let Some(policy) = &self.retry_policy {
            policy.validate()?;
        }

        Ok(ClientConfiguration {
            endpoint,
            organization,
            credential,
            timeout: Duration::from_secs(self.timeout_secs),
            request_timeout: self.request_timeout,
            retry_policy: self.retry_policy,
            page_size: self.page_size,
        })
    }
}

impl Default for ClientConfigurationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_endpoint(raw: Option<&str>) -> Result<Url> {
    let raw = raw
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| Error::invalid(SUBJECT, "endpoint", "is missing"))?;

    let url = Url::parse(raw)
        .map_err(|e| Error::invalid(SUBJECT, "endpoint", format!("is not a valid absolute URL ({})", e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::invalid(SUBJECT, "endpoint", "must use http or https"));
    }
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(Error::invalid(SUBJECT, "endpoint", "must have a host"));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(Error::invalid(
            SUBJECT,
            "endpoint",
            "must not embed credentials",
        ));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(Error::invalid(
            SUBJECT,
            "endpoint",
            "must not carry a query or fragment",
        ));
    }

    Ok(url)
}
