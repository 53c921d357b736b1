//! Failure taxonomy for remote calls.
//!
//! Every failure the crate reports is an [`Error`] tagged with exactly one
//! [`FailureKind`]. The kind alone decides whether a failure is worth
//! retrying, so callers (and the retry policy) never need to look at the
//! network layer again.

use http::StatusCode;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Boxed cause of a transport-level failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The closed set of failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// A configuration, context, query window or payload failed validation.
    ConfigurationInvalid,
    /// The remote service answered 203, which it does for a rejected credential.
    CredentialRejected,
    /// The remote service answered 404.
    ResourceNotFound,
    /// Any other unexpected remote answer, including a malformed 2xx body.
    RequestFailed,
    /// The connection was refused, reset or aborted.
    ConnectionFailure,
    /// The request did not complete within its timeout.
    TimeoutFailure,
    /// Any other transport fault.
    TransportFailure,
    /// A listing was requested without a container name.
    MissingContainer,
    /// The transport session was already closed.
    SessionClosed,
}

static TEMPLATES: LazyLock<HashMap<FailureKind, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        (FailureKind::ConfigurationInvalid, "validation failed"),
        (
            FailureKind::CredentialRejected,
            "credential was rejected by the remote service and might be incorrect",
        ),
        (
            FailureKind::ResourceNotFound,
            "remote resource not found, the endpoint or identifier might be incorrect",
        ),
        (FailureKind::RequestFailed, "remote request failed"),
        (
            FailureKind::ConnectionFailure,
            "remote request failed due to connection issues",
        ),
        (FailureKind::TimeoutFailure, "remote request timed out"),
        (
            FailureKind::TransportFailure,
            "remote request failed at the transport layer",
        ),
        (FailureKind::MissingContainer, "container name is required"),
        (FailureKind::SessionClosed, "transport session is closed"),
    ])
});

impl FailureKind {
    /// Returns the message template for this kind.
    pub fn template(self) -> &'static str {
        TEMPLATES.get(&self).copied().unwrap_or("remote call failed")
    }

    /// Returns `true` for the transient kinds.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureKind::ConnectionFailure | FailureKind::TimeoutFailure
        )
    }
}

/// A classified failure.
///
/// None of the variants carry the credential. URLs in the variants never
/// contain it either because authentication travels in a header.
///
/// # Examples
///
/// ```no_run
/// use outcall::{ApiClient, ClientConfiguration, Error};
///
/// # async fn example() -> Result<(), Error> {
/// let config = ClientConfiguration::builder()
///     .endpoint("https://dev.example.org")
///     .organization("acme")
///     .credential("token")
///     .build()?;
/// let client = ApiClient::open(config)?;
///
/// match client.list_collections::<serde_json::Value>().await {
///     Ok(projects) => println!("{}", projects.data),
///     Err(Error::CredentialRejected { .. }) => eprintln!("rotate the token"),
///     Err(e) if e.is_retryable() => eprintln!("try again later: {}", e),
///     Err(e) => eprintln!("giving up: {}", e),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A value failed validation before any request was built.
    #[error("{subject} {}: `{field}` {reason}", FailureKind::ConfigurationInvalid.template())]
    ConfigurationInvalid {
        /// The type being validated, e.g. `QueryWindow`.
        subject: &'static str,
        /// The offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// The remote service rejected the credential.
    #[error("{} (status {status})", FailureKind::CredentialRejected.template())]
    CredentialRejected {
        /// The status code that signalled the rejection.
        status: StatusCode,
    },

    /// The remote resource does not exist.
    #[error("{} ({target})", FailureKind::ResourceNotFound.template())]
    ResourceNotFound {
        /// The status code, normally 404.
        status: StatusCode,
        /// The request target that was not found.
        target: String,
    },

    /// The remote service answered with an unexpected status or an
    /// unparseable body.
    ///
    /// `status` is `None` when a 2xx response carried a malformed body.
    #[error(
        "{}{}: {message}",
        FailureKind::RequestFailed.template(),
        .status.map(|s| format!(" with status {}", s.as_u16())).unwrap_or_default()
    )]
    RequestFailed {
        /// The unexpected status, if any.
        status: Option<StatusCode>,
        /// A description of what went wrong.
        message: String,
        /// The raw response body.
        raw_response: String,
    },

    /// The connection was refused, reset or aborted.
    #[error("{}: {source}", FailureKind::ConnectionFailure.template())]
    ConnectionFailure {
        /// The underlying transport error.
        #[source]
        source: BoxError,
    },

    /// The request timed out.
    #[error("{}: {source}", FailureKind::TimeoutFailure.template())]
    TimeoutFailure {
        /// The underlying transport error.
        #[source]
        source: BoxError,
    },

    /// Some other transport fault occurred.
    #[error("{}: {source}", FailureKind::TransportFailure.template())]
    TransportFailure {
        /// The underlying transport error.
        #[source]
        source: BoxError,
    },

    /// No container name was given for a listing.
    #[error("{}", FailureKind::MissingContainer.template())]
    MissingContainer,

    /// The transport session was used after it was closed.
    #[error("{}", FailureKind::SessionClosed.template())]
    SessionClosed,
}

impl Error {
    pub(crate) fn invalid(subject: &'static str, field: &'static str, reason: impl Into<String>) -> Self {
        Error::ConfigurationInvalid {
            subject,
            field,
            reason: reason.into(),
        }
    }

    /// Returns the failure kind of this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::ConfigurationInvalid { .. } => FailureKind::ConfigurationInvalid,
            Error::CredentialRejected { .. } => FailureKind::CredentialRejected,
            Error::ResourceNotFound { .. } => FailureKind::ResourceNotFound,
            Error::RequestFailed { .. } => FailureKind::RequestFailed,
            Error::ConnectionFailure { .. } => FailureKind::ConnectionFailure,
            Error::TimeoutFailure { .. } => FailureKind::TimeoutFailure,
            Error::TransportFailure { .. } => FailureKind::TransportFailure,
            Error::MissingContainer => FailureKind::MissingContainer,
            Error::SessionClosed => FailureKind::SessionClosed,
        }
    }

    /// Returns `true` if this error is transient and worth retrying.
    ///
    /// Only connection failures and timeouts qualify.
    ///
    /// # Examples
    ///
    /// ```
    /// use outcall::Error;
    /// use http::StatusCode;
    ///
    /// let err = Error::CredentialRejected {
    ///     status: StatusCode::NON_AUTHORITATIVE_INFORMATION,
    /// };
    /// assert!(!err.is_retryable());
    ///
    /// let err = Error::TimeoutFailure {
    ///     source: "deadline elapsed".into(),
    /// };
    /// assert!(err.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Returns the HTTP status code if this error has one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::CredentialRejected { status } => Some(*status),
            Error::ResourceNotFound { status, .. } => Some(*status),
            Error::RequestFailed { status, .. } => *status,
            _ => None,
        }
    }

    /// Returns the raw response body if this error has one.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Error::RequestFailed { raw_response, .. } => Some(raw_response),
            _ => None,
        }
    }
}

/// A specialized `Result` type for remote calls.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_kinds_are_retryable() {
        let retryable: Vec<_> = [
            FailureKind::ConfigurationInvalid,
            FailureKind::CredentialRejected,
            FailureKind::ResourceNotFound,
            FailureKind::RequestFailed,
            FailureKind::ConnectionFailure,
            FailureKind::TimeoutFailure,
            FailureKind::TransportFailure,
            FailureKind::MissingContainer,
            FailureKind::SessionClosed,
        ]
        .into_iter()
        .filter(|k| k.is_retryable())
        .collect();

        assert_eq!(
            retryable,
            vec![FailureKind::ConnectionFailure, FailureKind::TimeoutFailure]
        );
    }

    #[test]
    fn test_every_kind_has_a_template() {
        assert_eq!(TEMPLATES.len(), 9);
        assert_eq!(
            FailureKind::TimeoutFailure.template(),
            "remote request timed out"
        );
    }

    #[test]
    fn test_configuration_invalid_names_subject_and_field() {
        let err = Error::invalid("QueryWindow", "min_time", "is not in ISO-8601 format");
        assert_eq!(err.kind(), FailureKind::ConfigurationInvalid);
        assert_eq!(
            err.to_string(),
            "QueryWindow validation failed: `min_time` is not in ISO-8601 format"
        );
    }

    #[test]
    fn test_request_failed_display() {
        let err = Error::RequestFailed {
            status: Some(StatusCode::INTERNAL_SERVER_ERROR),
            message: "unexpected status".to_string(),
            raw_response: "boom".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "remote request failed with status 500: unexpected status"
        );
        assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(err.raw_response(), Some("boom"));

        let malformed = Error::RequestFailed {
            status: None,
            message: "expected value".to_string(),
            raw_response: "<html>".to_string(),
        };
        assert_eq!(malformed.status(), None);
        assert_eq!(
            malformed.to_string(),
            "remote request failed: expected value"
        );
    }
}
