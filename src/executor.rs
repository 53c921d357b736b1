//! Single-attempt request execution and failure classification.
//!
//! [`execute`] issues one request through a [`Session`] and maps whatever
//! comes back into either a decoded [`Response`] or a classified
//! [`Error`]. Retrying is the caller's business.

use crate::{Error, Response, Result, Session};
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};
use url::Url;

/// Method, URL, headers and body of one request.
///
/// Targets are only ever built from validated values.
#[derive(Debug, Clone)]
pub struct RequestTarget {
    /// The HTTP method.
    pub method: Method,

    /// The absolute URL.
    pub url: Url,

    /// Headers on top of the session's defaults.
    pub headers: HeaderMap,

    /// The request body, if any.
    pub body: Option<Bytes>,
}

impl RequestTarget {
    /// Creates a target with no extra headers and no body.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// A `GET` target.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// A `PUT` target carrying `body`.
    pub fn put(url: Url, body: impl Into<Bytes>) -> Self {
        Self::new(Method::PUT, url).with_body(body)
    }

    /// Sets the body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Adds a header from static parts.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// Issues one request and classifies the outcome.
///
/// `timeout` bounds this request alone and overrides the session default.
/// `attempt` is only used for logging and for [`Response::attempts`].
pub async fn execute<T>(
    session: &Session,
    target: &RequestTarget,
    timeout: Duration,
    attempt: usize,
) -> Result<Response<T>>
where
    T: DeserializeOwned,
{
    let http = session.lease()?;
    let start_time = Instant::now();

    tracing::debug!(
        method = %target.method,
        url = %target.url,
        attempt = attempt,
        "Executing HTTP request"
    );

    let mut request = http
        .request(target.method.clone(), target.url.clone())
        .headers(target.headers.clone())
        .timeout(timeout);
    if let Some(body) = &target.body {
        request = request.body(body.clone());
    }

    let response = request.send().await.map_err(classify_transport)?;
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await.map_err(classify_transport)?;
    let raw_body = String::from_utf8_lossy(&body).into_owned();
    let latency = start_time.elapsed();

    tracing::info!(
        status = status.as_u16(),
        latency_ms = latency.as_millis(),
        attempt = attempt,
        "Received HTTP response"
    );

    if let Some(error) = classify_status(status, &target.url, &raw_body) {
        return Err(error);
    }

    let data = decode(status, &body)?;
    Ok(Response::new(data, raw_body, status, headers, latency, attempt))
}

/// Maps a non-success status onto the taxonomy; `None` means success.
pub fn classify_status(status: StatusCode, url: &Url, raw_body: &str) -> Option<Error> {
    match status {
        StatusCode::NON_AUTHORITATIVE_INFORMATION => {
            tracing::error!(status = status.as_u16(), "Credential rejected");
            Some(Error::CredentialRejected { status })
        }
        StatusCode::NOT_FOUND => {
            tracing::error!(status = status.as_u16(), url = %url, "Resource not found");
            Some(Error::ResourceNotFound {
                status,
                target: url.to_string(),
            })
        }
        s if !s.is_success() => {
            if s.is_server_error() {
                tracing::warn!(status = s.as_u16(), response = %raw_body, "Server error (5xx)");
            } else {
                tracing::error!(status = s.as_u16(), response = %raw_body, "Unexpected status");
            }
            Some(Error::RequestFailed {
                status: Some(s),
                message: format!("unexpected status {}", s),
                raw_response: raw_body.to_string(),
            })
        }
        _ => None,
    }
}

/// Maps a transport error onto the taxonomy.
pub fn classify_transport(error: reqwest::Error) -> Error {
    if error.is_timeout() {
        Error::TimeoutFailure {
            source: Box::new(error),
        }
    } else if error.is_connect() || is_connection_dropped(&error) {
        Error::ConnectionFailure {
            source: Box::new(error),
        }
    } else {
        Error::TransportFailure {
            source: Box::new(error),
        }
    }
}

/// Walks the source chain for a refused, reset or prematurely closed
/// connection.
fn is_connection_dropped(error: &(dyn std::error::Error + 'static)) -> bool {
    let mut cause = error.source();
    while let Some(err) = cause {
        if let Some(closed) = err.downcast_ref::<hyper::Error>() {
            if closed.is_incomplete_message() || closed.is_closed() {
                return true;
            }
        }
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ) {
                return true;
            }
        }
        cause = err.source();
    }
    false
}

/// An empty 2xx body decodes as JSON `null`.
fn decode<T>(status: StatusCode, body: &[u8]) -> Result<T>
where
    T: DeserializeOwned,
{
    let json: &[u8] = if body.trim_ascii().is_empty() { b"null" } else { body };

    serde_json::from_slice::<T>(json).map_err(|e| {
        let raw_body = String::from_utf8_lossy(body);
        tracing::error!(
            error = %e,
            status = status.as_u16(),
            raw_response = %raw_body,
            "Failed to decode response"
        );
        Error::RequestFailed {
            status: None,
            message: format!("malformed response body: {}", e),
            raw_response: raw_body.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FailureKind;

    fn url() -> Url {
        Url::parse("https://dev.example.org/acme/_apis/projects").unwrap()
    }

    #[test]
    fn test_status_classification() {
        let cases = [
            (200, None),
            (201, None),
            (204, None),
            (203, Some(FailureKind::CredentialRejected)),
            (404, Some(FailureKind::ResourceNotFound)),
            (400, Some(FailureKind::RequestFailed)),
            (401, Some(FailureKind::RequestFailed)),
            (409, Some(FailureKind::RequestFailed)),
            (500, Some(FailureKind::RequestFailed)),
            (503, Some(FailureKind::RequestFailed)),
            (302, Some(FailureKind::RequestFailed)),
        ];

        for (code, expected) in cases {
            let status = StatusCode::from_u16(code).unwrap();
            let kind = classify_status(status, &url(), "").map(|e| e.kind());
            assert_eq!(kind, expected, "status {}", code);
        }
    }

    #[test]
    fn test_unexpected_status_keeps_status_and_body() {
        let err = classify_status(StatusCode::BAD_GATEWAY, &url(), "upstream down").unwrap();
        assert_eq!(err.status(), Some(StatusCode::BAD_GATEWAY));
        assert_eq!(err.raw_response(), Some("upstream down"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_not_found_names_target() {
        match classify_status(StatusCode::NOT_FOUND, &url(), "") {
            Some(Error::ResourceNotFound { target, .. }) => {
                assert_eq!(target, "https://dev.example.org/acme/_apis/projects");
            }
            other => panic!("Expected ResourceNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_decode() {
        let value: serde_json::Value = decode(StatusCode::OK, br#"{"count": 2}"#).unwrap();
        assert_eq!(value["count"], 2);

        let empty: serde_json::Value = decode(StatusCode::CREATED, b"").unwrap();
        assert!(empty.is_null());

        let err = decode::<serde_json::Value>(StatusCode::OK, b"<html>sign in</html>").unwrap_err();
        assert_eq!(err.kind(), FailureKind::RequestFailed);
        assert_eq!(err.status(), None);
        assert_eq!(err.raw_response(), Some("<html>sign in</html>"));
    }

    #[test]
    fn test_decode_reads_bytes_not_lossy_text() {
        // "é" in Latin-1 is not valid UTF-8.
        let err = decode::<serde_json::Value>(StatusCode::OK, b"{\"name\": \"caf\xe9\"}").unwrap_err();
        assert_eq!(err.kind(), FailureKind::RequestFailed);

        let value: serde_json::Value = decode(StatusCode::OK, "{\"name\": \"café\"}".as_bytes()).unwrap();
        assert_eq!(value["name"], "café");
    }

    #[test]
    fn test_connection_drop_detection_walks_sources() {
        #[derive(Debug)]
        struct Wrapper(std::io::Error);
        impl std::fmt::Display for Wrapper {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "request failed")
            }
        }
        impl std::error::Error for Wrapper {
            fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
                Some(&self.0)
            }
        }

        let reset = Wrapper(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert!(is_connection_dropped(&reset));

        let eof = Wrapper(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        assert!(is_connection_dropped(&eof));

        let other = Wrapper(std::io::Error::from(std::io::ErrorKind::InvalidData));
        assert!(!is_connection_dropped(&other));
    }
}
