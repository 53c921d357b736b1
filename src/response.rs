//! Decoded success results.

use http::{HeaderMap, StatusCode};
use std::time::Duration;

/// A decoded 2xx response together with what the client learned while
/// obtaining it.
///
/// # Examples
///
/// ```no_run
/// use outcall::{ApiClient, ClientConfiguration};
///
/// # async fn example() -> Result<(), outcall::Error> {
/// # let config = ClientConfiguration::new("https://dev.example.org", "acme", "abc", 60)?;
/// let client = ApiClient::open(config)?;
/// let projects = client.list_collections::<serde_json::Value>().await?;
///
/// if projects.was_retried() {
///     println!("needed {} attempts", projects.attempts);
/// }
/// println!("{} in {:?}", projects.status, projects.latency);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Response<T> {
    /// The decoded body.
    pub data: T,

    /// The body as received, read as UTF-8 with invalid bytes replaced.
    pub raw_body: String,

    /// The response status, always 2xx.
    pub status: StatusCode,

    /// The response headers.
    pub headers: HeaderMap,

    /// Time spent on the successful attempt.
    pub latency: Duration,

    /// Attempts used, `1` when no retry was needed.
    pub attempts: usize,
}

impl<T> Response<T> {
    /// Creates a new `Response`.
    pub fn new(
        data: T,
        raw_body: String,
        status: StatusCode,
        headers: HeaderMap,
        latency: Duration,
        attempts: usize,
    ) -> Self {
        Self {
            data,
            raw_body,
            status,
            headers,
            latency,
            attempts,
        }
    }

    /// Returns `true` if more than one attempt was needed.
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }

    /// Returns a header value by name, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_header_lookup() {
        let mut headers = HeaderMap::new();
        headers.insert("etag", HeaderValue::from_static("\"0x8D\""));

        let response = Response::new((), String::new(), StatusCode::CREATED, headers, Duration::ZERO, 2);

        assert_eq!(response.header("ETag"), Some("\"0x8D\""));
        assert_eq!(response.header("last-modified"), None);
        assert!(response.was_retried());
    }
}
