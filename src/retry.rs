//! Retry policy for transient failures.
//!
//! A [`RetryPolicy`] re-invokes an operation when it fails with a
//! connection failure or a timeout, waiting a jittered, exponentially
//! growing backoff between attempts. Every other failure, and every
//! success, is passed through untouched.

use crate::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Capped exponential backoff with jitter and a fixed attempt budget.
///
/// The backoff before attempt `n` (for `n >= 2`) is drawn uniformly from
/// `[upper - jitter, upper]`, floored at zero, where
/// `upper = min(initial_backoff * growth_factor^(n - 2), max_backoff)`.
///
/// # Examples
///
/// ```
/// use outcall::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::api_default();
/// assert_eq!(policy.max_attempts, 3);
///
/// // Second attempt waits between 3s and 4s, third between 9s and 10s.
/// assert_eq!(
///     policy.backoff_bounds(2),
///     Some((Duration::from_secs(3), Duration::from_secs(4)))
/// );
/// assert_eq!(
///     policy.backoff_bounds(3),
///     Some((Duration::from_secs(9), Duration::from_secs(10)))
/// );
/// assert_eq!(policy.backoff_bounds(4), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Upper bound of the first backoff.
    pub initial_backoff: Duration,
    /// Multiplier applied to the upper bound for each further attempt.
    pub growth_factor: u32,
    /// Cap on the upper bound.
    pub max_backoff: Duration,
    /// Width of the window the backoff is drawn from.
    pub jitter: Duration,
    /// Total attempts, including the first one.
    pub max_attempts: usize,
}

impl RetryPolicy {
    /// Default policy of the API client: 4s initial backoff.
    pub fn api_default() -> Self {
        Self::with_initial_backoff(Duration::from_secs(4))
    }

    /// Default policy of the storage client: 10s initial backoff.
    pub fn storage_default() -> Self {
        Self::with_initial_backoff(Duration::from_secs(10))
    }

    /// A policy that makes a single attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::api_default()
        }
    }

    fn with_initial_backoff(initial_backoff: Duration) -> Self {
        Self {
            initial_backoff,
            growth_factor: 4,
            max_backoff: Duration::from_secs(10),
            jitter: Duration::from_secs(1),
            max_attempts: 3,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        const SUBJECT: &str = "RetryPolicy";
        if self.max_attempts == 0 {
            return Err(Error::invalid(SUBJECT, "max_attempts", "must be at least 1"));
        }
        if self.growth_factor == 0 {
            return Err(Error::invalid(SUBJECT, "growth_factor", "must be at least 1"));
        }
        if self.initial_backoff > self.max_backoff {
            return Err(Error::invalid(
                SUBJECT,
                "initial_backoff",
                "must not exceed max_backoff",
            ));
        }
        Ok(())
    }

    /// Returns the `(lower, upper)` bounds of the backoff before the given
    /// attempt, or `None` when no wait applies.
    ///
    /// # Arguments
    ///
    /// * `attempt` - The attempt about to be made (1-indexed, so 2 = first retry)
    pub fn backoff_bounds(&self, attempt: usize) -> Option<(Duration, Duration)> {
        if attempt < 2 || attempt > self.max_attempts {
            return None;
        }

        let exponent = u32::try_from(attempt - 2).unwrap_or(u32::MAX);
        let upper = self
            .growth_factor
            .checked_pow(exponent)
            .and_then(|multiplier| self.initial_backoff.checked_mul(multiplier))
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff);
        let lower = upper.saturating_sub(self.jitter);

        Some((lower, upper))
    }

    /// Draws the backoff before the given attempt from its bounds.
    pub fn delay_for_attempt(&self, attempt: usize) -> Option<Duration> {
        let (lower, upper) = self.backoff_bounds(attempt)?;
        if lower == upper {
            return Some(upper);
        }
        Some(rand::thread_rng().gen_range(lower..=upper))
    }

    /// Runs `operation`, retrying transient failures.
    ///
    /// The closure receives the attempt number (1-indexed). On success the
    /// value is returned together with the number of attempts used. When the
    /// budget runs out the last failure is returned unchanged.
    ///
    /// Dropping the returned future cancels any pending backoff and no
    /// further attempt is made.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<(T, usize)>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let error = match operation(attempt).await {
                Ok(value) => return Ok((value, attempt)),
                Err(e) => e,
            };

            tracing::warn!(
                error = %error,
                kind = ?error.kind(),
                attempt = attempt,
                "Remote call failed"
            );

            if !error.is_retryable() {
                return Err(error);
            }

            match self.delay_for_attempt(attempt + 1) {
                Some(delay) => {
                    tracing::info!(
                        delay_ms = delay.as_millis(),
                        next_attempt = attempt + 1,
                        "Retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    tracing::warn!(attempts = attempt, "Retry budget exhausted");
                    return Err(error);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FailureKind;
    use http::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            initial_backoff: Duration::from_millis(4),
            growth_factor: 4,
            max_backoff: Duration::from_millis(10),
            jitter: Duration::from_millis(1),
            max_attempts: 3,
        }
    }

    fn refused() -> Error {
        Error::ConnectionFailure {
            source: Box::new(std::io::Error::from(std::io::ErrorKind::ConnectionRefused)),
        }
    }

    #[test]
    fn test_default_bounds() {
        let api = RetryPolicy::api_default();
        assert_eq!(api.backoff_bounds(1), None);
        assert_eq!(
            api.backoff_bounds(2),
            Some((Duration::from_secs(3), Duration::from_secs(4)))
        );
        assert_eq!(
            api.backoff_bounds(3),
            Some((Duration::from_secs(9), Duration::from_secs(10)))
        );

        let storage = RetryPolicy::storage_default();
        assert_eq!(
            storage.backoff_bounds(2),
            Some((Duration::from_secs(9), Duration::from_secs(10)))
        );
        assert_eq!(
            storage.backoff_bounds(3),
            Some((Duration::from_secs(9), Duration::from_secs(10)))
        );
    }

    #[test]
    fn test_bounds_are_non_decreasing() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(100),
            growth_factor: 3,
            max_backoff: Duration::from_secs(60),
            jitter: Duration::from_millis(50),
            max_attempts: 40,
        };

        let mut previous = (Duration::ZERO, Duration::ZERO);
        for attempt in 2..=40 {
            let bounds = policy.backoff_bounds(attempt).unwrap();
            assert!(bounds.0 <= bounds.1);
            assert!(bounds.0 >= previous.0 && bounds.1 >= previous.1);
            previous = bounds;
        }
        assert_eq!(previous.1, Duration::from_secs(60));
    }

    #[test]
    fn test_delay_stays_within_bounds() {
        let policy = RetryPolicy::api_default();
        for _ in 0..100 {
            let delay = policy.delay_for_attempt(2).unwrap();
            assert!(delay >= Duration::from_secs(3) && delay <= Duration::from_secs(4));
        }
        assert_eq!(RetryPolicy::none().delay_for_attempt(2), None);
    }

    #[test]
    fn test_jitter_wider_than_backoff_floors_at_zero() {
        let policy = RetryPolicy {
            jitter: Duration::from_secs(30),
            ..RetryPolicy::api_default()
        };
        assert_eq!(
            policy.backoff_bounds(2),
            Some((Duration::ZERO, Duration::from_secs(4)))
        );
    }

    #[tokio::test]
    async fn test_connection_failure_is_retried_then_surfaces_unchanged() {
        let calls = AtomicUsize::new(0);

        let result: Result<((), usize)> = fast()
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(refused()) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(Error::ConnectionFailure { source }) => {
                assert!(source.to_string().contains("refused"));
            }
            other => panic!("Expected ConnectionFailure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let calls = AtomicUsize::new(0);

        let result: Result<((), usize)> = fast()
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(Error::CredentialRejected {
                        status: StatusCode::NON_AUTHORITATIVE_INFORMATION,
                    })
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.unwrap_err().kind(), FailureKind::CredentialRejected);
    }

    #[tokio::test]
    async fn test_success_after_transient_failure_reports_attempts() {
        let (value, attempts) = fast()
            .run(|attempt| async move {
                if attempt < 2 {
                    Err(Error::TimeoutFailure {
                        source: "deadline elapsed".into(),
                    })
                } else {
                    Ok(attempt * 10)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 20);
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn test_request_failed_is_never_retried() {
        let calls = AtomicUsize::new(0);
        let result: Result<((), usize)> = fast()
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(Error::RequestFailed {
                        status: Some(StatusCode::SERVICE_UNAVAILABLE),
                        message: "unexpected status 503".to_string(),
                        raw_response: String::new(),
                    })
                }
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), FailureKind::RequestFailed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_stops_further_attempts() {
        let calls = std::sync::Arc::new(AtomicUsize::new(0));
        let slow = RetryPolicy {
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(5),
            ..fast()
        };

        let counter = calls.clone();
        let outcome = tokio::time::timeout(
            Duration::from_millis(50),
            slow.run(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(refused()) }
            }),
        )
        .await;

        assert!(outcome.is_err());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
