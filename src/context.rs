//! Sub-resource contexts and query windows for the API client.
//!
//! Both types are validated when they are built, independently of the
//! client configuration, so one client can serve many of them.

use crate::{Error, Result};
use chrono::{DateTime, FixedOffset, Months, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

/// Default result-count cap of a [`QueryWindow`].
pub const DEFAULT_TOP: u32 = 1000;

/// Identifies a repository inside a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryContext {
    project: String,
    repository: String,
}

impl RepositoryContext {
    /// Validates and builds a repository context.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationInvalid` if either name is empty or is a `.` or
    /// `..` path segment.
    pub fn new(project: impl Into<String>, repository: impl Into<String>) -> Result<Self> {
        const SUBJECT: &str = "RepositoryContext";
        let project = project.into();
        let repository = repository.into();

        check_segment(SUBJECT, "project", &project)?;
        check_segment(SUBJECT, "repository", &repository)?;

        Ok(Self { project, repository })
    }

    /// The project name.
    pub fn project(&self) -> &str {
        &self.project
    }

    /// The repository name.
    pub fn repository(&self) -> &str {
        &self.repository
    }
}

/// Checks that `value` stays a single URL path segment.
///
/// `.` and `..` are dropped or resolved by URL serialization, in plain or
/// percent-encoded form, and would silently address another resource.
pub(crate) fn check_segment(subject: &'static str, field: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::invalid(subject, field, "must not be empty"));
    }
    let decoded = value.to_ascii_lowercase().replace("%2e", ".");
    if decoded == "." || decoded == ".." {
        return Err(Error::invalid(
            subject,
            field,
            format!("{:?} is not a valid path segment", value),
        ));
    }
    Ok(())
}

/// A validated ISO-8601 timestamp that keeps the caller's spelling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timestamp {
    raw: String,
    parsed: DateTime<FixedOffset>,
}

impl Timestamp {
    fn parse(field: &'static str, raw: &str) -> Result<Self> {
        let raw = raw.trim();
        parse_iso8601(raw)
            .map(|parsed| Self {
                raw: raw.to_string(),
                parsed,
            })
            .ok_or_else(|| {
                Error::invalid(
                    QueryWindow::SUBJECT,
                    field,
                    format!("{:?} is not in ISO-8601 format", raw),
                )
            })
    }

    /// The timestamp as the caller wrote it.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The parsed instant.
    pub fn instant(&self) -> DateTime<FixedOffset> {
        self.parsed
    }

    /// The timestamp as a query-string value.
    ///
    /// A literal `+` would be read back as a space, so it is escaped.
    pub(crate) fn query_value(&self) -> String {
        self.raw.replace('+', "%2B")
    }
}

/// Accepts RFC 3339, offset-less date-times (read as UTC) and bare dates
/// (midnight UTC).
fn parse_iso8601(raw: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc().fixed_offset());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().fixed_offset())
}

/// An optional time range plus a result-count cap.
///
/// # Examples
///
/// ```
/// use outcall::QueryWindow;
///
/// let window = QueryWindow::builder()
///     .min_time("2024-03-01T00:00:00Z")
///     .max_time("2024-09-01T00:00:00Z")
///     .build()
///     .unwrap();
/// assert_eq!(window.top(), 1000);
///
/// assert!(QueryWindow::builder().min_time("yesterday").max_time("2024-09-01").build().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryWindow {
    range: Option<(Timestamp, Timestamp)>,
    top: u32,
}

impl QueryWindow {
    const SUBJECT: &'static str = "QueryWindow";

    /// Creates a new `QueryWindowBuilder`.
    pub fn builder() -> QueryWindowBuilder {
        QueryWindowBuilder::default()
    }

    /// Validates a time range with the default result cap.
    pub fn new(min_time: impl Into<String>, max_time: impl Into<String>) -> Result<Self> {
        Self::builder().min_time(min_time).max_time(max_time).build()
    }

    /// A window without time bounds.
    pub fn unbounded(top: u32) -> Result<Self> {
        Self::builder().top(top).build()
    }

    /// The window covering the last `months` months up to now, in UTC.
    pub fn trailing_months(months: u32) -> Result<Self> {
        let max = Utc::now();
        let min = max.checked_sub_months(Months::new(months)).ok_or_else(|| {
            Error::invalid(Self::SUBJECT, "min_time", "is out of the representable range")
        })?;
        Self::new(
            min.to_rfc3339_opts(SecondsFormat::Secs, true),
            max.to_rfc3339_opts(SecondsFormat::Secs, true),
        )
    }

    /// The lower time bound, if any.
    pub fn min_time(&self) -> Option<&Timestamp> {
        self.range.as_ref().map(|(min, _)| min)
    }

    /// The upper time bound, if any.
    pub fn max_time(&self) -> Option<&Timestamp> {
        self.range.as_ref().map(|(_, max)| max)
    }

    /// The result-count cap.
    pub fn top(&self) -> u32 {
        self.top
    }
}

/// Builder for [`QueryWindow`].
#[derive(Debug)]
pub struct QueryWindowBuilder {
    min_time: Option<String>,
    max_time: Option<String>,
    top: u32,
}

impl Default for QueryWindowBuilder {
    fn default() -> Self {
        Self {
            min_time: None,
            max_time: None,
            top: DEFAULT_TOP,
        }
    }
}

impl QueryWindowBuilder {
    /// Sets the lower time bound.
    pub fn min_time(mut self, min_time: impl Into<String>) -> Self {
        self.min_time = Some(min_time.into());
        self
    }

    /// Sets the upper time bound.
    pub fn max_time(mut self, max_time: impl Into<String>) -> Self {
        self.max_time = Some(max_time.into());
        self
    }

    /// Sets the result-count cap.
    pub fn top(mut self, top: u32) -> Self {
        self.top = top;
        self
    }

    /// Validates the recorded values and builds the window.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationInvalid` naming the offending field when a
    /// bound is unparseable, only one bound is given, the bounds are out of
    /// order, or `top` is zero.
    pub fn build(self) -> Result<QueryWindow> {
        let subject = QueryWindow::SUBJECT;

        if self.top == 0 {
            return Err(Error::invalid(subject, "top", "must be positive"));
        }

        let range = match (self.min_time, self.max_time) {
            (None, None) => None,
            (Some(min), Some(max)) => {
                let min = Timestamp::parse("min_time", &min)?;
                let max = Timestamp::parse("max_time", &max)?;
                if min.parsed > max.parsed {
                    return Err(Error::invalid(subject, "min_time", "must not be later than max_time"));
                }
                Some((min, max))
            }
            (Some(_), None) => {
                return Err(Error::invalid(subject, "max_time", "is required when min_time is set"))
            }
            (None, Some(_)) => {
                return Err(Error::invalid(subject, "min_time", "is required when max_time is set"))
            }
        };

        Ok(QueryWindow {
            range,
            top: self.top,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalid_field(err: Error) -> (&'static str, &'static str) {
        match err {
            Error::ConfigurationInvalid { subject, field, .. } => (subject, field),
            other => panic!("Expected ConfigurationInvalid, got {:?}", other),
        }
    }

    #[test]
    fn test_repository_context_requires_both_names() {
        let ctx = RepositoryContext::new("P", "R").unwrap();
        assert_eq!(ctx.project(), "P");
        assert_eq!(ctx.repository(), "R");

        let err = RepositoryContext::new("", "R").unwrap_err();
        assert_eq!(invalid_field(err), ("RepositoryContext", "project"));

        let err = RepositoryContext::new("P", " ").unwrap_err();
        assert_eq!(invalid_field(err), ("RepositoryContext", "repository"));
    }

    #[test]
    fn test_repository_context_rejects_dot_segments() {
        for name in [".", "..", "%2e%2E", ".%2e"] {
            let err = RepositoryContext::new(name, "R").unwrap_err();
            assert_eq!(invalid_field(err), ("RepositoryContext", "project"), "{}", name);

            let err = RepositoryContext::new("P", name).unwrap_err();
            assert_eq!(invalid_field(err), ("RepositoryContext", "repository"), "{}", name);
        }

        assert!(RepositoryContext::new("...", "R.git").is_ok());
    }

    #[test]
    fn test_window_accepts_iso8601_variants() {
        for (min, max) in [
            ("2024-03-01T00:00:00Z", "2024-09-01T00:00:00Z"),
            ("2024-03-01T00:00:00+02:00", "2024-09-01T00:00:00.123Z"),
            ("2024-03-01T00:00:00", "2024-09-01T12:30:00"),
            ("2024-03-01", "2024-09-01"),
        ] {
            let window = QueryWindow::new(min, max).unwrap();
            assert_eq!(window.min_time().unwrap().as_str(), min);
            assert_eq!(window.max_time().unwrap().as_str(), max);
        }
    }

    #[test]
    fn test_window_rejects_unparseable_min_time() {
        for bad in ["", "yesterday", "2024-13-01T00:00:00Z", "01/03/2024"] {
            let err = QueryWindow::new(bad, "2024-09-01T00:00:00Z").unwrap_err();
            assert_eq!(invalid_field(err), ("QueryWindow", "min_time"), "input {:?}", bad);
        }

        let err = QueryWindow::new("2024-03-01T00:00:00Z", "soon").unwrap_err();
        assert_eq!(invalid_field(err), ("QueryWindow", "max_time"));
    }

    #[test]
    fn test_window_requires_both_bounds_in_order() {
        let err = QueryWindow::builder()
            .min_time("2024-03-01T00:00:00Z")
            .build()
            .unwrap_err();
        assert_eq!(invalid_field(err), ("QueryWindow", "max_time"));

        let err = QueryWindow::builder()
            .max_time("2024-03-01T00:00:00Z")
            .build()
            .unwrap_err();
        assert_eq!(invalid_field(err), ("QueryWindow", "min_time"));

        let err = QueryWindow::new("2024-09-01T00:00:00Z", "2024-03-01T00:00:00Z").unwrap_err();
        assert_eq!(invalid_field(err), ("QueryWindow", "min_time"));

        assert!(QueryWindow::new("2024-03-01T00:00:00Z", "2024-03-01T00:00:00Z").is_ok());
    }

    #[test]
    fn test_window_top() {
        let err = QueryWindow::unbounded(0).unwrap_err();
        assert_eq!(invalid_field(err), ("QueryWindow", "top"));

        let window = QueryWindow::unbounded(50).unwrap();
        assert_eq!(window.top(), 50);
        assert!(window.min_time().is_none());
    }

    #[test]
    fn test_trailing_months() {
        let window = QueryWindow::trailing_months(6).unwrap();
        let min = window.min_time().unwrap();
        let max = window.max_time().unwrap();
        assert!(min.instant() < max.instant());
        assert!(max.as_str().ends_with('Z'));
    }

    #[test]
    fn test_plus_offset_is_escaped_for_queries() {
        let window = QueryWindow::new("2024-03-01T00:00:00+02:00", "2024-09-01T00:00:00Z").unwrap();
        assert_eq!(
            window.min_time().unwrap().query_value(),
            "2024-03-01T00:00:00%2B02:00"
        );
    }
}
