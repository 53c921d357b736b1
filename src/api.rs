//! Client for the developer-platform REST API.

use crate::{
    executor::{self, RequestTarget},
    ClientConfiguration, QueryWindow, RepositoryContext, Response, Result, RetryPolicy, Session,
};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// API version sent with every request.
pub const API_VERSION: &str = "7.1-preview.1";

/// A REST API client with retries and classified failures.
///
/// The client is a cheap handle: clones share one [`Session`], and
/// operations on clones may run concurrently.
///
/// # Examples
///
/// ```no_run
/// use outcall::{ApiClient, ClientConfiguration, QueryWindow, RepositoryContext};
///
/// # async fn example() -> Result<(), outcall::Error> {
/// let config = ClientConfiguration::builder()
///     .endpoint("https://dev.example.org")
///     .organization("acme")
///     .credential("personal-access-token")
///     .build()?;
/// let context = RepositoryContext::new("Platform", "gateway")?;
/// let window = QueryWindow::trailing_months(6)?;
///
/// let pull_requests = ApiClient::scoped(config, |client| async move {
///     let (projects, pull_requests) = tokio::join!(
///         client.list_collections::<serde_json::Value>(),
///         client.list_filtered_items::<serde_json::Value>(&context, &window),
///     );
///     println!("{}", projects?.data);
///     Ok(pull_requests?.data)
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ApiClient {
    inner: Arc<ApiClientInner>,
}

#[derive(Debug)]
struct ApiClientInner {
    session: Session,
    endpoint: Url,
    organization: String,
    request_timeout: Duration,
    retry_policy: RetryPolicy,
}

impl ApiClient {
    /// Opens a session for the given configuration.
    ///
    /// The credential is sent as the password of HTTP Basic authentication
    /// with an empty user name.
    pub fn open(config: ClientConfiguration) -> Result<Self> {
        let endpoint = config.endpoint().clone();
        let organization = config.organization().to_string();
        let request_timeout = config.request_timeout();
        let retry_policy = config
            .retry_policy()
            .cloned()
            .unwrap_or_else(RetryPolicy::api_default);

        let session = Session::open(config, "")?;

        Ok(Self {
            inner: Arc::new(ApiClientInner {
                session,
                endpoint,
                organization,
                request_timeout,
                retry_policy,
            }),
        })
    }

    /// Opens a client, runs `f` with it and closes the session afterwards,
    /// whatever `f` returned.
    ///
    /// If the returned future is dropped early the session is still
    /// released once the last clone of the client goes away.
    pub async fn scoped<F, Fut, T>(config: ClientConfiguration, f: F) -> Result<T>
    where
        F: FnOnce(ApiClient) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let client = Self::open(config)?;
        let guard = client.clone();
        let result = f(client).await;
        // `f` may already have closed it.
        let _ = guard.close();
        result
    }

    /// Closes the underlying session.
    ///
    /// # Errors
    ///
    /// Returns `SessionClosed` if it was already closed.
    pub fn close(&self) -> Result<()> {
        self.inner.session.close()
    }

    /// Returns `true` once the session has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.session.is_closed()
    }

    /// Fetches all projects of the organization.
    pub async fn list_collections<T>(&self) -> Result<Response<T>>
    where
        T: DeserializeOwned,
    {
        let target = RequestTarget::get(self.collections_url());
        self.send(&target).await
    }

    /// Fetches the pull requests of a repository inside a time window.
    ///
    /// All states are included; the window's bounds and result cap are
    /// sent as search criteria.
    pub async fn list_filtered_items<T>(
        &self,
        context: &RepositoryContext,
        window: &QueryWindow,
    ) -> Result<Response<T>>
    where
        T: DeserializeOwned,
    {
        let target = RequestTarget::get(self.filtered_items_url(context, window));
        self.send(&target).await
    }

    async fn send<T>(&self, target: &RequestTarget) -> Result<Response<T>>
    where
        T: DeserializeOwned,
    {
        let inner = &self.inner;
        let (mut response, attempts) = inner
            .retry_policy
            .run(|attempt| executor::execute::<T>(&inner.session, target, inner.request_timeout, attempt))
            .await?;
        response.attempts = attempts;
        Ok(response)
    }

    fn url_with_segments<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.inner.endpoint.clone();
        // The endpoint is validated as a base URL, so segments are available.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .push(&self.inner.organization)
                .extend(segments);
        }
        url
    }

    fn collections_url(&self) -> Url {
        let mut url = self.url_with_segments(["_apis", "projects"]);
        url.set_query(Some(&format!("api-version={}", API_VERSION)));
        url
    }

    fn filtered_items_url(&self, context: &RepositoryContext, window: &QueryWindow) -> Url {
        let mut url = self.url_with_segments([
            context.project(),
            "_apis",
            "git",
            "repositories",
            context.repository(),
            "pullrequests",
        ]);

        let mut query = format!(
            "api-version={}&$top={}&searchCriteria.status=All",
            API_VERSION,
            window.top()
        );
        if let (Some(min), Some(max)) = (window.min_time(), window.max_time()) {
            query.push_str(&format!(
                "&searchCriteria.minTime={}&searchCriteria.maxTime={}",
                min.query_value(),
                max.query_value()
            ));
        }
        url.set_query(Some(&query));
        url
    }
}
