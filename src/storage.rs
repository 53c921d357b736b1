//! Client for the blob store.
//!
//! Uploads create their container on demand and overwrite existing blobs.
//! Listings are exposed as an [`ItemListing`] stream that fetches one page
//! at a time.

use crate::{
    context::check_segment,
    executor::{self, RequestTarget},
    ClientConfiguration, Error, Response, Result, RetryPolicy, Session,
};
use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use http::{header::CONTENT_TYPE, HeaderName, HeaderValue, Method, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use url::Url;

const BLOB_TYPE: HeaderName = HeaderName::from_static("x-ms-blob-type");

/// Content, target blob and target container of an upload.
///
/// # Examples
///
/// ```
/// use outcall::UploadPayload;
///
/// let payload = UploadPayload::text("reports", "2024/q3.txt", "all good").unwrap();
/// assert_eq!(payload.container(), "reports");
///
/// assert!(UploadPayload::text("", "blob", "x").is_err());
/// ```
#[derive(Debug, Clone)]
pub struct UploadPayload {
    container: String,
    blob: String,
    content: Bytes,
    content_type: HeaderValue,
}

impl UploadPayload {
    const SUBJECT: &'static str = "UploadPayload";

    /// Validates and builds a payload of raw bytes.
    pub fn new(
        container: impl Into<String>,
        blob: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> Result<Self> {
        Self::with_content_type(
            container,
            blob,
            content,
            HeaderValue::from_static("application/octet-stream"),
        )
    }

    /// A UTF-8 text payload.
    pub fn text(
        container: impl Into<String>,
        blob: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<Self> {
        Self::with_content_type(
            container,
            blob,
            Bytes::from(content.into()),
            HeaderValue::from_static("text/plain; charset=utf-8"),
        )
    }

    /// A payload holding `value` serialized as JSON.
    pub fn json<V: Serialize + ?Sized>(
        container: impl Into<String>,
        blob: impl Into<String>,
        value: &V,
    ) -> Result<Self> {
        let content = serde_json::to_vec(value)
            .map_err(|e| Error::invalid(Self::SUBJECT, "content", format!("cannot be serialized: {}", e)))?;
        Self::with_content_type(
            container,
            blob,
            content,
            HeaderValue::from_static("application/json"),
        )
    }

    fn with_content_type(
        container: impl Into<String>,
        blob: impl Into<String>,
        content: impl Into<Bytes>,
        content_type: HeaderValue,
    ) -> Result<Self> {
        let container = container.into();
        let blob = blob.into();

        check_segment(Self::SUBJECT, "container", &container)?;
        if blob.trim().is_empty() {
            return Err(Error::invalid(Self::SUBJECT, "blob", "must not be empty"));
        }
        // Slashes separate path segments, each of which must stand on its own.
        for segment in blob.split('/') {
            check_segment(Self::SUBJECT, "blob", segment)?;
        }

        Ok(Self {
            container,
            blob,
            content: content.into(),
            content_type,
        })
    }

    /// The target container.
    pub fn container(&self) -> &str {
        &self.container
    }

    /// The target blob name.
    pub fn blob(&self) -> &str {
        &self.blob
    }

    /// The content to upload.
    pub fn content(&self) -> &Bytes {
        &self.content
    }
}

/// What the store reported back for a finished upload.
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub container: String,
    pub blob: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    /// Attempts the upload itself needed.
    pub attempts: usize,
    /// The decoded response body; `null` when the store sent none.
    pub body: serde_json::Value,
}

/// One entry of a container listing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ItemDescriptor {
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub last_modified: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    /// Anything else the store reported.
    #[serde(flatten)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ListPage {
    #[serde(default)]
    items: Vec<ItemDescriptor>,
    #[serde(default)]
    next_marker: Option<String>,
}

/// A blob-store client with retries and classified failures.
///
/// Clones share one [`Session`].
///
/// # Examples
///
/// ```no_run
/// use futures::TryStreamExt;
/// use outcall::{ClientConfiguration, StorageClient, UploadPayload};
///
/// # async fn example() -> Result<(), outcall::Error> {
/// let config = ClientConfiguration::builder()
///     .endpoint("https://blobs.example.org")
///     .organization("myaccount")
///     .credential("account-key")
///     .build()?;
///
/// StorageClient::scoped(config, |storage| async move {
///     let payload = UploadPayload::json("people", "bubba", &serde_json::json!({"age": 77}))?;
///     let receipt = storage.upload(&payload).await?;
///     println!("uploaded with etag {:?}", receipt.etag);
///
///     let mut listing = storage.list_items("people")?;
///     while let Some(item) = listing.try_next().await? {
///         println!("{}", item.name);
///     }
///     Ok(())
/// })
/// .await
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct StorageClient {
    inner: Arc<StorageClientInner>,
}

#[derive(Debug)]
struct StorageClientInner {
    session: Session,
    endpoint: Url,
    account: String,
    request_timeout: Duration,
    retry_policy: RetryPolicy,
    page_size: u32,
}

impl StorageClient {
    /// Opens a session for the given configuration.
    ///
    /// The organization is used as the account name and as the HTTP Basic
    /// user name; the credential is the account key.
    pub fn open(config: ClientConfiguration) -> Result<Self> {
        let endpoint = config.endpoint().clone();
        let account = config.organization().to_string();
        let request_timeout = config.request_timeout();
        let page_size = config.page_size();
        let retry_policy = config
            .retry_policy()
            .cloned()
            .unwrap_or_else(RetryPolicy::storage_default);

        let session = Session::open(config, &account)?;

        Ok(Self {
            inner: Arc::new(StorageClientInner {
                session,
                endpoint,
                account,
                request_timeout,
                retry_policy,
                page_size,
            }),
        })
    }

    /// Opens a client, runs `f` with it and closes the session afterwards,
    /// whatever `f` returned.
    pub async fn scoped<F, Fut, T>(config: ClientConfiguration, f: F) -> Result<T>
    where
        F: FnOnce(StorageClient) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let client = Self::open(config)?;
        let guard = client.clone();
        let result = f(client).await;
        let _ = guard.close();
        result
    }

    /// Closes the underlying session.
    pub fn close(&self) -> Result<()> {
        self.inner.session.close()
    }

    /// Returns `true` once the session has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.session.is_closed()
    }

    /// Uploads a payload, creating its container first if needed.
    ///
    /// Existing blobs are overwritten without any concurrency check. A
    /// container created concurrently by someone else is not an error.
    pub async fn upload(&self, payload: &UploadPayload) -> Result<UploadReceipt> {
        self.ensure_container(payload.container()).await?;

        let target = RequestTarget::put(
            self.blob_url(payload.container(), payload.blob()),
            payload.content().clone(),
        )
        .with_header(BLOB_TYPE, HeaderValue::from_static("BlockBlob"))
        .with_header(CONTENT_TYPE, payload.content_type.clone());

        let response = self.send::<serde_json::Value>(&target).await?;

        tracing::info!(
            container = %payload.container(),
            blob = %payload.blob(),
            bytes = payload.content().len(),
            attempts = response.attempts,
            "Uploaded blob"
        );

        Ok(UploadReceipt {
            container: payload.container().to_string(),
            blob: payload.blob().to_string(),
            etag: response.header("etag").map(str::to_string),
            last_modified: response.header("last-modified").map(str::to_string),
            attempts: response.attempts,
            body: response.data,
        })
    }

    /// Lists the blobs of a container lazily, in the order the store
    /// returns them.
    ///
    /// # Errors
    ///
    /// Fails immediately with `MissingContainer` if `container` is blank, and
    /// with `ConfigurationInvalid` if it is a `.` or `..` path segment.
    /// Remote failures are yielded by the stream, which ends after them.
    pub fn list_items(&self, container: &str) -> Result<ItemListing> {
        if container.trim().is_empty() {
            return Err(Error::MissingContainer);
        }
        check_segment("StorageClient", "container", container)?;

        let state = ListState {
            client: self.clone(),
            container: container.to_string(),
            buffer: VecDeque::new(),
            marker: None,
            exhausted: false,
        };

        let items = stream::try_unfold(state, next_entry);

        Ok(ItemListing {
            items: items.boxed(),
        })
    }

    async fn ensure_container(&self, container: &str) -> Result<()> {
        let url = self.container_url(container);

        match self.send::<serde_json::Value>(&RequestTarget::get(url.clone())).await {
            Ok(_) => return Ok(()),
            Err(Error::ResourceNotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        tracing::info!(container = %container, "Creating container");

        match self
            .send::<serde_json::Value>(&RequestTarget::new(Method::PUT, url))
            .await
        {
            Ok(_) => Ok(()),
            Err(Error::RequestFailed {
                status: Some(StatusCode::CONFLICT),
                ..
            }) => {
                tracing::debug!(container = %container, "Container already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_page(&self, container: &str, marker: Option<&str>) -> Result<ListPage> {
        let mut url = self.container_url(container);
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("comp", "list")
                .append_pair("maxresults", &self.inner.page_size.to_string());
            if let Some(marker) = marker {
                query.append_pair("marker", marker);
            }
        }

        let page = self.send::<ListPage>(&RequestTarget::get(url)).await?;
        tracing::debug!(
            container = %container,
            items = page.data.items.len(),
            more = page.data.next_marker.is_some(),
            "Fetched listing page"
        );
        Ok(page.data)
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

    fn container_url(&self, container: &str) -> Url {
        let mut url = self.url_with_segments([container]);
        url.query_pairs_mut().append_pair("restype", "container");
        url
    }

    /// Slashes in blob names stay path separators.
    fn blob_url(&self, container: &str, blob: &str) -> Url {
        self.url_with_segments(std::iter::once(container).chain(blob.split('/')))
    }

    fn url_with_segments<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.inner.endpoint.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push(&self.inner.account).extend(segments);
        }
        url
    }
}

struct ListState {
    client: StorageClient,
    container: String,
    buffer: VecDeque<ItemDescriptor>,
    marker: Option<String>,
    exhausted: bool,
}

async fn next_entry(mut state: ListState) -> Result<Option<(ItemDescriptor, ListState)>> {
    loop {
        if let Some(item) = state.buffer.pop_front() {
            return Ok(Some((item, state)));
        }
        if state.exhausted {
            return Ok(None);
        }

        let page = state
            .client
            .fetch_page(&state.container, state.marker.as_deref())
            .await?;
        state.marker = page.next_marker.filter(|m| !m.is_empty());
        state.exhausted = state.marker.is_none();
        state.buffer.extend(page.items);
    }
}

/// A lazy, forward-only listing of a container.
///
/// Pages are fetched as the stream is polled, so arbitrarily large
/// containers can be walked. The listing cannot be cloned or restarted and
/// polling it requires exclusive access, so it has one consumer at a time.
/// After the first error the stream ends.
pub struct ItemListing {
    items: BoxStream<'static, Result<ItemDescriptor>>,
}

impl ItemListing {
    /// Pulls the next descriptor.
    pub async fn next_item(&mut self) -> Option<Result<ItemDescriptor>> {
        self.items.next().await
    }
}

impl Stream for ItemListing {
    type Item = Result<ItemDescriptor>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.items.poll_next_unpin(cx)
    }
}

impl std::fmt::Debug for ItemListing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemListing").finish_non_exhaustive()
    }
}
