//! # outcall - resilient clients for remote services
//!
//! `outcall` provides two async clients built on one small core:
//!
//! - [`ApiClient`] for a developer-platform REST API (projects, pull requests)
//! - [`StorageClient`] for a blob store (uploads, lazy container listings)
//!
//! Both validate their inputs before touching the network, authenticate
//! once per [`Session`], classify every failure into a closed
//! [`FailureKind`] taxonomy and retry only transient failures, with capped
//! exponential backoff and jitter.
//!
//! ## Quick Start
//!
//! ```no_run
//! use outcall::{ApiClient, ClientConfiguration, QueryWindow, RepositoryContext};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), outcall::Error> {
//!     let config = ClientConfiguration::builder()
//!         .endpoint("https://dev.example.org")
//!         .organization("acme")
//!         .credential("personal-access-token")
//!         .timeout_secs(60)
//!         .build()?;
//!
//!     let context = RepositoryContext::new("Platform", "gateway")?;
//!     let window = QueryWindow::new("2024-03-01T00:00:00Z", "2024-09-01T00:00:00Z")?;
//!
//!     let client = ApiClient::open(config)?;
//!     let pull_requests = client
//!         .list_filtered_items::<serde_json::Value>(&context, &window)
//!         .await?;
//!     println!("{} after {} attempt(s)", pull_requests.data, pull_requests.attempts);
//!
//!     client.close()
//! }
//! ```
//!
//! ## Failure handling
//!
//! | Condition | Kind | Retried |
//! |---|---|---|
//! | Invalid configuration or arguments | `ConfigurationInvalid` | no |
//! | Status 203 | `CredentialRejected` | no |
//! | Status 404 | `ResourceNotFound` | no |
//! | Other non-2xx, or malformed 2xx body | `RequestFailed` | no |
//! | Connection refused or reset | `ConnectionFailure` | yes |
//! | Timeout | `TimeoutFailure` | yes |
//! | Other transport fault | `TransportFailure` | no |
//!
//! When retries run out the last failure is returned as it was.

mod api;
mod config;
mod context;
mod error;
pub mod executor;
mod response;
pub mod retry;
mod session;
mod storage;

pub use api::{ApiClient, API_VERSION};
pub use config::{
    ClientConfiguration, ClientConfigurationBuilder, Credential, DEFAULT_PAGE_SIZE,
    DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_TIMEOUT_SECS,
};
pub use context::{QueryWindow, QueryWindowBuilder, RepositoryContext, Timestamp, DEFAULT_TOP};
pub use error::{BoxError, Error, FailureKind, Result};
pub use response::Response;
pub use retry::RetryPolicy;
pub use session::Session;
pub use storage::{ItemDescriptor, ItemListing, StorageClient, UploadPayload, UploadReceipt};
