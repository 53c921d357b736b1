//! Fetches the projects of an organization and the pull requests of one
//! repository from the last six months, concurrently over one session.
//!
//! Configuration comes from the environment:
//!
//! - `ADO__BASE_ADDRESS`, `ADO__ORG`, `ADO__PAT` (required)
//! - `ADO__PROJECT`, `ADO__REPO` (required)
//! - `ADO__HTTP_TIMEOUT_SECONDS` (optional, defaults to 60)
//!
//! Run with `RUST_LOG=outcall=debug` to see request and retry events.

use outcall::{
    ApiClient, ClientConfiguration, Error, QueryWindow, RepositoryContext, DEFAULT_TIMEOUT_SECS,
};
use tracing_subscriber::EnvFilter;

fn var(name: &str) -> String {
    std::env::var(name).unwrap_or_default()
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let timeout_secs = match std::env::var("ADO__HTTP_TIMEOUT_SECONDS") {
        Ok(raw) => raw.trim().parse().unwrap_or(0),
        Err(_) => DEFAULT_TIMEOUT_SECS,
    };

    let config = ClientConfiguration::builder()
        .endpoint(var("ADO__BASE_ADDRESS"))
        .organization(var("ADO__ORG"))
        .credential(var("ADO__PAT"))
        .timeout_secs(timeout_secs)
        .build()?;
    let context = RepositoryContext::new(var("ADO__PROJECT"), var("ADO__REPO"))?;
    let window = QueryWindow::trailing_months(6)?;

    let (projects, pull_requests) = ApiClient::scoped(config, |client| async move {
        let (projects, pull_requests) = tokio::join!(
            client.list_collections::<serde_json::Value>(),
            client.list_filtered_items::<serde_json::Value>(&context, &window),
        );
        Ok((projects?, pull_requests?))
    })
    .await?;

    println!(
        "Projects ({} attempt(s)): {}",
        projects.attempts, projects.data
    );
    println!(
        "Pull requests ({} attempt(s)): {}",
        pull_requests.attempts, pull_requests.data
    );

    Ok(())
}
