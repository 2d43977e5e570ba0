use std::time::{Duration, Instant};

use async_trait::async_trait;
use http::Extensions;
use reqwest::{Client, Request, Response};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Middleware, Next, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Whole-request limit for the relay's own calls to GitHub. The shared client
/// has none, since proxied completions stream for as long as they need.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Logs every outbound upstream call without its query string or headers.
pub struct UpstreamLogMiddleware;

#[async_trait]
impl Middleware for UpstreamLogMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        let method = req.method().clone();
        let target = format!(
            "{}{}",
            req.url().host_str().unwrap_or_default(),
            req.url().path()
        );
        let started = Instant::now();

        let result = next.run(req, extensions).await;
        let elapsed_ms = started.elapsed().as_millis();
        match &result {
            Ok(response) => tracing::debug!(
                "upstream {} {} -> {} in {}ms",
                method,
                target,
                response.status(),
                elapsed_ms
            ),
            Err(_) => tracing::warn!(
                "upstream {} {} failed after {}ms",
                method,
                target,
                elapsed_ms
            ),
        }
        result
    }
}

/// Build the shared upstream client. No retry layer: callers retry at their
/// own cadence.
pub fn build_upstream_client() -> ClientWithMiddleware {
    let client = Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Falling back to default HTTP client: {}", e);
            Client::new()
        });
    wrap_client(client)
}

pub fn wrap_client(client: Client) -> ClientWithMiddleware {
    ClientBuilder::new(client)
        .with(UpstreamLogMiddleware)
        .build()
}
