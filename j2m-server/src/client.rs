//! Outbound HTTP client with request tracing.

use std::time::{Duration, Instant};

use axum::http;
use reqwest::{Client, Request, Response};
use reqwest_middleware::{
    ClientBuilder, ClientWithMiddleware, Middleware, Next, Result as MiddlewareResult,
};
use tracing::{debug, warn};
use uuid::Uuid;

pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Stamps every request with a correlation id and logs its outcome.
pub struct TraceMiddleware;

#[async_trait::async_trait]
impl Middleware for TraceMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> MiddlewareResult<Response> {
        let correlation_id = match req.headers().get(CORRELATION_ID_HEADER) {
            Some(existing) => existing.to_str().unwrap_or_default().to_string(),
            None => {
                let id = Uuid::new_v4().to_string();
                if let Ok(value) = id.parse() {
                    req.headers_mut().insert(CORRELATION_ID_HEADER, value);
                }
                id
            }
        };

        let method = req.method().clone();
        let url = req.url().clone();
        let started = Instant::now();
        let response = next.run(req, extensions).await;
        let elapsed = started.elapsed();

        match &response {
            Ok(resp) => debug!(
                "{} {} -> {} in {:?} [{}]",
                method,
                url.path(),
                resp.status(),
                elapsed,
                correlation_id
            ),
            Err(e) => warn!(
                "{} {} failed after {:?} [{}]: {}",
                method,
                url.path(),
                elapsed,
                correlation_id,
                e
            ),
        }

        response
    }
}

pub fn build_http_client() -> ClientWithMiddleware {
    let client = Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|e| {
            warn!("Falling back to default HTTP client: {}", e);
            Client::new()
        });
    ClientBuilder::new(client).with(TraceMiddleware).build()
}
