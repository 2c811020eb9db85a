use async_trait::async_trait;
use http::HeaderValue;
use tracing::field::Empty;
use tracing::Instrument;
use uuid::Uuid;

use crate::http::{Middleware, Next, Request, ResponseWriter, REQUEST_ID_HEADER};

/// Binds the request-scoped logger span and request id to the context.
///
/// The request id comes from `x-request-id` when the caller sent one and is
/// echoed back on the response.
#[derive(Debug, Clone)]
pub struct ContextMiddleware {
    service: String,
}

impl ContextMiddleware {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

fn request_id(req: &Request) -> String {
    req.headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

#[async_trait]
impl Middleware for ContextMiddleware {
    fn name(&self) -> &str {
        "context"
    }

    async fn handle(&self, req: &mut Request, resp: &mut ResponseWriter, next: Next<'_>) {
        let rid = request_id(req);
        let span = tracing::info_span!(
            "http_request",
            service = %self.service,
            method = %req.method(),
            uri = %req.uri().path(),
            request_id = %rid,
            status = Empty,
            latency_ms = Empty,
        );

        let ctx = req
            .context()
            .with_request_id(rid.as_str())
            .with_logger(span.clone());
        req.set_context(ctx);

        let started = std::time::Instant::now();
        next.run(req, resp).instrument(span.clone()).await;

        span.record("status", resp.status().as_u16());
        span.record("latency_ms", started.elapsed().as_millis() as u64);
        if let Ok(value) = HeaderValue::from_str(&rid) {
            resp.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
    }
}
