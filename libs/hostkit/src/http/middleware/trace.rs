use std::sync::Arc;

use async_trait::async_trait;
use tracing::Instrument;

use crate::http::{Middleware, Next, Request, ResponseWriter};
use crate::telemetry::Tracer;

/// Continues the caller's trace (when it sent one) with a server span.
///
/// Malformed trace headers are logged and ignored; they never fail a request.
pub struct TraceMiddleware {
    tracer: Arc<dyn Tracer>,
}

impl TraceMiddleware {
    pub fn new(tracer: Arc<dyn Tracer>) -> Self {
        Self { tracer }
    }
}

#[async_trait]
impl Middleware for TraceMiddleware {
    fn name(&self) -> &str {
        "trace"
    }

    async fn handle(&self, req: &mut Request, resp: &mut ResponseWriter, next: Next<'_>) {
        let parent = match self.tracer.extract(req.headers()) {
            Ok(parent) => parent,
            Err(err) => {
                tracing::warn!(
                    parent: req.context().logger(),
                    error = %err,
                    "ignoring malformed trace context"
                );
                None
            }
        };

        let operation = format!("{} {}", req.method(), req.uri().path());
        let span = self.tracer.start_span(&operation, parent.as_ref());
        if let Some(ctx) = span.context() {
            let ctx = req.context().with_span_context(ctx.clone());
            req.set_context(ctx);
        }

        let instrumented = span.span().clone();
        next.run(req, resp).instrument(instrumented).await;
        span.finish();
    }
}
