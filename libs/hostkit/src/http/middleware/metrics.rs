use std::sync::Arc;

use async_trait::async_trait;

use crate::http::{Middleware, Next, Request, ResponseWriter};
use crate::metrics::{MetricsScope, Stopwatch};

/// Times each request by method and counts requests by response status.
pub struct MetricsMiddleware {
    scope: Arc<dyn MetricsScope>,
}

impl MetricsMiddleware {
    pub fn new(scope: Arc<dyn MetricsScope>) -> Self {
        Self { scope }
    }
}

#[async_trait]
impl Middleware for MetricsMiddleware {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn handle(&self, req: &mut Request, resp: &mut ResponseWriter, next: Next<'_>) {
        let timer = self.scope.timer(&format!("http.latency.{}", req.method()));
        let stopwatch = Stopwatch::start(timer);

        next.run(req, resp).await;

        stopwatch.stop();
        self.scope
            .tagged(&[("status", resp.status().as_str())])
            .counter("http.requests")
            .inc(1);
    }
}
