use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use http::StatusCode;

use crate::http::{Middleware, Next, Request, ResponseWriter};
use crate::metrics::{Counter, MetricsScope};

/// Body written when a handler panics.
pub const PANIC_BODY: &str = "Server Error";

/// Contains panics raised further down the chain and turns them into a 500.
pub struct PanicRecoveryMiddleware {
    panics: Arc<dyn Counter>,
}

impl PanicRecoveryMiddleware {
    pub fn new(metrics: &dyn MetricsScope) -> Self {
        Self {
            panics: metrics.counter("http.panic"),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[async_trait]
impl Middleware for PanicRecoveryMiddleware {
    fn name(&self) -> &str {
        "panic_recovery"
    }

    async fn handle(&self, req: &mut Request, resp: &mut ResponseWriter, next: Next<'_>) {
        let outcome = AssertUnwindSafe(next.run(req, resp)).catch_unwind().await;
        let Err(payload) = outcome else {
            return;
        };

        tracing::error!(
            parent: req.context().logger(),
            panic = panic_message(payload.as_ref()),
            url = %req.uri(),
            "recovered from panic in request handler"
        );
        self.panics.inc(1);

        resp.reset();
        resp.write_header(StatusCode::INTERNAL_SERVER_ERROR);
        resp.write(PANIC_BODY);
    }
}
