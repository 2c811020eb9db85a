use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;

use crate::auth::AuthClient;
use crate::http::{Middleware, Next, Request, ResponseWriter};
use crate::metrics::{Counter, MetricsScope};

/// Rejects requests the active auth client does not authorize.
pub struct AuthorizationMiddleware {
    client: Arc<dyn AuthClient>,
    failures: Arc<dyn Counter>,
}

impl AuthorizationMiddleware {
    pub fn new(client: Arc<dyn AuthClient>, metrics: &dyn MetricsScope) -> Self {
        Self {
            client,
            failures: metrics.counter("http.auth.fail"),
        }
    }
}

#[async_trait]
impl Middleware for AuthorizationMiddleware {
    fn name(&self) -> &str {
        "authorization"
    }

    async fn handle(&self, req: &mut Request, resp: &mut ResponseWriter, next: Next<'_>) {
        if let Err(err) = self.client.authorize(req.context()).await {
            tracing::info!(
                parent: req.context().logger(),
                client = self.client.name(),
                error = %err,
                "request not authorized"
            );
            self.failures.inc(1);
            resp.write_header(StatusCode::UNAUTHORIZED);
            resp.write(format!("Unauthorized access: {err}"));
            return;
        }
        next.run(req, resp).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{FailureClient, NoopClient};
    use crate::http::{handler_fn, ChainBuilder};
    use crate::metrics::InMemoryScope;
    use http::Method;
    use std::sync::atomic::{AtomicBool, Ordering};

    async fn run(client: Arc<dyn AuthClient>, metrics: &InMemoryScope) -> (ResponseWriter, bool) {
        let called = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&called);
        let chain = ChainBuilder::new()
            .add_middleware([
                Arc::new(AuthorizationMiddleware::new(client, metrics)) as Arc<dyn Middleware>
            ])
            .build(Arc::new(handler_fn(move |_req, resp| {
                flag.store(true, Ordering::SeqCst);
                resp.write("secret");
            })));

        let mut req = Request::new(Method::GET, "/".parse().unwrap());
        let mut resp = ResponseWriter::new();
        chain.handle(&mut req, &mut resp).await;
        (resp, called.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn failure_short_circuits_with_401() {
        let metrics = InMemoryScope::new();
        let (resp, called) = run(Arc::new(FailureClient), &metrics).await;

        assert!(!called);
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            resp.body(),
            b"Unauthorized access: Error authorizing the service"
        );
        assert_eq!(metrics.counter_value("http.auth.fail", &[]), 1);
    }

    #[tokio::test]
    async fn success_passes_through() {
        let metrics = InMemoryScope::new();
        let (resp, called) = run(Arc::new(NoopClient), &metrics).await;

        assert!(called);
        assert_eq!(resp.body(), b"secret");
        assert_eq!(metrics.counter_value("http.auth.fail", &[]), 0);
    }
}
