//! Standard middleware.
//!
//! [`default_middleware`] returns them in the order every HTTP module runs
//! them, outermost first: context attach, panic recovery, metrics, trace
//! extraction, authorization.

mod auth;
mod context;
mod metrics;
mod panic;
mod trace;

use std::sync::Arc;

pub use auth::AuthorizationMiddleware;
pub use context::ContextMiddleware;
pub use self::metrics::MetricsMiddleware;
pub use panic::{PanicRecoveryMiddleware, PANIC_BODY};
pub use trace::TraceMiddleware;

use super::Middleware;
use crate::context::ServiceHost;

/// The standard stack for `host`, outermost first.
pub fn default_middleware(host: &ServiceHost) -> Vec<Arc<dyn Middleware>> {
    let metrics = host.metrics();
    vec![
        Arc::new(ContextMiddleware::new(host.name())),
        Arc::new(PanicRecoveryMiddleware::new(metrics.as_ref())),
        Arc::new(MetricsMiddleware::new(Arc::clone(metrics))),
        Arc::new(TraceMiddleware::new(Arc::clone(host.tracer()))),
        Arc::new(AuthorizationMiddleware::new(
            host.auth_client(),
            metrics.as_ref(),
        )),
    ]
}
