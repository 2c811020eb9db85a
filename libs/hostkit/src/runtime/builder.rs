use std::sync::Arc;
use std::time::Duration;

use super::exit::ExitFn;
use super::owner::ServiceOwner;
use crate::auth::AuthRegistry;
use crate::context::{ConfigProvider, HostServices};
use crate::contracts::LifecycleObserver;
use crate::metrics::MetricsScope;
use crate::telemetry::Tracer;

/// Builder for [`ServiceOwner`].
///
/// Everything except the name is optional: configuration defaults to empty,
/// metrics to [`NoopScope`](crate::NoopScope), tracing to
/// [`W3cTracer`](crate::W3cTracer) and the auth registry to a fresh one.
pub struct ServiceOwnerBuilder {
    services: HostServices,
    observer: Option<Arc<dyn LifecycleObserver>>,
    exit_fn: Option<ExitFn>,
    start_timeout: Option<Duration>,
}

impl ServiceOwnerBuilder {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            services: HostServices::new(name),
            observer: None,
            exit_fn: None,
            start_timeout: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.services.description = description.into();
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.services.owner = owner.into();
        self
    }

    /// Roles this service instance serves; modules declaring none of them are skipped.
    pub fn roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.services.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn config(mut self, config: Arc<dyn ConfigProvider>) -> Self {
        self.services.config = config;
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsScope>) -> Self {
        self.services.metrics = metrics;
        self
    }

    pub fn tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.services.tracer = tracer;
        self
    }

    pub fn auth_registry(mut self, registry: Arc<AuthRegistry>) -> Self {
        self.services.auth = registry;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn LifecycleObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Replace the process exit called by `start(true)`.
    pub fn exit_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(i32) + Send + Sync + 'static,
    {
        self.exit_fn = Some(Arc::new(f));
        self
    }

    /// Bound each module's `start`. Expiry counts as that module's start failure.
    pub fn start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> ServiceOwner {
        let exit_fn: ExitFn = match self.exit_fn {
            Some(f) => f,
            None => Arc::new(|code: i32| std::process::exit(code)),
        };
        ServiceOwner::from_parts(self.services, self.observer, exit_fn, self.start_timeout)
    }
}
