use async_trait::async_trait;

use crate::context::ServiceHost;
use crate::lifecycle::ServiceExit;

/// A request-handling unit owned by a [`ServiceOwner`](crate::ServiceOwner).
///
/// Modules are heterogeneous; the owner only ever sees this capability surface.
#[async_trait]
pub trait Module: Send + Sync + 'static {
    /// Unique name, also the key of the module's configuration section.
    fn name(&self) -> &str;

    /// Kind of the module, e.g. `"http"`. Used for diagnostics only.
    fn kind(&self) -> &str;

    /// Roles this module serves. An empty list means "every role".
    fn roles(&self) -> &[String] {
        &[]
    }

    /// Called once, before the owner starts. Wire host handles here.
    async fn initialize(&self, host: ServiceHost) -> anyhow::Result<()>;

    /// Start the module. Resolves once the module is ready to serve; long-lived
    /// work continues in tasks owned by the module.
    async fn start(&self) -> anyhow::Result<()>;

    /// Stop the module and release its resources. Stopping a module that is not
    /// running must succeed.
    async fn stop(&self, exit: &ServiceExit) -> anyhow::Result<()>;

    fn is_running(&self) -> bool;
}

/// Hooks a service implementation can attach to the owner's lifecycle.
///
/// Every hook has a default so implementors only override what they need.
#[async_trait]
pub trait LifecycleObserver: Send + Sync {
    /// Runs at the beginning of [`ServiceOwner::start`](crate::ServiceOwner::start),
    /// before any module starts.
    async fn on_init(&self, _host: &ServiceHost) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs after every module has stopped and the exit has been published.
    fn on_shutdown(&self, _exit: &ServiceExit) {}

    /// Return `true` to suppress the error; `false` shuts the service down.
    fn on_critical_error(&self, _err: &anyhow::Error) -> bool {
        false
    }
}
