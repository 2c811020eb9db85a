use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinSet;

use super::builder::ServiceOwnerBuilder;
use super::exit::{exit_channel, ExitFn, ExitReceiver, ExitSender};
use crate::context::{HostServices, ServiceHost};
use crate::contracts::{LifecycleObserver, Module};
use crate::error::HostError;
use crate::lifecycle::{ServiceExit, ServiceState};
use crate::metrics::Counter;

/// Shutdown bookkeeping. Only ever touched under `OwnerInner::lifecycle`.
#[derive(Default)]
struct Lifecycle {
    /// Set by `start`; from then on modules can no longer be added.
    locked: bool,
    exit_tx: Option<ExitSender>,
    exit_rx: Option<ExitReceiver>,
    shutdown_reason: Option<ServiceExit>,
}

struct OwnerMetrics {
    started: Arc<dyn Counter>,
    start_failed: Arc<dyn Counter>,
    stop_failed: Arc<dyn Counter>,
}

pub(crate) struct OwnerInner {
    services: Arc<HostServices>,
    observer: Option<Arc<dyn LifecycleObserver>>,
    exit_fn: ExitFn,
    start_timeout: Option<Duration>,
    modules: RwLock<Vec<Arc<dyn Module>>>,
    lifecycle: Mutex<Lifecycle>,
    /// `true` while `start` is fanning out to the modules.
    fanout: watch::Sender<bool>,
    metrics: OwnerMetrics,
}

impl OwnerInner {
    fn host(self: &Arc<Self>) -> ServiceHost {
        ServiceHost::attached(Arc::clone(&self.services), Arc::downgrade(self))
    }

    /// Move the service state forward unless a shutdown has been claimed.
    fn advance(&self, to: ServiceState) -> bool {
        let lc = self.lifecycle.lock();
        if lc.shutdown_reason.is_some() {
            return false;
        }
        self.services.state.transition(to);
        true
    }

    /// Enter `Starting` and mark the module fan-out as in flight.
    fn begin_fanout(&self) -> bool {
        let lc = self.lifecycle.lock();
        if lc.shutdown_reason.is_some() {
            return false;
        }
        self.services.state.transition(ServiceState::Starting);
        self.fanout.send_replace(true);
        true
    }

    fn end_fanout(&self) {
        self.fanout.send_replace(false);
    }

    /// Stop every running module and publish the exit.
    ///
    /// Returns `None` when the service was never started or a shutdown is
    /// already in flight. A shutdown claimed while modules are still starting
    /// waits for the start fan-out, so that late starters are stopped too.
    /// Modules must therefore not await `on_critical_error` from `start`.
    pub(crate) async fn shutdown(
        self: &Arc<Self>,
        error: Option<anyhow::Error>,
        reason: &str,
        exit_code: Option<i32>,
    ) -> Option<ServiceExit> {
        let exit = {
            let mut lc = self.lifecycle.lock();
            if lc.shutdown_reason.is_some() || lc.exit_tx.is_none() {
                return None;
            }
            let exit = ServiceExit::new(reason, error, exit_code);
            lc.shutdown_reason = Some(exit.clone());
            self.services.state.transition(ServiceState::Stopping);
            exit
        };

        tracing::info!(
            service = %self.services.name,
            reason = %exit.reason,
            exit_code = exit.exit_code,
            "Phase: stop"
        );

        let mut fanout = self.fanout.subscribe();
        if *fanout.borrow() {
            tracing::debug!(service = %self.services.name, "waiting for modules still starting");
        }
        let _ = fanout.wait_for(|busy| !busy).await;

        let running: Vec<_> = self
            .modules
            .read()
            .iter()
            .filter(|m| m.is_running())
            .cloned()
            .collect();

        let mut set = JoinSet::new();
        for module in running {
            let exit = exit.clone();
            set.spawn(async move {
                let name = module.name().to_string();
                let res = AssertUnwindSafe(module.stop(&exit))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(anyhow::anyhow!("module panicked while stopping")));
                (name, res)
            });
        }

        let mut failures = BTreeMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((name, Err(err))) => {
                    failures.insert(name, err);
                }
                Err(err) => {
                    failures.insert(String::from("<unknown>"), anyhow::Error::new(err));
                }
            }
        }
        for (name, err) in &failures {
            self.metrics.stop_failed.inc(1);
            tracing::warn!(module = %name, error = %err, "Failed to stop module");
        }

        let tx = {
            let mut lc = self.lifecycle.lock();
            self.services.state.transition(ServiceState::Stopped);
            lc.exit_tx.take()
        };
        if let Some(tx) = tx {
            tx.send_replace(Some(exit.clone()));
        }

        if let Some(observer) = &self.observer {
            observer.on_shutdown(&exit);
        }
        tracing::info!(service = %self.services.name, "service stopped");
        Some(exit)
    }

    pub(crate) async fn on_critical_error(self: &Arc<Self>, err: anyhow::Error) {
        if let Some(observer) = &self.observer {
            if observer.on_critical_error(&err) {
                tracing::warn!(service = %self.services.name, error = %err, "critical error suppressed by observer");
                return;
            }
        }
        tracing::error!(service = %self.services.name, error = %err, "critical error, shutting down");
        self.shutdown(Some(err), "critical error", None).await;
    }

    async fn start_one(
        module: Arc<dyn Module>,
        timeout: Option<Duration>,
    ) -> Result<(), HostError> {
        let name = module.name().to_string();
        let start = AssertUnwindSafe(module.start()).catch_unwind();
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, start).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(HostError::StartTimeout {
                        module: name,
                        timeout: limit,
                    })
                }
            },
            None => start.await,
        };
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(HostError::ModuleStart {
                module: name,
                source,
            }),
            Err(_) => Err(HostError::ModuleStart {
                module: name,
                source: anyhow::anyhow!("module panicked while starting"),
            }),
        }
    }
}

/// Owns a set of modules and drives them through the service lifecycle.
///
/// Cloning yields another handle to the same owner.
#[derive(Clone)]
pub struct ServiceOwner {
    inner: Arc<OwnerInner>,
}

impl std::fmt::Debug for ServiceOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceOwner")
            .field("name", &self.inner.services.name)
            .field("state", &self.state())
            .field("modules", &self.module_names())
            .finish()
    }
}

impl ServiceOwner {
    pub fn builder(name: impl Into<String>) -> ServiceOwnerBuilder {
        ServiceOwnerBuilder::new(name)
    }

    pub(crate) fn from_parts(
        services: HostServices,
        observer: Option<Arc<dyn LifecycleObserver>>,
        exit_fn: ExitFn,
        start_timeout: Option<Duration>,
    ) -> Self {
        let metrics = OwnerMetrics {
            started: services.metrics.counter("service.modules.started"),
            start_failed: services.metrics.counter("service.modules.start_failed"),
            stop_failed: services.metrics.counter("service.modules.stop_failed"),
        };
        Self {
            inner: Arc::new(OwnerInner {
                services: Arc::new(services),
                observer,
                exit_fn,
                start_timeout,
                modules: RwLock::new(Vec::new()),
                lifecycle: Mutex::new(Lifecycle::default()),
                fanout: watch::channel(false).0,
                metrics,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.services.name
    }

    /// Host handle as given to modules.
    pub fn host(&self) -> ServiceHost {
        self.inner.host()
    }

    pub fn state(&self) -> ServiceState {
        self.inner.services.state.get()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ServiceState::Running
    }

    /// Snapshot of the registered modules, in registration order.
    pub fn modules(&self) -> Vec<Arc<dyn Module>> {
        self.inner.modules.read().clone()
    }

    fn module_names(&self) -> Vec<String> {
        self.inner
            .modules
            .read()
            .iter()
            .map(|m| m.name().to_string())
            .collect()
    }

    /// Exit channel, once `start` has been called.
    pub fn exit_receiver(&self) -> Option<ExitReceiver> {
        self.inner.lifecycle.lock().exit_rx.clone()
    }

    /// Initialize `module` and register it.
    ///
    /// Returns `Ok(false)` when the module serves none of the owner's roles
    /// and was skipped.
    pub async fn add_module(&self, module: Arc<dyn Module>) -> Result<bool, HostError> {
        let name = module.name().to_string();
        self.ensure_open(&name)?;

        if !serves_owner_roles(&self.inner.services.roles, module.roles()) {
            tracing::info!(
                module = %name,
                module_roles = ?module.roles(),
                owner_roles = ?self.inner.services.roles,
                "module skipped: no matching role"
            );
            return Ok(false);
        }
        if self.inner.modules.read().iter().any(|m| m.name() == name) {
            return Err(HostError::DuplicateModule { module: name });
        }

        tracing::debug!(module = %name, kind = module.kind(), "initializing module");
        module
            .initialize(self.inner.host())
            .await
            .map_err(|source| HostError::ModuleInit {
                module: name.clone(),
                source,
            })?;

        // start() may have locked the list while the module initialized.
        let lc = self.inner.lifecycle.lock();
        if lc.locked {
            return Err(HostError::ModuleAlreadyStarted { module: name });
        }
        let mut modules = self.inner.modules.write();
        if modules.iter().any(|m| m.name() == name) {
            return Err(HostError::DuplicateModule { module: name });
        }
        modules.push(module);
        tracing::info!(module = %name, "module added");
        Ok(true)
    }

    fn ensure_open(&self, module: &str) -> Result<(), HostError> {
        if self.inner.lifecycle.lock().locked {
            return Err(HostError::ModuleAlreadyStarted {
                module: module.to_string(),
            });
        }
        Ok(())
    }

    /// Start every module concurrently.
    ///
    /// Calling `start` again while the service runs returns the existing exit
    /// channel. When any module fails to start, the service is shut down with
    /// exit code 1 and the first failure is returned. With
    /// `wait_for_shutdown`, blocks until the service stops and then calls the
    /// exit hook with the exit code.
    pub async fn start(&self, wait_for_shutdown: bool) -> Result<ExitReceiver, HostError> {
        let inner = &self.inner;
        let receiver = {
            let mut lc = inner.lifecycle.lock();
            if lc.shutdown_reason.is_some() {
                return Err(HostError::ShuttingDown);
            }
            if let Some(rx) = &lc.exit_rx {
                return Ok(rx.clone());
            }
            let (tx, rx) = exit_channel();
            lc.locked = true;
            lc.exit_tx = Some(tx);
            lc.exit_rx = Some(rx.clone());
            inner.services.state.transition(ServiceState::Initialized);
            rx
        };

        tracing::info!(service = %inner.services.name, "Phase: init");
        if let Some(observer) = &inner.observer {
            if let Err(err) = observer.on_init(&inner.host()).await {
                let message = format!("{err:#}");
                inner
                    .shutdown(Some(anyhow::anyhow!(message)), "observer init failed", Some(1))
                    .await;
                return Err(HostError::ObserverInit(err));
            }
        }

        if !inner.begin_fanout() {
            return Err(HostError::ShuttingDown);
        }
        tracing::info!(service = %inner.services.name, "Phase: start");

        let modules = inner.modules.read().clone();
        let mut set = JoinSet::new();
        for module in modules {
            set.spawn(OwnerInner::start_one(module, inner.start_timeout));
        }

        let mut first_failure = None;
        while let Some(joined) = set.join_next().await {
            let result = joined.unwrap_or_else(|err| {
                Err(HostError::ModuleStart {
                    module: String::from("<unknown>"),
                    source: anyhow::Error::new(err),
                })
            });
            match result {
                Ok(()) => inner.metrics.started.inc(1),
                Err(err) => {
                    inner.metrics.start_failed.inc(1);
                    tracing::error!(
                        module = err.module().unwrap_or("<unknown>"),
                        error = %DisplayChain(&err),
                        "module failed to start"
                    );
                    if first_failure.is_none() {
                        first_failure = Some(err);
                    }
                }
            }
        }
        inner.end_fanout();

        if let Some(err) = first_failure {
            let cause = anyhow::anyhow!("{}", DisplayChain(&err));
            inner
                .shutdown(Some(cause), "module failed to start", Some(1))
                .await;
            return Err(err);
        }

        if inner.advance(ServiceState::Running) {
            tracing::info!(service = %inner.services.name, "Phase: running");
        } else {
            tracing::info!(service = %inner.services.name, "shutdown requested while starting");
        }

        if wait_for_shutdown {
            let mut waiter = receiver.clone();
            let code = waiter.wait().await.map_or(1, |exit| exit.exit_code);
            (inner.exit_fn)(code);
        }
        Ok(receiver)
    }

    /// Stop the service. Returns `None` when it is not running or a shutdown
    /// is already in flight.
    pub async fn stop(&self, reason: &str, exit_code: i32) -> Option<ServiceExit> {
        self.inner.shutdown(None, reason, Some(exit_code)).await
    }

    /// Stop the service with an optional error. The exit code defaults to 1
    /// when `error` is set.
    pub async fn shutdown(
        &self,
        error: Option<anyhow::Error>,
        reason: &str,
        exit_code: Option<i32>,
    ) -> Option<ServiceExit> {
        self.inner.shutdown(error, reason, exit_code).await
    }

    /// Shut down because of `err`, unless the observer suppresses it.
    pub async fn on_critical_error(&self, err: anyhow::Error) {
        OwnerInner::on_critical_error(&self.inner, err).await
    }
}

/// `error: cause: cause` rendering of a [`HostError`] and its sources.
struct DisplayChain<'a>(&'a HostError);

impl std::fmt::Display for DisplayChain<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = std::error::Error::source(self.0);
        while let Some(cause) = source {
            write!(f, ": {cause}")?;
            source = cause.source();
        }
        Ok(())
    }
}

fn serves_owner_roles(owner_roles: &[String], module_roles: &[String]) -> bool {
    owner_roles.is_empty()
        || module_roles.is_empty()
        || module_roles.iter().any(|r| owner_roles.contains(r))
}
