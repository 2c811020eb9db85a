use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use hostkit::{
    HostError, InMemoryScope, LifecycleObserver, Module, ServiceExit, ServiceHost, ServiceOwner,
    ServiceState,
};
use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Default)]
struct FakeModule {
    name: String,
    roles: Vec<String>,
    start_delay: Duration,
    fail_start: bool,
    fail_stop: bool,
    running: AtomicBool,
    inits: AtomicUsize,
    stops: AtomicUsize,
    host: Mutex<Option<ServiceHost>>,
}

impl FakeModule {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn delayed(name: &str, millis: u64) -> Self {
        Self {
            start_delay: Duration::from_millis(millis),
            ..Self::new(name)
        }
    }

    fn failing(name: &str) -> Self {
        Self {
            fail_start: true,
            ..Self::new(name)
        }
    }

    fn with_roles(mut self, roles: &[&str]) -> Self {
        self.roles = roles.iter().map(|r| r.to_string()).collect();
        self
    }
}

#[async_trait]
impl Module for FakeModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        "fake"
    }

    fn roles(&self) -> &[String] {
        &self.roles
    }

    async fn initialize(&self, host: ServiceHost) -> anyhow::Result<()> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        *self.host.lock() = Some(host);
        Ok(())
    }

    async fn start(&self) -> anyhow::Result<()> {
        tokio::time::sleep(self.start_delay).await;
        if self.fail_start {
            return Err(anyhow!("address already in use"));
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self, _exit: &ServiceExit) -> anyhow::Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        if self.fail_stop {
            return Err(anyhow!("stop failed"));
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

fn owner() -> ServiceOwner {
    ServiceOwner::builder("test-svc")
        .exit_fn(|code| panic!("unexpected process exit with code {code}"))
        .build()
}

#[tokio::test]
async fn start_then_stop_runs_full_lifecycle() {
    let owner = owner();
    let module = Arc::new(FakeModule::new("a"));
    assert!(owner.add_module(module.clone()).await.unwrap());
    assert_eq!(module.inits.load(Ordering::SeqCst), 1);
    assert_eq!(owner.state(), ServiceState::Uninitialized);

    let mut exit_rx = owner.start(false).await.unwrap();
    assert!(owner.is_running());
    assert!(module.is_running());

    let exit = owner.stop("done", 0).await.expect("first stop performs shutdown");
    assert_eq!(exit.reason, "done");
    assert_eq!(exit.exit_code, 0);
    assert!(!exit.is_error());
    assert_eq!(owner.state(), ServiceState::Stopped);
    assert!(!module.is_running());

    let published = exit_rx.wait().await.unwrap();
    assert_eq!(published.reason, "done");
}

#[tokio::test]
async fn second_stop_is_a_noop() {
    let owner = owner();
    let module = Arc::new(FakeModule::new("a"));
    owner.add_module(module.clone()).await.unwrap();
    owner.start(false).await.unwrap();

    assert!(owner.stop("first", 0).await.is_some());
    assert!(owner.stop("second", 0).await.is_none());
    assert_eq!(module.stops.load(Ordering::SeqCst), 1);
    assert_eq!(
        owner.exit_receiver().unwrap().current().unwrap().reason,
        "first"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_stops_shut_down_exactly_once() {
    let owner = owner();
    let module = Arc::new(FakeModule::new("a"));
    owner.add_module(module.clone()).await.unwrap();
    owner.start(false).await.unwrap();

    let handles: Vec<_> = (0..3)
        .map(|i| {
            let owner = owner.clone();
            tokio::spawn(async move { owner.stop(&format!("stop {i}"), 0).await })
        })
        .collect();

    let mut performed = 0;
    for h in handles {
        if h.await.unwrap().is_some() {
            performed += 1;
        }
    }
    assert_eq!(performed, 1);
    assert_eq!(module.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stop_before_start_is_a_noop() {
    let owner = owner();
    assert!(owner.stop("early", 0).await.is_none());
    assert_eq!(owner.state(), ServiceState::Uninitialized);
}

#[tokio::test]
async fn start_is_idempotent_while_running() {
    let owner = owner();
    owner.add_module(Arc::new(FakeModule::new("a"))).await.unwrap();

    owner.start(false).await.unwrap();
    let mut again = owner.start(false).await.unwrap();
    owner.stop("bye", 0).await;
    assert_eq!(again.wait().await.unwrap().reason, "bye");
}

#[tokio::test]
async fn start_after_shutdown_fails() {
    let owner = owner();
    owner.start(false).await.unwrap();
    owner.stop("bye", 0).await;
    assert!(matches!(owner.start(false).await, Err(HostError::ShuttingDown)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn modules_start_concurrently() {
    let owner = owner();
    for (name, millis) in [("a", 100), ("b", 200), ("c", 300)] {
        owner
            .add_module(Arc::new(FakeModule::delayed(name, millis)))
            .await
            .unwrap();
    }

    let started = Instant::now();
    owner.start(false).await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(300), "took {elapsed:?}");
    assert!(elapsed < Duration::from_millis(550), "took {elapsed:?}");
    owner.stop("done", 0).await;
}

#[tokio::test]
async fn start_failure_shuts_down_with_exit_code_one() {
    let metrics = InMemoryScope::new();
    let owner = ServiceOwner::builder("test-svc")
        .metrics(Arc::new(metrics.clone()))
        .exit_fn(|code| panic!("unexpected process exit with code {code}"))
        .build();
    let healthy = Arc::new(FakeModule::delayed("healthy", 20));
    owner.add_module(healthy.clone()).await.unwrap();
    owner.add_module(Arc::new(FakeModule::failing("broken"))).await.unwrap();

    let err = owner.start(false).await.unwrap_err();
    assert!(matches!(&err, HostError::ModuleStart { module, .. } if module == "broken"));

    let exit = owner.exit_receiver().unwrap().wait().await.unwrap();
    assert_eq!(exit.exit_code, 1);
    assert!(exit.is_error());
    assert!(exit.error.unwrap().to_string().contains("address already in use"));

    assert_eq!(owner.state(), ServiceState::Stopped);
    assert!(!healthy.is_running());
    assert_eq!(healthy.stops.load(Ordering::SeqCst), 1);
    assert_eq!(metrics.counter_value("service.modules.started", &[]), 1);
    assert_eq!(metrics.counter_value("service.modules.start_failed", &[]), 1);
}

#[tokio::test]
async fn hanging_start_is_bounded_by_timeout() {
    let owner = ServiceOwner::builder("test-svc")
        .start_timeout(Duration::from_millis(50))
        .exit_fn(|_| {})
        .build();
    owner
        .add_module(Arc::new(FakeModule::delayed("slow", 5_000)))
        .await
        .unwrap();

    let err = owner.start(false).await.unwrap_err();
    assert!(matches!(err, HostError::StartTimeout { .. }));
    assert_eq!(err.module(), Some("slow"));
}

#[tokio::test]
async fn stop_failures_do_not_block_shutdown() {
    let metrics = InMemoryScope::new();
    let owner = ServiceOwner::builder("test-svc")
        .metrics(Arc::new(metrics.clone()))
        .build();
    let flaky = Arc::new(FakeModule {
        fail_stop: true,
        ..FakeModule::new("flaky")
    });
    let fine = Arc::new(FakeModule::new("fine"));
    owner.add_module(flaky.clone()).await.unwrap();
    owner.add_module(fine.clone()).await.unwrap();
    owner.start(false).await.unwrap();

    let exit = owner.stop("bye", 0).await.unwrap();
    assert_eq!(exit.exit_code, 0);
    assert_eq!(fine.stops.load(Ordering::SeqCst), 1);
    assert_eq!(metrics.counter_value("service.modules.stop_failed", &[]), 1);
}

#[tokio::test]
async fn adding_a_module_after_start_fails() {
    let owner = owner();
    owner.start(false).await.unwrap();

    let err = owner
        .add_module(Arc::new(FakeModule::new("late")))
        .await
        .unwrap_err();
    assert!(matches!(err, HostError::ModuleAlreadyStarted { ref module } if module == "late"));
    owner.stop("done", 0).await;
}

#[tokio::test]
async fn duplicate_module_names_are_rejected() {
    let owner = owner();
    owner.add_module(Arc::new(FakeModule::new("a"))).await.unwrap();
    let err = owner.add_module(Arc::new(FakeModule::new("a"))).await.unwrap_err();
    assert!(matches!(err, HostError::DuplicateModule { .. }));
}

#[tokio::test]
async fn modules_outside_owner_roles_are_skipped() {
    let owner = ServiceOwner::builder("test-svc")
        .roles(["api"])
        .exit_fn(|_| {})
        .build();

    let api = Arc::new(FakeModule::new("api").with_roles(&["api", "admin"]));
    let worker = Arc::new(FakeModule::new("worker").with_roles(&["worker"]));
    let anywhere = Arc::new(FakeModule::new("anywhere"));

    assert!(owner.add_module(api.clone()).await.unwrap());
    assert!(!owner.add_module(worker.clone()).await.unwrap());
    assert!(owner.add_module(anywhere).await.unwrap());

    assert_eq!(worker.inits.load(Ordering::SeqCst), 0);
    let names: Vec<String> = owner.modules().iter().map(|m| m.name().to_string()).collect();
    assert_eq!(names, vec!["api", "anywhere"]);
}

#[tokio::test]
async fn wait_for_shutdown_calls_exit_hook() {
    let code = Arc::new(Mutex::new(None));
    let recorded = Arc::clone(&code);
    let owner = ServiceOwner::builder("test-svc")
        .exit_fn(move |c| *recorded.lock() = Some(c))
        .build();
    owner.add_module(Arc::new(FakeModule::new("a"))).await.unwrap();

    let stopper = owner.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        stopper.stop("signal received", 0).await;
    });

    owner.start(true).await.unwrap();
    assert_eq!(*code.lock(), Some(0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_during_start_stops_modules_that_finish_starting() {
    let owner = ServiceOwner::builder("test-svc").exit_fn(|_| {}).build();
    let slow = Arc::new(FakeModule::delayed("slow", 200));
    owner.add_module(slow.clone()).await.unwrap();

    let stopper = owner.clone();
    let stop = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        stopper.stop("signal received", 0).await
    });

    let started = owner.start(false).await;
    let exit = stop.await.unwrap().expect("stop claims the shutdown");
    assert_eq!(exit.reason, "signal received");

    assert!(started.is_ok());
    assert_eq!(owner.state(), ServiceState::Stopped);
    assert!(!slow.is_running());
    assert_eq!(slow.stops.load(Ordering::SeqCst), 1);
    assert_eq!(
        owner.exit_receiver().unwrap().current().unwrap().reason,
        "signal received"
    );
}

#[derive(Default)]
struct RecordingObserver {
    suppress: bool,
    inits: AtomicUsize,
    shutdowns: Mutex<Vec<String>>,
}

#[async_trait]
impl LifecycleObserver for RecordingObserver {
    async fn on_init(&self, host: &ServiceHost) -> anyhow::Result<()> {
        assert_eq!(host.state(), ServiceState::Initialized);
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_shutdown(&self, exit: &ServiceExit) {
        self.shutdowns.lock().push(exit.reason.clone());
    }

    fn on_critical_error(&self, _err: &anyhow::Error) -> bool {
        self.suppress
    }
}

#[tokio::test]
async fn critical_error_from_module_shuts_down() {
    let observer = Arc::new(RecordingObserver::default());
    let owner = ServiceOwner::builder("test-svc")
        .observer(observer.clone())
        .exit_fn(|_| {})
        .build();
    let module = Arc::new(FakeModule::new("a"));
    owner.add_module(module.clone()).await.unwrap();
    owner.start(false).await.unwrap();
    assert_eq!(observer.inits.load(Ordering::SeqCst), 1);

    let host = module.host.lock().clone().unwrap();
    host.on_critical_error(anyhow!("disk on fire")).await;

    assert_eq!(owner.state(), ServiceState::Stopped);
    let exit = owner.exit_receiver().unwrap().current().unwrap();
    assert_eq!(exit.exit_code, 1);
    assert_eq!(*observer.shutdowns.lock(), vec!["critical error".to_string()]);
}

#[tokio::test]
async fn suppressed_critical_error_keeps_running() {
    let observer = Arc::new(RecordingObserver {
        suppress: true,
        ..Default::default()
    });
    let owner = ServiceOwner::builder("test-svc")
        .observer(observer.clone())
        .exit_fn(|_| {})
        .build();
    owner.start(false).await.unwrap();

    owner.on_critical_error(anyhow!("transient")).await;
    assert!(owner.is_running());
    assert!(observer.shutdowns.lock().is_empty());
    owner.stop("done", 0).await;
}
