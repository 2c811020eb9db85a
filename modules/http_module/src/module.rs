use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use hostkit::{
    default_middleware, module_config, Chain, ChainBuilder, Handler, Middleware, Module,
    ServiceExit, ServiceHost,
};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::timeout::TimeoutLayer;

use crate::config::HttpConfig;

/// Value reported by [`Module::kind`] for HTTP modules.
pub const HTTP_KIND: &str = "http";
pub const DEFAULT_HEALTH_BODY: &str = "OK";
/// Request bodies larger than this are rejected with 413.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Builds the user handler once the host is known.
pub type HandlerCtor = Arc<dyn Fn(&ServiceHost) -> Arc<dyn Handler> + Send + Sync>;

/// HTTP server module.
///
/// Serves `/health`, `/debug/pprof` (when enabled) and routes everything else
/// through the default middleware chain into the user handler.
pub struct HttpModule {
    name: String,
    roles: Vec<String>,
    handler_ctor: HandlerCtor,
    health_body: Arc<str>,
    extra_middleware: Vec<Arc<dyn Middleware>>,
    host: RwLock<Option<ServiceHost>>,
    server: Mutex<Option<Server>>,
    running: AtomicBool,
}

struct Server {
    addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for HttpModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpModule")
            .field("name", &self.name)
            .field("roles", &self.roles)
            .field("local_addr", &self.local_addr())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Builder for [`HttpModule`].
pub struct HttpModuleBuilder {
    name: String,
    roles: Vec<String>,
    handler_ctor: Option<HandlerCtor>,
    health_body: String,
    extra_middleware: Vec<Arc<dyn Middleware>>,
}

impl HttpModuleBuilder {
    pub fn handler<F>(mut self, ctor: F) -> Self
    where
        F: Fn(&ServiceHost) -> Arc<dyn Handler> + Send + Sync + 'static,
    {
        self.handler_ctor = Some(Arc::new(ctor));
        self
    }

    pub fn roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn health_body(mut self, body: impl Into<String>) -> Self {
        self.health_body = body.into();
        self
    }

    /// Append a middleware after the default chain, right before the handler.
    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.extra_middleware.push(middleware);
        self
    }

    /// # Panics
    ///
    /// If no handler constructor was given.
    pub fn build(self) -> HttpModule {
        let Some(handler_ctor) = self.handler_ctor else {
            panic!("HTTP module requires a handler constructor");
        };
        HttpModule {
            name: self.name,
            roles: self.roles,
            handler_ctor,
            health_body: self.health_body.into(),
            extra_middleware: self.extra_middleware,
            host: RwLock::new(None),
            server: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }
}

impl HttpModule {
    pub fn builder(name: impl Into<String>) -> HttpModuleBuilder {
        HttpModuleBuilder {
            name: name.into(),
            roles: Vec::new(),
            handler_ctor: None,
            health_body: DEFAULT_HEALTH_BODY.to_string(),
            extra_middleware: Vec::new(),
        }
    }

    /// Address the listener is bound to while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.lock().as_ref().map(|s| s.addr)
    }

    fn build_chain(&self, host: &ServiceHost) -> Chain {
        let handler = (self.handler_ctor)(host);
        ChainBuilder::new()
            .add_middleware(default_middleware(host))
            .add_middleware(self.extra_middleware.iter().cloned())
            .build(handler)
    }

    fn router(&self, cfg: &HttpConfig, chain: Chain) -> Router {
        let state = Arc::new(ServeState {
            module: self.name.clone(),
            health_body: Arc::clone(&self.health_body),
            chain,
            started: Instant::now(),
        });

        let mut router = Router::new().route("/health", get(health));
        if cfg.debug {
            router = router
                .route("/debug/pprof", get(diagnostics))
                .route("/debug/pprof/{*profile}", get(profile_diagnostics));
        }
        router
            .fallback(dispatch)
            .with_state(state)
            .layer(TimeoutLayer::new(cfg.timeout))
    }
}

#[async_trait]
impl Module for HttpModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        HTTP_KIND
    }

    fn roles(&self) -> &[String] {
        &self.roles
    }

    async fn initialize(&self, host: ServiceHost) -> anyhow::Result<()> {
        *self.host.write() = Some(host);
        Ok(())
    }

    async fn start(&self) -> anyhow::Result<()> {
        let host = self
            .host
            .read()
            .clone()
            .with_context(|| format!("HTTP module '{}' started before initialize", self.name))?;
        if self.is_running() {
            return Ok(());
        }

        let cfg: HttpConfig = module_config(host.config().as_ref(), &self.name)?;
        let chain = self.build_chain(&host);
        tracing::debug!(module = %self.name, middleware = ?chain.middleware_names(), "request chain built");

        let listener = TcpListener::bind(("0.0.0.0", cfg.port))
            .await
            .with_context(|| format!("failed to bind HTTP listener on port {}", cfg.port))?;
        let addr = listener
            .local_addr()
            .context("failed to read HTTP listener address")?;
        tracing::info!(module = %self.name, %addr, debug = cfg.debug, timeout = ?cfg.timeout, "HTTP server bound");

        let router = self.router(&cfg, chain);
        let cancel = CancellationToken::new();
        let shutdown = {
            let cancel = cancel.clone();
            async move { cancel.cancelled().await }
        };
        let serve = axum::serve(listener, router).with_graceful_shutdown(shutdown);

        let name = self.name.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = serve.await {
                tracing::error!(module = %name, error = %e, "HTTP server terminated");
                // Report from a separate task: shutdown stops this module,
                // which awaits the task we are running in.
                tokio::spawn(async move {
                    host.on_critical_error(anyhow::Error::new(e).context(format!("HTTP module '{name}' failed")))
                        .await;
                });
            }
        });

        *self.server.lock() = Some(Server { addr, cancel, task });
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    async fn stop(&self, exit: &ServiceExit) -> anyhow::Result<()> {
        let Some(server) = self.server.lock().take() else {
            return Ok(());
        };
        self.running.store(false, Ordering::Release);
        tracing::info!(module = %self.name, addr = %server.addr, reason = %exit.reason, "HTTP server shutting down");

        server.cancel.cancel();
        server
            .task
            .await
            .with_context(|| format!("HTTP module '{}' serve task failed", self.name))
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

struct ServeState {
    module: String,
    health_body: Arc<str>,
    chain: Chain,
    started: Instant,
}

async fn health(State(state): State<Arc<ServeState>>) -> String {
    state.health_body.to_string()
}

async fn diagnostics(State(state): State<Arc<ServeState>>) -> Json<serde_json::Value> {
    Json(runtime_snapshot(&state, None))
}

async fn profile_diagnostics(
    State(state): State<Arc<ServeState>>,
    Path(profile): Path<String>,
) -> Json<serde_json::Value> {
    Json(runtime_snapshot(&state, Some(&profile)))
}

fn runtime_snapshot(state: &ServeState, profile: Option<&str>) -> serde_json::Value {
    let metrics = tokio::runtime::Handle::current().metrics();
    serde_json::json!({
        "module": state.module,
        "profile": profile,
        "uptime_secs": state.started.elapsed().as_secs_f64(),
        "tokio": {
            "workers": metrics.num_workers(),
            "alive_tasks": metrics.num_alive_tasks(),
        },
        "pid": std::process::id(),
    })
}

/// Run a request through the middleware chain.
async fn dispatch(State(state): State<Arc<ServeState>>, req: axum::extract::Request) -> Response {
    let (parts, body) = req.into_parts();
    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(module = %state.module, error = %e, "failed to read request body");
            return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
        }
    };

    let mut request = hostkit::Request::from_parts(parts, body);
    let mut writer = hostkit::ResponseWriter::new();
    state.chain.handle(&mut request, &mut writer).await;
    writer.into_response().map(axum::body::Body::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "HTTP module requires a handler constructor")]
    fn build_without_handler_panics() {
        let _ = HttpModule::builder("http").build();
    }

    #[tokio::test]
    async fn stop_before_start_is_a_noop() {
        let module = HttpModule::builder("http")
            .handler(|_| Arc::new(hostkit::handler_fn(|_, _| {})))
            .build();
        let exit = ServiceExit::new("test", None, Some(0));

        assert!(module.stop(&exit).await.is_ok());
        assert!(module.stop(&exit).await.is_ok());
        assert!(!module.is_running());
        assert!(module.local_addr().is_none());
    }

    #[tokio::test]
    async fn start_before_initialize_fails() {
        let module = HttpModule::builder("http")
            .handler(|_| Arc::new(hostkit::handler_fn(|_, _| {})))
            .build();
        let err = module.start().await.unwrap_err();
        assert!(err.to_string().contains("before initialize"));
    }
}
