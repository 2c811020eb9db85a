//! # Hostkit - Service Bootstrap Core
//!
//! Hostkit starts and stops independently-owned request-handling units
//! ("modules") under a single owner, and threads authentication, tracing and
//! failure isolation through every inbound request.
//!
//! ## Pieces
//!
//! - **Lifecycle**: [`ServiceState`] is a monotonic state machine,
//!   [`ServiceExit`] describes why the service stopped.
//! - **Runtime**: [`ServiceOwner`] fans module `start`/`stop` out concurrently
//!   and shuts everything down on the first start failure.
//! - **Middleware**: [`ChainBuilder`] composes [`Middleware`] into a [`Chain`]
//!   terminating in a [`Handler`].
//! - **Auth**: [`AuthRegistry`] keeps exactly one [`AuthClient`] backend active.
//!
//! ## Example
//!
//! ```rust,ignore
//! use hostkit::{ServiceOwner, AuthRegistry};
//! use std::sync::Arc;
//!
//! let owner = ServiceOwner::builder("billing")
//!     .roles(["api"])
//!     .auth_registry(Arc::new(AuthRegistry::new()))
//!     .build();
//!
//! owner.add_module(Arc::new(my_module)).await?;
//! let exit = owner.start(false).await?;
//! ```

pub use anyhow::Result;
pub use async_trait::async_trait;

// Module system contracts
pub mod contracts;
pub use contracts::{LifecycleObserver, Module};

pub mod context;
pub use context::{
    module_config, ConfigError, ConfigProvider, EmptyConfigProvider, HostServices, ServiceHost,
};

pub mod error;
pub use error::HostError;

pub mod lifecycle;
pub use lifecycle::{ServiceExit, ServiceState, StateCell};

pub mod runtime;
pub use runtime::{ExitFn, ExitReceiver, ServiceOwner, ServiceOwnerBuilder};

// Pluggable authentication
pub mod auth;
pub use auth::{
    AuthClient, AuthClientFactory, AuthError, AuthRegistry, CreationInfo, FailureClient,
    NoopClient,
};

// Request pipeline
pub mod http;
pub use self::http::{
    default_middleware, handler_fn, AttributeValue, Chain, ChainBuilder, Handler, Middleware,
    Next, Principal, Request, RequestContext, ResponseWriter,
};

// Collaborator capabilities
pub mod metrics;
pub use self::metrics::{
    Counter, FacadeScope, Gauge, InMemoryScope, MetricsScope, NoopScope, Stopwatch, Timer,
    TimerStats,
};

pub mod telemetry;
pub use telemetry::{NoopTracer, SpanContext, TraceError, TraceSpan, Tracer, W3cTracer};
