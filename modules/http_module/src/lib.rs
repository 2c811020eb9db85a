//! HTTP server module for hostkit services.
//!
//! [`HttpModule`] binds a TCP listener on start, serves a health endpoint and
//! optional runtime diagnostics, and sends every other request through the
//! host's default middleware chain into a user-supplied [`hostkit::Handler`].

mod config;
mod module;

pub use config::{HttpConfig, DEFAULT_PORT, DEFAULT_TIMEOUT};
pub use module::{
    HandlerCtor, HttpModule, HttpModuleBuilder, DEFAULT_HEALTH_BODY, HTTP_KIND, MAX_BODY_BYTES,
};
