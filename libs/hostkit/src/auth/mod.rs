//! Pluggable authentication.
//!
//! Exactly one [`AuthClient`] backend is active per [`AuthRegistry`]. The
//! registry is an ordinary value: create one per process and share it by `Arc`.

mod client;
mod error;
mod registry;

pub use client::{
    AuthClient, FailureClient, NoopClient, FAILURE_CLIENT_NAME, NOOP_CLIENT_NAME,
};
pub use error::AuthError;
pub use registry::{AuthClientFactory, AuthRegistry, CreationInfo};
