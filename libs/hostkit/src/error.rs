use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the [`ServiceOwner`](crate::ServiceOwner) lifecycle API.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("service is shutting down")]
    ShuttingDown,

    #[error("module '{module}' cannot be added: service has already started")]
    ModuleAlreadyStarted { module: String },

    #[error("module '{module}' is already registered")]
    DuplicateModule { module: String },

    #[error("module '{module}' failed to initialize")]
    ModuleInit {
        module: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("module '{module}' failed to start")]
    ModuleStart {
        module: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("module '{module}' did not start within {timeout:?}")]
    StartTimeout { module: String, timeout: Duration },

    #[error("observer init hook failed")]
    ObserverInit(#[source] anyhow::Error),
}

impl HostError {
    /// Name of the module the error refers to, if any.
    pub fn module(&self) -> Option<&str> {
        match self {
            HostError::ModuleAlreadyStarted { module }
            | HostError::DuplicateModule { module }
            | HostError::ModuleInit { module, .. }
            | HostError::ModuleStart { module, .. }
            | HostError::StartTimeout { module, .. } => Some(module),
            HostError::ShuttingDown | HostError::ObserverInit(_) => None,
        }
    }
}
