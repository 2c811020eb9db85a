//! Host-side handles given to modules, and configuration access.

use std::sync::{Arc, Weak};

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::auth::{AuthClient, AuthRegistry, CreationInfo};
use crate::lifecycle::{ServiceState, StateCell};
use crate::metrics::{MetricsScope, NoopScope};
use crate::runtime::OwnerInner;
use crate::telemetry::{Tracer, W3cTracer};

/// Configuration provider trait for modules
pub trait ConfigProvider: Send + Sync {
    /// Get the configuration for a specific module
    fn get_module_config(&self, module_name: &str) -> Option<&serde_json::Value>;

    /// Get a specific top-level config value by key
    fn get_config_raw(&self, _key: &str) -> Option<serde_json::Value> {
        None
    }
}

/// Provider with no configuration at all; every module falls back to defaults.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyConfigProvider;

impl ConfigProvider for EmptyConfigProvider {
    fn get_module_config(&self, _module_name: &str) -> Option<&serde_json::Value> {
        None
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config for module '{module}'")]
    InvalidConfig {
        module: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Deserialize the typed configuration of `module`.
///
/// The section may be given either flat or nested under a `config` key.
/// A missing (or null) section yields `T::default()`.
pub fn module_config<T>(provider: &dyn ConfigProvider, module: &str) -> Result<T, ConfigError>
where
    T: DeserializeOwned + Default,
{
    let Some(raw) = provider.get_module_config(module) else {
        return Ok(T::default());
    };
    let section = raw.get("config").unwrap_or(raw);
    if section.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(section.clone()).map_err(|source| ConfigError::InvalidConfig {
        module: module.to_string(),
        source,
    })
}

/// Shared services and identity of a service, as seen by its modules.
#[derive(Clone)]
pub struct HostServices {
    pub name: String,
    pub description: String,
    pub owner: String,
    pub roles: Vec<String>,
    pub config: Arc<dyn ConfigProvider>,
    pub metrics: Arc<dyn MetricsScope>,
    pub tracer: Arc<dyn Tracer>,
    pub auth: Arc<AuthRegistry>,
    pub(crate) state: StateCell,
}

impl HostServices {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            owner: String::new(),
            roles: Vec::new(),
            config: Arc::new(EmptyConfigProvider),
            metrics: Arc::new(NoopScope),
            tracer: Arc::new(W3cTracer::new()),
            auth: Arc::new(AuthRegistry::new()),
            state: StateCell::new(),
        }
    }
}

impl std::fmt::Debug for HostServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostServices")
            .field("name", &self.name)
            .field("roles", &self.roles)
            .field("state", &self.state.get())
            .finish()
    }
}

/// Handle a module receives in [`Module::initialize`](crate::Module::initialize).
///
/// It refers to the owning [`ServiceOwner`](crate::ServiceOwner) weakly, so a
/// module holding it does not keep its owner alive.
#[derive(Clone)]
pub struct ServiceHost {
    services: Arc<HostServices>,
    owner: Weak<OwnerInner>,
}

impl std::fmt::Debug for ServiceHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHost")
            .field("services", &self.services)
            .field("attached", &(self.owner.strong_count() > 0))
            .finish()
    }
}

impl ServiceHost {
    pub(crate) fn attached(services: Arc<HostServices>, owner: Weak<OwnerInner>) -> Self {
        Self { services, owner }
    }

    /// A host that is not backed by an owner. Critical errors are only logged.
    pub fn detached(services: HostServices) -> Self {
        Self {
            services: Arc::new(services),
            owner: Weak::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.services.name
    }

    pub fn description(&self) -> &str {
        &self.services.description
    }

    pub fn owner(&self) -> &str {
        &self.services.owner
    }

    pub fn roles(&self) -> &[String] {
        &self.services.roles
    }

    pub fn config(&self) -> &Arc<dyn ConfigProvider> {
        &self.services.config
    }

    pub fn metrics(&self) -> &Arc<dyn MetricsScope> {
        &self.services.metrics
    }

    pub fn tracer(&self) -> &Arc<dyn Tracer> {
        &self.services.tracer
    }

    pub fn auth_registry(&self) -> &Arc<AuthRegistry> {
        &self.services.auth
    }

    pub fn state(&self) -> ServiceState {
        self.services.state.get()
    }

    /// Resolve the active auth client, building it on first use.
    pub fn auth_client(&self) -> Arc<dyn AuthClient> {
        let info = CreationInfo {
            service_name: self.services.name.clone(),
            config: Arc::clone(&self.services.config),
            metrics: Arc::clone(&self.services.metrics),
        };
        self.services.auth.load(&info)
    }

    /// Report an error the module cannot recover from.
    ///
    /// Unless the owner's observer suppresses it, this shuts the service down.
    pub async fn on_critical_error(&self, err: anyhow::Error) {
        match self.owner.upgrade() {
            Some(owner) => OwnerInner::on_critical_error(&owner, err).await,
            None => {
                tracing::error!(service = %self.services.name, error = %err, "critical error on detached host");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    #[serde(deny_unknown_fields)]
    struct DemoCfg {
        #[serde(default)]
        port: u16,
    }

    struct OneModule(serde_json::Value);
    impl ConfigProvider for OneModule {
        fn get_module_config(&self, module_name: &str) -> Option<&serde_json::Value> {
            (module_name == "demo").then_some(&self.0)
        }
    }

    #[test]
    fn missing_section_yields_default() {
        let cfg: DemoCfg = module_config(&EmptyConfigProvider, "demo").unwrap();
        assert_eq!(cfg, DemoCfg::default());
    }

    #[test]
    fn flat_and_nested_sections_are_accepted() {
        let flat = OneModule(serde_json::json!({ "port": 8080 }));
        let nested = OneModule(serde_json::json!({ "config": { "port": 9090 } }));

        let a: DemoCfg = module_config(&flat, "demo").unwrap();
        let b: DemoCfg = module_config(&nested, "demo").unwrap();
        assert_eq!(a.port, 8080);
        assert_eq!(b.port, 9090);
    }

    #[test]
    fn malformed_section_is_an_error_naming_the_module() {
        let bad = OneModule(serde_json::json!({ "port": "not a number" }));
        let err = module_config::<DemoCfg>(&bad, "demo").unwrap_err();
        assert!(err.to_string().contains("'demo'"));
    }

    #[tokio::test]
    async fn detached_host_exposes_services() {
        let mut services = HostServices::new("svc");
        services.roles = vec!["api".to_string()];
        let host = ServiceHost::detached(services);

        assert_eq!(host.name(), "svc");
        assert_eq!(host.roles(), ["api".to_string()]);
        assert_eq!(host.state(), ServiceState::Uninitialized);
        assert_eq!(host.auth_client().name(), crate::auth::NOOP_CLIENT_NAME);

        // Must not panic without an owner.
        host.on_critical_error(anyhow::anyhow!("boom")).await;
    }
}
