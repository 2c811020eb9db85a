//! Read-only view of an [`AppConfig`] handed to modules.

use crate::config::AppConfig;
use hostkit::ConfigProvider;
use serde_json::Value;
use std::sync::Arc;

/// [`ConfigProvider`] over a loaded [`AppConfig`].
///
/// Module sections are returned exactly as written under `modules.<name>`.
/// A section may hold its settings flat (`port: 8080`) or nested under a
/// `config` key (`config: { port: 8080 }`). [`hostkit::module_config`] unwraps
/// the nested form, so both shapes deserialize into the same typed config, and
/// [`AppConfig::apply_cli_overrides`] writes into whichever shape is present.
///
/// Raw lookups take a top-level section (`server`, `logging`, `modules`) or a
/// dotted path into one, e.g. `server.name` or `modules.http.config.port`.
#[derive(Debug, Clone)]
pub struct AppConfigProvider {
    config: Arc<AppConfig>,
}

impl AppConfigProvider {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Names of the configured module sections, sorted.
    pub fn module_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.config.modules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn section(&self, name: &str) -> Option<Value> {
        match name {
            "server" => serde_json::to_value(&self.config.server).ok(),
            "logging" => self
                .config
                .logging
                .as_ref()
                .and_then(|v| serde_json::to_value(v).ok()),
            "modules" => serde_json::to_value(&self.config.modules).ok(),
            _ => None,
        }
    }
}

impl From<Arc<AppConfig>> for AppConfigProvider {
    fn from(config: Arc<AppConfig>) -> Self {
        Self { config }
    }
}

impl ConfigProvider for AppConfigProvider {
    fn get_module_config(&self, module_name: &str) -> Option<&Value> {
        self.config.modules.get(module_name)
    }

    fn get_config_raw(&self, key: &str) -> Option<Value> {
        let mut path = key.split('.');
        let mut value = self.section(path.next()?)?;
        for segment in path {
            value = value.get_mut(segment)?.take();
        }
        Some(value)
    }
}
