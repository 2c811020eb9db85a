use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

/// Environment variables with this prefix override configuration keys;
/// `__` separates nesting levels, e.g. `APP__SERVER__NAME=billing`.
pub const ENV_PREFIX: &str = "APP__";

/// Module whose port `--port` overrides.
pub const HTTP_MODULE: &str = "http";

/// Application configuration: service identity, logging and a per-module
/// configuration bag keyed by module name.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// Logging configuration (optional, console-only defaults if None).
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
    /// Per-module configuration bag: module_name → arbitrary JSON/YAML value.
    #[serde(default)]
    pub modules: HashMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub owner: String,
    /// Roles this instance serves. Empty means every role.
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Logging configuration - maps subsystem names to their logging settings.
/// Key "default" is the catch-all for logs that don't match explicit subsystems.
pub type LoggingConfig = HashMap<String, Section>;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct Section {
    pub console_level: String, // "info", "debug", "error", "off"
    /// JSON log file; empty disables the file sink for this section.
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub file_level: String,
    #[serde(default)]
    pub max_age_days: Option<u32>,
    #[serde(default)]
    pub max_backups: Option<usize>,
    #[serde(default)]
    pub max_size_mb: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "hostkit".to_string(),
            description: String::new(),
            owner: String::new(),
            roles: Vec::new(),
        }
    }
}

/// Console-only logging at `info`.
pub fn default_logging_config() -> LoggingConfig {
    let mut logging = HashMap::new();
    logging.insert(
        "default".to_string(),
        Section {
            console_level: "info".to_string(),
            ..Section::default()
        },
    );
    logging
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: Some(default_logging_config()),
            modules: HashMap::new(),
        }
    }
}

/// Command line overrides applied on top of the loaded configuration.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    /// Port of the `http` module.
    pub port: Option<u16>,
    /// Roles added to `server.roles`.
    pub roles: Vec<String>,
    /// `-v` count: 1 = debug, 2+ = trace for the default log section.
    pub verbose: u8,
}

impl AppConfig {
    /// Load configuration with layered loading: defaults → YAML file → environment variables.
    pub fn load_layered<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref();
        if !path.exists() {
            anyhow::bail!("config file not found: {}", path.display());
        }
        Self::extract(Some(path))
    }

    /// Load from `config_path` when given; otherwise defaults → environment variables.
    pub fn load_or_default<P: AsRef<Path>>(config_path: Option<P>) -> Result<Self> {
        match config_path {
            Some(path) => Self::load_layered(path),
            None => Self::extract(None),
        }
    }

    fn extract(config_path: Option<&Path>) -> Result<Self> {
        use figment::{
            providers::{Env, Format, Serialized, Yaml},
            Figment,
        };

        // Start from a base where logging stays None unless YAML/ENV provides it.
        let base = AppConfig {
            logging: None,
            ..AppConfig::default()
        };

        let mut figment = Figment::new().merge(Serialized::defaults(base));
        if let Some(path) = config_path {
            figment = figment.merge(Yaml::file(path));
        }
        // Example: APP__MODULES__HTTP__PORT=8080 maps to modules.http.port
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        figment
            .extract()
            .context("Failed to extract config from figment")
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize config to YAML")
    }

    /// Apply overrides from command line arguments.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(port) = args.port {
            set_module_key(&mut self.modules, HTTP_MODULE, "port", Value::from(port));
        }

        for role in &args.roles {
            if !self.server.roles.contains(role) {
                self.server.roles.push(role.clone());
            }
        }

        // Set logging level based on verbose flags for "default" section.
        let logging = self.logging.get_or_insert_with(default_logging_config);
        let section = logging.entry("default".to_string()).or_insert_with(|| Section {
            console_level: "info".to_string(),
            ..Section::default()
        });
        match args.verbose {
            0 => {}
            1 => section.console_level = "debug".to_string(),
            _ => section.console_level = "trace".to_string(),
        }
    }
}

/// Set `key` in a module section, honoring a nested `config` object when present.
fn set_module_key(modules: &mut HashMap<String, Value>, module: &str, key: &str, value: Value) {
    let entry = modules
        .entry(module.to_string())
        .or_insert_with(|| Value::Object(Default::default()));
    if !entry.is_object() {
        *entry = Value::Object(Default::default());
    }

    let nested = entry.get("config").is_some_and(Value::is_object);
    let target = if nested { &mut entry["config"] } else { entry };
    if let Value::Object(map) = target {
        map.insert(key.to_string(), value);
    }
}
