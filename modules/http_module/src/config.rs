use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration of an [`HttpModule`](crate::HttpModule), read from the
/// `modules.<name>` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct HttpConfig {
    /// Listen port. `0` binds an ephemeral port.
    pub port: u16,
    /// Upper bound for handling a single request, e.g. `"30s"`.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Expose `/debug/pprof` diagnostics.
    pub debug: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            timeout: DEFAULT_TIMEOUT,
            debug: true,
        }
    }
}
