//! Instance configuration.
//!
//! Loaded from YAML. Every field is optional; unknown fields are rejected so
//! a typo fails loudly at startup instead of silently using a default.
//!
//! ```yaml
//! listen: 0.0.0.0:8080
//! service_name: catalog
//! limit_post: 2097152
//! max_redirect: 5
//! debug: false
//! bridge_timeout_ms: 30000
//! includes:
//!   upstream: upstream.yaml
//! logs:
//!   error:
//!     level: WARN
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::log::{ERROR_LOG, LogConfig};

/// Name of the configuration file [`Instance::open`](crate::Instance::open)
/// looks for in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "conf.yaml";

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstanceConfig {
    /// `host:port` the server binds to.
    pub listen: String,
    pub service_name: String,
    /// Maximum request body size in bytes.
    pub limit_post: usize,
    /// Maximum internal redirect hops per request.
    pub max_redirect: u32,
    /// Sub-configuration files by name, relative to the working directory.
    pub includes: HashMap<String, PathBuf>,
    pub logs: HashMap<String, LogConfig>,
    /// Appends a request report to error pages.
    pub debug: bool,
    /// Upper bound on how long a synchronous handler may take before it
    /// starts responding. Unbounded when absent.
    pub bridge_timeout_ms: Option<u64>,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_owned(),
            service_name: "DefaultService".to_owned(),
            limit_post: 2 * 1024 * 1024,
            max_redirect: 5,
            includes: HashMap::new(),
            logs: HashMap::from([(ERROR_LOG.to_owned(), LogConfig::default())]),
            debug: false,
            bridge_timeout_ms: None,
        }
    }
}

impl InstanceConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        load_file(path.as_ref())
    }

    pub fn bridge_timeout(&self) -> Option<Duration> {
        self.bridge_timeout_ms.map(Duration::from_millis)
    }
}

/// Reads and deserializes one YAML file.
pub(crate) fn load_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
    Ok(serde_yaml::from_str(&text)?)
}
