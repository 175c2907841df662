//! Typed settings for the relay process.

use crate::{ConfigManager, ConfigValidator, Result, Validate};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment prefix for every relay setting.
pub const ENV_PREFIX: &str = "RELAY";

/// Runtime settings for the relay server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Interface to bind
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Public base URL used to print inbound webhook URLs
    pub domain_name: String,

    /// JSON seed file holding endpoints and mappings
    pub store_path: Option<String>,

    /// Upper bound for one outbound delivery
    pub delivery_timeout_secs: u64,

    /// Upper bound for one mapping store lookup
    pub store_timeout_ms: u64,

    /// Evaluation steps a formula may take before it is aborted
    pub formula_step_budget: u64,

    /// Largest accepted inbound body
    pub max_body_bytes: usize,

    /// User-Agent sent to destinations
    pub user_agent: String,

    /// Verify destination TLS certificates
    pub verify_tls: bool,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            domain_name: "http://localhost".to_string(),
            store_path: None,
            delivery_timeout_secs: 10,
            store_timeout_ms: 2_000,
            formula_step_budget: 10_000,
            max_body_bytes: 1024 * 1024,
            user_agent: format!("webhook-relay/{}", env!("CARGO_PKG_VERSION")),
            verify_tls: true,
        }
    }
}

impl RelaySettings {
    /// Load settings from defaults, an optional file, `.env` and `RELAY_*` variables.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let manager = ConfigManager::with_prefix(ENV_PREFIX);
        manager.load_serialized(&Self::default())?;
        if let Some(path) = config_file {
            manager.load_file(path)?;
        }
        manager.load_dotenv(None)?;
        manager.load_validated()
    }

    /// Load settings from an already populated manager.
    pub fn from_manager(manager: &ConfigManager) -> Result<Self> {
        manager.load_validated()
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// `host:port` for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Public URL of an inbound endpoint path such as `/webhook-{id}`.
    pub fn public_url(&self, path: &str) -> String {
        format!("{}{}", self.domain_name.trim_end_matches('/'), path)
    }
}

impl Validate for RelaySettings {
    fn validate(&self) -> Result<()> {
        ConfigValidator::not_empty(&self.host, "host")?;
        ConfigValidator::is_port(self.port, "port")?;
        ConfigValidator::is_http_url(&self.domain_name, "domain_name")?;
        ConfigValidator::at_least(self.delivery_timeout_secs, 1, "delivery_timeout_secs")?;
        ConfigValidator::at_least(self.store_timeout_ms, 1, "store_timeout_ms")?;
        ConfigValidator::at_least(self.formula_step_budget, 1, "formula_step_budget")?;
        ConfigValidator::at_least(self.max_body_bytes, 1024, "max_body_bytes")?;
        ConfigValidator::not_empty(&self.user_agent, "user_agent")?;
        Ok(())
    }
}
