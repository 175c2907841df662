//! Configuration for outbound delivery

use std::time::Duration;

/// Settings for the [`Forwarder`](crate::Forwarder)
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Upper bound on one delivery attempt, connect through response body
    pub timeout: Duration,

    /// User-Agent header for outgoing requests
    pub user_agent: String,

    /// Whether to verify destination TLS certificates
    pub verify_ssl: bool,

    /// Maximum serialized payload size in bytes
    pub max_payload_size: usize,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: format!("webhook-relay/{}", env!("CARGO_PKG_VERSION")),
            verify_ssl: true,
            max_payload_size: 1024 * 1024,
        }
    }
}

impl ForwarderConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for custom configuration
    pub fn builder() -> ForwarderConfigBuilder {
        ForwarderConfigBuilder::new()
    }
}

/// Builder for ForwarderConfig
#[derive(Debug, Clone, Default)]
pub struct ForwarderConfigBuilder {
    config: ForwarderConfig,
}

impl ForwarderConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ForwarderConfig::default(),
        }
    }

    /// Set the delivery timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the timeout in seconds
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeout = Duration::from_secs(secs);
        self
    }

    /// Set the User-Agent header
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Set TLS certificate verification
    pub fn verify_ssl(mut self, verify: bool) -> Self {
        self.config.verify_ssl = verify;
        self
    }

    /// Set maximum payload size
    pub fn max_payload_size(mut self, size: usize) -> Self {
        self.config.max_payload_size = size;
        self
    }

    pub fn build(self) -> ForwarderConfig {
        self.config
    }
}
