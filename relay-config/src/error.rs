// Error types for relay configuration

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration key not found: {0}")]
    KeyNotFound(String),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {format} configuration: {message}")]
    Parse { format: &'static str, message: String },

    #[error("Unsupported configuration file: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid setting `{field}`: {reason}")]
    Invalid { field: String, reason: String },

    #[error("Cannot convert settings: {0}")]
    Conversion(String),

    #[error("Failed to load .env file: {0}")]
    Dotenv(String),
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
