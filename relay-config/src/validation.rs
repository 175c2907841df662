// Configuration validation

use crate::{ConfigError, Result};

/// Trait for validating loaded configuration
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Reusable field checks
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate that a value is not blank
    pub fn not_empty(value: &str, field: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::invalid(field, "cannot be empty"));
        }
        Ok(())
    }

    /// Validate that a number is at least `min`
    pub fn at_least<T: PartialOrd + std::fmt::Display>(value: T, min: T, field: &str) -> Result<()> {
        if value < min {
            return Err(ConfigError::invalid(
                field,
                format!("must be at least {min}, got {value}"),
            ));
        }
        Ok(())
    }

    /// Validate that a value is an absolute http(s) URL
    pub fn is_http_url(value: &str, field: &str) -> Result<()> {
        let rest = value
            .strip_prefix("https://")
            .or_else(|| value.strip_prefix("http://"));
        match rest {
            Some(host) if !host.is_empty() && !host.starts_with('/') => Ok(()),
            _ => Err(ConfigError::invalid(
                field,
                format!("must be an absolute http(s) URL, got {value:?}"),
            )),
        }
    }

    /// Validate port number
    pub fn is_port(value: u16, field: &str) -> Result<()> {
        if value == 0 {
            return Err(ConfigError::invalid(field, "must be a non-zero port number"));
        }
        Ok(())
    }
}
