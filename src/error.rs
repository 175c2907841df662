// Error types for the relay process

use relay_config::ConfigError;
use relay_webhooks::WebhookError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Seed(#[from] crate::seed::SeedError),

    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, Error>;
