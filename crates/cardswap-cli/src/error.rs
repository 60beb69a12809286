//! Error handling for the cardswap CLI

use std::time::Duration;

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Exchange failed: {0}")]
    Exchange(#[from] cardswap_core::ExchangeError),

    #[error("Invalid exchange configuration: {0}")]
    InvalidConfig(#[from] cardswap_core::ConfigError),

    #[error("BLE driver error: {0}")]
    Driver(#[from] cardswap_ble::BleDriverError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No card received within {0:?}")]
    TimedOut(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
