//! cardswap CLI configuration
//!
//! Loaded from a TOML file with three sections:
//!
//! ```toml
//! [exchange]
//! mode = "both"
//! server_close_delay_secs = 5
//!
//! [ble]
//! adapter_index = 0
//!
//! [card]
//! id = 7
//! name = "Ada"
//! title = "Engineer"
//! ```
//!
//! Durations are whole seconds (milliseconds for the read response
//! timeout). A timeout of `0` disables it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use cardswap_ble::BleDriverConfig;
use cardswap_core::{
    EndpointId, ExchangeConfig, ExchangeMode, IdentityRecord, ServiceMarker,
    CARD_CHARACTERISTIC_UUID, CARD_SERVICE_UUID, MAX_READ_SIZE,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::cli::ExchangeArgs;
use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// Application Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub exchange: ExchangeSection,
    pub ble: BleSection,
    pub card: CardSection,
}

/// Session settings, mapped onto [`ExchangeConfig`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeSection {
    pub mode: ExchangeMode,
    pub service_uuid: Uuid,
    pub characteristic_uuid: Uuid,
    pub server_close_delay_secs: u64,
    pub server_timeout_secs: u64,
    pub scan_timeout_secs: u64,
    pub connection_timeout_secs: u64,
    pub max_payload_size: usize,
    pub keep_serving_after_receive: bool,
}

/// Adapter settings, mapped onto [`BleDriverConfig`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BleSection {
    pub adapter_index: usize,
    pub local_name: Option<String>,
    pub power_on: bool,
    pub read_response_timeout_ms: u64,
    pub connect_timeout_secs: u64,
}

/// The local card, any field may come from the command line instead
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CardSection {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub title: Option<String>,
}

// ----------------------------------------------------------------------------
// Default Implementations
// ----------------------------------------------------------------------------

impl Default for ExchangeSection {
    fn default() -> Self {
        Self {
            mode: ExchangeMode::Both,
            service_uuid: CARD_SERVICE_UUID,
            characteristic_uuid: CARD_CHARACTERISTIC_UUID,
            server_close_delay_secs: 5,
            server_timeout_secs: 60,
            scan_timeout_secs: 30,
            connection_timeout_secs: 10,
            max_payload_size: MAX_READ_SIZE,
            keep_serving_after_receive: false,
        }
    }
}

impl Default for BleSection {
    fn default() -> Self {
        let driver = BleDriverConfig::default();
        Self {
            adapter_index: driver.adapter_index,
            local_name: driver.local_name,
            power_on: driver.power_on,
            read_response_timeout_ms: driver.read_response_timeout.as_millis() as u64,
            connect_timeout_secs: driver.connect_timeout.as_secs(),
        }
    }
}

// ----------------------------------------------------------------------------
// Loading and Conversion
// ----------------------------------------------------------------------------

impl AppConfig {
    /// Load from `path`, else from the default location if it exists, else defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            info!("Loading configuration from: {}", path.display());
            return Self::load_from_file(path);
        }

        match Self::default_config_path() {
            Some(path) if path.exists() => {
                info!("Loading configuration from: {}", path.display());
                Self::load_from_file(&path)
            }
            _ => {
                info!("Using default configuration");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// `<config_dir>/cardswap/config.toml`
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("cardswap").join("config.toml"))
    }

    /// Build and validate the coordinator configuration
    pub fn exchange_config(&self) -> Result<ExchangeConfig> {
        let section = &self.exchange;
        let config = ExchangeConfig::default()
            .with_mode(section.mode)
            .with_service_marker(ServiceMarker(section.service_uuid))
            .with_endpoint(EndpointId(section.characteristic_uuid))
            .with_server_close_delay(Duration::from_secs(section.server_close_delay_secs))
            .with_server_timeout(optional_secs(section.server_timeout_secs))
            .with_scan_timeout(optional_secs(section.scan_timeout_secs))
            .with_connection_timeout(Duration::from_secs(section.connection_timeout_secs))
            .with_max_payload_size(section.max_payload_size)
            .with_keep_serving_after_receive(section.keep_serving_after_receive);

        config.validate()?;
        Ok(config)
    }

    pub fn driver_config(&self) -> BleDriverConfig {
        let section = &self.ble;
        let config = BleDriverConfig::new()
            .with_adapter_index(section.adapter_index)
            .with_power_on(section.power_on)
            .with_read_response_timeout(Duration::from_millis(section.read_response_timeout_ms))
            .with_connect_timeout(Duration::from_secs(section.connect_timeout_secs));

        match &section.local_name {
            Some(name) => config.with_local_name(name.clone()),
            None => config,
        }
    }

    /// The local card, command-line fields first
    pub fn card(&self, args: &ExchangeArgs) -> Result<IdentityRecord> {
        let id = args
            .id
            .or(self.card.id)
            .ok_or_else(|| missing_card_field("id"))?;
        let name = args
            .name
            .clone()
            .or_else(|| self.card.name.clone())
            .ok_or_else(|| missing_card_field("name"))?;
        let title = args
            .title
            .clone()
            .or_else(|| self.card.title.clone())
            .unwrap_or_default();

        Ok(IdentityRecord::new(id, name, title))
    }
}

fn optional_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn missing_card_field(field: &str) -> CliError {
    CliError::Config(format!(
        "card {field} is not set, pass --{field} or set it under [card]"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_the_exchange_defaults() {
        let config = AppConfig::default().exchange_config().unwrap();
        assert_eq!(config, ExchangeConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [exchange]
            mode = "take"
            scan_timeout_secs = 0

            [card]
            name = "Ada"
            "#,
        )
        .unwrap();

        let exchange = config.exchange_config().unwrap();
        assert_eq!(exchange.mode, ExchangeMode::Take);
        assert_eq!(exchange.scan_timeout, None);
        assert_eq!(exchange.server_close_delay, Duration::from_secs(5));
        assert_eq!(config.ble, BleSection::default());
    }

    #[test]
    fn test_flags_override_card_section() {
        let config = AppConfig::from_toml(
            r#"
            [card]
            id = 1
            name = "Ada"
            title = "Engineer"
            "#,
        )
        .unwrap();

        let args = ExchangeArgs {
            name: Some("Grace".into()),
            ..Default::default()
        };
        let card = config.card(&args).unwrap();
        assert_eq!(card, IdentityRecord::new(1, "Grace", "Engineer"));
    }

    #[test]
    fn test_missing_card_fields_are_reported() {
        let err = AppConfig::default()
            .card(&ExchangeArgs::default())
            .unwrap_err();
        assert!(err.to_string().contains("--id"));
    }

    #[test]
    fn test_invalid_exchange_section_is_rejected() {
        let config = AppConfig::from_toml("[exchange]\nmax_payload_size = 4096\n").unwrap();
        assert!(matches!(
            config.exchange_config(),
            Err(CliError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_printed_config_loads_back() {
        let mut config = AppConfig::default();
        config.card.name = Some("Ada".into());
        config.ble.local_name = Some("cardswap".into());

        let text = config.to_toml().unwrap();
        assert!(text.contains("[exchange]"));
        assert_eq!(AppConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_unknown_mode_fails_to_parse() {
        assert!(matches!(
            AppConfig::from_toml("[exchange]\nmode = \"swap\"\n"),
            Err(CliError::TomlParsing(_))
        ));
    }
}
