//! Exchange configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::protocol::{AdvertiseSettings, EndpointId, ScanSettings, ServiceMarker, MAX_READ_SIZE};

// ----------------------------------------------------------------------------
// Exchange Mode
// ----------------------------------------------------------------------------

/// Which halves of the exchange a session runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExchangeMode {
    /// Serve the local card and advertise it
    Give,
    /// Scan for a peer and read its card
    Take,
    /// Give and take concurrently, whichever side resolves first proceeds
    #[default]
    Both,
}

impl ExchangeMode {
    pub fn gives(&self) -> bool {
        matches!(self, ExchangeMode::Give | ExchangeMode::Both)
    }

    pub fn takes(&self) -> bool {
        matches!(self, ExchangeMode::Take | ExchangeMode::Both)
    }
}

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for the exchange coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Marker advertised by the giver and filtered on by the taker
    pub service_marker: ServiceMarker,
    /// Characteristic holding the encoded card
    pub endpoint: EndpointId,
    /// Default mode for `start_exchange`
    pub mode: ExchangeMode,
    /// Advertising profile
    pub advertise: AdvertiseSettings,
    /// Scan profile
    pub scan: ScanSettings,
    /// How long the server stays open after answering a read, so the
    /// remote side can finish its handshake before the service vanishes
    pub server_close_delay: Duration,
    /// Close the server if nobody reads it within this window
    pub server_timeout: Option<Duration>,
    /// Give up scanning if no peer shows up within this window
    pub scan_timeout: Option<Duration>,
    /// Maximum time from connect to a completed read
    pub connection_timeout: Duration,
    /// Largest encoded card accepted in either direction
    pub max_payload_size: usize,
    /// Keep serving the local card after the remote card arrived
    pub keep_serving_after_receive: bool,
    /// Buffered events per subscriber before lagging
    pub event_capacity: usize,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            service_marker: ServiceMarker::default(),
            endpoint: EndpointId::default(),
            mode: ExchangeMode::Both,
            advertise: AdvertiseSettings::default(),
            scan: ScanSettings::default(),
            server_close_delay: Duration::from_secs(5),
            server_timeout: Some(Duration::from_secs(60)),
            scan_timeout: Some(Duration::from_secs(30)),
            connection_timeout: Duration::from_secs(10),
            max_payload_size: MAX_READ_SIZE,
            keep_serving_after_receive: false,
            event_capacity: 64,
        }
    }
}

impl ExchangeConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the service marker
    pub fn with_service_marker(mut self, marker: ServiceMarker) -> Self {
        self.service_marker = marker;
        self
    }

    /// Set the card endpoint
    pub fn with_endpoint(mut self, endpoint: EndpointId) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Set the default exchange mode
    pub fn with_mode(mut self, mode: ExchangeMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the delay between serving a read and closing the server
    pub fn with_server_close_delay(mut self, delay: Duration) -> Self {
        self.server_close_delay = delay;
        self
    }

    /// Set or clear the server idle timeout
    pub fn with_server_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.server_timeout = timeout;
        self
    }

    /// Set or clear the scan timeout
    pub fn with_scan_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Set the connection timeout
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the maximum payload size
    pub fn with_max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size;
        self
    }

    /// Keep serving after the remote card was received
    pub fn with_keep_serving_after_receive(mut self, enabled: bool) -> Self {
        self.keep_serving_after_receive = enabled;
        self
    }

    /// Check the configuration for values the coordinator cannot honour
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_payload_size == 0 {
            return Err(ConfigError::invalid("max_payload_size", "must be non-zero"));
        }
        if self.max_payload_size > MAX_READ_SIZE {
            return Err(ConfigError::invalid(
                "max_payload_size",
                format!("exceeds single read limit of {MAX_READ_SIZE} bytes"),
            ));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::invalid("event_capacity", "must be non-zero"));
        }
        if self.connection_timeout.is_zero() {
            return Err(ConfigError::invalid("connection_timeout", "must be non-zero"));
        }
        if let Some(timeout) = self.server_timeout {
            if self.server_close_delay > timeout {
                return Err(ConfigError::invalid(
                    "server_close_delay",
                    "must not exceed server_timeout",
                ));
            }
        }
        Ok(())
    }
}
