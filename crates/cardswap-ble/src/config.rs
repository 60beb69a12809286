//! BLE driver configuration

use std::time::Duration;

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for the platform BLE driver
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BleDriverConfig {
    /// Index into the adapters reported by the OS
    pub adapter_index: usize,
    /// Name to advertise when the advertising profile includes it
    pub local_name: Option<String>,
    /// Power the adapter on during initialisation if it is off
    pub power_on: bool,
    /// How long a remote read may wait for the server role to answer
    pub read_response_timeout: Duration,
    /// Upper bound for the platform connect call
    pub connect_timeout: Duration,
}

impl Default for BleDriverConfig {
    fn default() -> Self {
        Self {
            adapter_index: 0,
            local_name: None,
            power_on: true,
            read_response_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl BleDriverConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the adapter by index
    pub fn with_adapter_index(mut self, index: usize) -> Self {
        self.adapter_index = index;
        self
    }

    /// Set the advertised local name
    pub fn with_local_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = Some(name.into());
        self
    }

    /// Enable or disable powering the adapter on
    pub fn with_power_on(mut self, enabled: bool) -> Self {
        self.power_on = enabled;
        self
    }

    /// Set the read response timeout
    pub fn with_read_response_timeout(mut self, timeout: Duration) -> Self {
        self.read_response_timeout = timeout;
        self
    }

    /// Set the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}
