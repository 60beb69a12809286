//! BLE protocol constants and identifiers for card exchange

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Service and Characteristic UUIDs
// ----------------------------------------------------------------------------

/// Service UUID advertised by a device offering its card
pub const CARD_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000180D_0000_1000_8000_00805F9B34FB);

/// Readable characteristic holding the encoded card
pub const CARD_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x00002A37_0000_1000_8000_00805F9B34FB);

/// Largest value a single ATT read can return
pub const MAX_READ_SIZE: usize = 512;

// ----------------------------------------------------------------------------
// Identifiers
// ----------------------------------------------------------------------------

/// Discoverable identifier advertised by the giver and filtered on by the taker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceMarker(pub Uuid);

impl Default for ServiceMarker {
    fn default() -> Self {
        Self(CARD_SERVICE_UUID)
    }
}

impl fmt::Display for ServiceMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Readable data point exposed by the server role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(pub Uuid);

impl Default for EndpointId {
    fn default() -> Self {
        Self(CARD_CHARACTERISTIC_UUID)
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

// ----------------------------------------------------------------------------
// Radio Settings
// ----------------------------------------------------------------------------

/// Trade-off between latency and power for advertising and scanning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RadioMode {
    LowPower,
    Balanced,
    #[default]
    LowLatency,
}

/// How aggressively the scanner reports matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchMode {
    Aggressive,
    #[default]
    Sticky,
}

/// Advertising profile handed to the driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvertiseSettings {
    pub mode: RadioMode,
    pub connectable: bool,
    /// The legacy advertising payload is 31 bytes, a name rarely fits next to a 128-bit UUID
    pub include_device_name: bool,
}

impl Default for AdvertiseSettings {
    fn default() -> Self {
        Self {
            mode: RadioMode::LowLatency,
            connectable: true,
            include_device_name: false,
        }
    }
}

/// Scan profile handed to the driver
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    pub mode: RadioMode,
    pub match_mode: MatchMode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_identifiers() {
        assert_eq!(
            ServiceMarker::default().to_string(),
            "0000180d-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            EndpointId::default().to_string(),
            "00002a37-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_advertise_defaults_match_short_range_profile() {
        let settings = AdvertiseSettings::default();
        assert_eq!(settings.mode, RadioMode::LowLatency);
        assert!(settings.connectable);
        assert!(!settings.include_device_name);
    }
}
