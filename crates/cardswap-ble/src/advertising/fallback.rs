//! Fallback peripheral implementation for platforms without BlueZ

use cardswap_core::{AdvertiseSettings, EndpointId, EventSink, ServiceMarker};
use tracing::warn;

use crate::config::BleDriverConfig;
use crate::error::BleDriverError;
use crate::requests::ReadBridge;

use super::BleAdvertiser;

// ----------------------------------------------------------------------------
// Fallback Implementation
// ----------------------------------------------------------------------------

/// Rejects every peripheral operation, scanning and reading still work
#[derive(Debug, Default)]
pub struct FallbackAdvertiser;

impl FallbackAdvertiser {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl BleAdvertiser for FallbackAdvertiser {
    async fn radio_powered(&mut self) -> Result<bool, BleDriverError> {
        // No way to ask, btleplug surfaces a powered-off radio on scan
        Ok(true)
    }

    async fn start_advertising(
        &mut self,
        marker: ServiceMarker,
        _settings: &AdvertiseSettings,
        _config: &BleDriverConfig,
    ) -> Result<(), BleDriverError> {
        warn!(
            "BLE advertising not supported on this platform, service {} will not be discoverable",
            marker
        );
        Err(BleDriverError::Unsupported("advertising"))
    }

    async fn stop_advertising(&mut self) -> Result<(), BleDriverError> {
        Ok(())
    }

    async fn serve(
        &mut self,
        marker: ServiceMarker,
        _endpoint: EndpointId,
        _bridge: ReadBridge,
        _sink: EventSink,
    ) -> Result<(), BleDriverError> {
        warn!("GATT server not supported on this platform, cannot serve {}", marker);
        Err(BleDriverError::Unsupported("GATT server"))
    }

    async fn stop_serving(&mut self) -> Result<(), BleDriverError> {
        Ok(())
    }
}
