//! Peripheral role: advertising and the card GATT service

pub mod fallback;
#[cfg(target_os = "linux")]
pub mod linux;

use cardswap_core::{AdvertiseSettings, EndpointId, EventSink, ServiceMarker};

use crate::config::BleDriverConfig;
use crate::error::BleDriverError;
use crate::requests::ReadBridge;

// ----------------------------------------------------------------------------
// Cross-platform Peripheral Trait
// ----------------------------------------------------------------------------

/// Platform hooks for the advertising and serving half of the driver
#[async_trait::async_trait]
pub trait BleAdvertiser: Send + Sync {
    /// Whether the local adapter is powered
    async fn radio_powered(&mut self) -> Result<bool, BleDriverError>;

    /// Start broadcasting `marker`
    async fn start_advertising(
        &mut self,
        marker: ServiceMarker,
        settings: &AdvertiseSettings,
        config: &BleDriverConfig,
    ) -> Result<(), BleDriverError>;

    async fn stop_advertising(&mut self) -> Result<(), BleDriverError>;

    /// Register a primary service with one readable characteristic,
    /// answering reads through `bridge`
    async fn serve(
        &mut self,
        marker: ServiceMarker,
        endpoint: EndpointId,
        bridge: ReadBridge,
        sink: EventSink,
    ) -> Result<(), BleDriverError>;

    async fn stop_serving(&mut self) -> Result<(), BleDriverError>;
}

// ----------------------------------------------------------------------------
// Platform Detection and Factory
// ----------------------------------------------------------------------------

/// Platform-specific advertiser
pub enum PlatformAdvertiser {
    #[cfg(target_os = "linux")]
    Linux(linux::LinuxAdvertiser),
    #[cfg_attr(target_os = "linux", allow(dead_code))]
    Fallback(fallback::FallbackAdvertiser),
}

impl PlatformAdvertiser {
    /// Create the advertiser for the current platform
    pub fn new(config: &BleDriverConfig) -> Self {
        #[cfg(target_os = "linux")]
        {
            Self::Linux(linux::LinuxAdvertiser::new(config))
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = config;
            Self::Fallback(fallback::FallbackAdvertiser::new())
        }
    }
}

#[async_trait::async_trait]
impl BleAdvertiser for PlatformAdvertiser {
    async fn radio_powered(&mut self) -> Result<bool, BleDriverError> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Linux(ref mut advertiser) => advertiser.radio_powered().await,
            Self::Fallback(ref mut advertiser) => advertiser.radio_powered().await,
        }
    }

    async fn start_advertising(
        &mut self,
        marker: ServiceMarker,
        settings: &AdvertiseSettings,
        config: &BleDriverConfig,
    ) -> Result<(), BleDriverError> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Linux(ref mut advertiser) => {
                advertiser.start_advertising(marker, settings, config).await
            }
            Self::Fallback(ref mut advertiser) => {
                advertiser.start_advertising(marker, settings, config).await
            }
        }
    }

    async fn stop_advertising(&mut self) -> Result<(), BleDriverError> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Linux(ref mut advertiser) => advertiser.stop_advertising().await,
            Self::Fallback(ref mut advertiser) => advertiser.stop_advertising().await,
        }
    }

    async fn serve(
        &mut self,
        marker: ServiceMarker,
        endpoint: EndpointId,
        bridge: ReadBridge,
        sink: EventSink,
    ) -> Result<(), BleDriverError> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Linux(ref mut advertiser) => advertiser.serve(marker, endpoint, bridge, sink).await,
            Self::Fallback(ref mut advertiser) => {
                advertiser.serve(marker, endpoint, bridge, sink).await
            }
        }
    }

    async fn stop_serving(&mut self) -> Result<(), BleDriverError> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Linux(ref mut advertiser) => advertiser.stop_serving().await,
            Self::Fallback(ref mut advertiser) => advertiser.stop_serving().await,
        }
    }
}
