//! [`BleDriver`] implementation over btleplug and the platform peripheral

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use cardswap_core::{
    AdvertiseSettings, BleDriver, ConnectionHandle, DriverError, DriverEvent, EndpointId,
    EventSink, PeerHandle, RequestId, ScanSettings, ServerHandle, ServiceMarker,
};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::advertising::{BleAdvertiser, PlatformAdvertiser};
use crate::config::BleDriverConfig;
use crate::connection::BleConnections;
use crate::discovery::{initialize_adapter, BleDiscovery};
use crate::error::BleDriverError;
use crate::peer::PeerRegistry;
use crate::requests::ReadBridge;

// ----------------------------------------------------------------------------
// Platform Driver
// ----------------------------------------------------------------------------

/// Driver backed by the local Bluetooth adapter
///
/// The central half (scan, connect, read) runs on btleplug. The peripheral
/// half (advertise, serve) runs on BlueZ where available and reports
/// `FeatureUnsupported` elsewhere.
pub struct PlatformDriver {
    config: BleDriverConfig,
    discovery: BleDiscovery,
    connections: BleConnections,
    advertiser: Mutex<PlatformAdvertiser>,
    bridge: ReadBridge,
    server: Mutex<Option<ServerHandle>>,
    next_server: AtomicU64,
}

impl PlatformDriver {
    /// Open the configured adapter
    pub async fn new(config: BleDriverConfig) -> Result<Self, BleDriverError> {
        let adapter = initialize_adapter(&config).await?;
        let peers = PeerRegistry::new();

        Ok(Self {
            discovery: BleDiscovery::new(adapter.clone(), peers.clone()),
            connections: BleConnections::new(adapter, peers, config.connect_timeout),
            advertiser: Mutex::new(PlatformAdvertiser::new(&config)),
            bridge: ReadBridge::new(config.read_response_timeout),
            server: Mutex::new(None),
            next_server: AtomicU64::new(1),
            config,
        })
    }

    /// Release everything the driver holds
    pub async fn shutdown(&self) {
        if let Err(e) = self.discovery.stop_scan().await {
            debug!("Stopping scan on shutdown: {}", e);
        }
        self.connections.disconnect_all().await;

        let mut advertiser = self.advertiser.lock().await;
        let _ = advertiser.stop_advertising().await;
        let _ = advertiser.stop_serving().await;
        self.bridge.clear().await;
        self.server.lock().await.take();
        info!("BLE driver shut down");
    }
}

#[async_trait]
impl BleDriver for PlatformDriver {
    async fn radio_enabled(&self) -> Result<bool, DriverError> {
        Ok(self.advertiser.lock().await.radio_powered().await?)
    }

    async fn advertise(
        &self,
        marker: ServiceMarker,
        settings: &AdvertiseSettings,
        sink: EventSink,
    ) -> Result<(), DriverError> {
        self.advertiser
            .lock()
            .await
            .start_advertising(marker, settings, &self.config)
            .await?;

        // BlueZ confirms registration synchronously
        sink.emit(DriverEvent::AdvertiseStarted);
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), DriverError> {
        Ok(self.advertiser.lock().await.stop_advertising().await?)
    }

    async fn scan(
        &self,
        marker: ServiceMarker,
        settings: &ScanSettings,
        sink: EventSink,
    ) -> Result<(), DriverError> {
        Ok(self.discovery.start_scan(marker, settings, sink).await?)
    }

    async fn stop_scan(&self) -> Result<(), DriverError> {
        Ok(self.discovery.stop_scan().await?)
    }

    async fn open_server(
        &self,
        marker: ServiceMarker,
        endpoint: EndpointId,
        sink: EventSink,
    ) -> Result<ServerHandle, DriverError> {
        let mut server = self.server.lock().await;
        if server.is_some() {
            return Err(BleDriverError::ServerAlreadyRunning.into());
        }

        self.advertiser
            .lock()
            .await
            .serve(marker, endpoint, self.bridge.clone(), sink)
            .await?;

        let handle = ServerHandle(self.next_server.fetch_add(1, Ordering::Relaxed));
        *server = Some(handle);
        Ok(handle)
    }

    async fn respond(
        &self,
        server: ServerHandle,
        request: RequestId,
        payload: Vec<u8>,
    ) -> Result<(), DriverError> {
        if *self.server.lock().await != Some(server) {
            return Err(DriverError::UnknownHandle);
        }
        Ok(self.bridge.respond(request, payload).await?)
    }

    async fn close_server(&self, server: ServerHandle) -> Result<(), DriverError> {
        let mut current = self.server.lock().await;
        if *current != Some(server) {
            return Err(DriverError::UnknownHandle);
        }

        self.advertiser.lock().await.stop_serving().await?;
        self.bridge.clear().await;
        *current = None;
        Ok(())
    }

    async fn connect(
        &self,
        peer: &PeerHandle,
        sink: EventSink,
    ) -> Result<ConnectionHandle, DriverError> {
        Ok(self.connections.connect(peer, sink).await?)
    }

    async fn discover_services(
        &self,
        connection: ConnectionHandle,
        marker: ServiceMarker,
    ) -> Result<(), DriverError> {
        Ok(self.connections.discover_services(connection, marker).await?)
    }

    async fn read_endpoint(
        &self,
        connection: ConnectionHandle,
        marker: ServiceMarker,
        endpoint: EndpointId,
    ) -> Result<(), DriverError> {
        Ok(self
            .connections
            .read_endpoint(connection, marker, endpoint)
            .await?)
    }

    async fn disconnect(&self, connection: ConnectionHandle) -> Result<(), DriverError> {
        Ok(self.connections.disconnect(connection).await?)
    }
}
