//! Central-side adapter setup and scanning

use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use cardswap_core::{DriverEvent, EventSink, ScanSettings, ServiceMarker};
use futures::stream::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BleDriverConfig;
use crate::error::BleDriverError;
use crate::peer::{BlePeer, PeerRegistry};

// ----------------------------------------------------------------------------
// Adapter Setup
// ----------------------------------------------------------------------------

/// Open the btleplug adapter selected by the configuration
pub async fn initialize_adapter(config: &BleDriverConfig) -> Result<Adapter, BleDriverError> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    let adapter = adapters
        .into_iter()
        .nth(config.adapter_index)
        .ok_or(BleDriverError::AdapterNotAvailable)?;

    info!(
        "BLE adapter {} initialized: {}",
        config.adapter_index,
        adapter.adapter_info().await.unwrap_or_default()
    );
    Ok(adapter)
}

// ----------------------------------------------------------------------------
// Discovery Implementation
// ----------------------------------------------------------------------------

/// Scans for peers advertising the card service
pub struct BleDiscovery {
    adapter: Adapter,
    peers: PeerRegistry,
    scan_task: Mutex<Option<JoinHandle<()>>>,
}

impl BleDiscovery {
    pub fn new(adapter: Adapter, peers: PeerRegistry) -> Self {
        Self {
            adapter,
            peers,
            scan_task: Mutex::new(None),
        }
    }

    /// Start a filtered scan, matches are reported to `sink` once per address
    pub async fn start_scan(
        &self,
        marker: ServiceMarker,
        settings: &ScanSettings,
        sink: EventSink,
    ) -> Result<(), BleDriverError> {
        let mut task = self.scan_task.lock().await;
        if let Some(previous) = task.take() {
            previous.abort();
        }

        self.peers.clear().await;

        let events = self
            .adapter
            .events()
            .await
            .map_err(|e| BleDriverError::EventStreamFailed(e.to_string()))?;

        // btleplug has no radio-mode or match-mode knobs, the platform decides
        debug!(
            "Scan settings {:?}/{:?} applied as platform defaults",
            settings.mode, settings.match_mode
        );

        self.adapter
            .start_scan(ScanFilter {
                services: vec![marker.0],
            })
            .await?;

        let adapter = self.adapter.clone();
        let peers = self.peers.clone();
        *task = Some(tokio::spawn(async move {
            let mut events = events;
            while let Some(event) = events.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    CentralEvent::ServicesAdvertisement { id, .. } => id,
                    _ => continue,
                };

                match advertised_peer(&adapter, &id, marker).await {
                    Ok(Some(peer)) => {
                        let handle = peer.handle();
                        if peers.insert(peer).await {
                            debug!("Discovered card peer {}", handle);
                            if !sink.emit(DriverEvent::PeerFound(handle)) {
                                break;
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(e) => debug!("Ignoring unreadable peripheral {:?}: {}", id, e),
                }
            }

            if !sink.is_closed() {
                warn!("BLE event stream ended while scanning");
                sink.emit(DriverEvent::ScanFailed("event stream ended".into()));
            }
        }));

        info!("Started BLE scanning for service {}", marker);
        Ok(())
    }

    /// Stop the scan and its event task
    pub async fn stop_scan(&self) -> Result<(), BleDriverError> {
        let task = self.scan_task.lock().await.take();
        let Some(task) = task else {
            return Ok(());
        };
        task.abort();

        self.adapter.stop_scan().await?;
        info!("Stopped BLE scanning");
        Ok(())
    }
}

/// Resolve a peripheral and keep it only if it advertises `marker`
async fn advertised_peer(
    adapter: &Adapter,
    id: &PeripheralId,
    marker: ServiceMarker,
) -> Result<Option<BlePeer>, BleDriverError> {
    let peripheral = adapter.peripheral(id).await?;
    let Some(properties) = peripheral.properties().await? else {
        return Ok(None);
    };

    if !properties.services.contains(&marker.0) {
        return Ok(None);
    }

    Ok(Some(BlePeer::new(peripheral, properties.local_name)))
}
