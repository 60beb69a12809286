//! Central-side connections and card reads

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use btleplug::api::{Central, CentralEvent, Peripheral as _};
use btleplug::platform::{Adapter, Peripheral};
use cardswap_core::{
    ConnectionHandle, DriverEvent, EndpointId, EventSink, PeerHandle, ServiceMarker,
};
use futures::stream::StreamExt;
use smallvec::SmallVec;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info};

use crate::error::BleDriverError;
use crate::peer::PeerRegistry;

// ----------------------------------------------------------------------------
// Connection Management
// ----------------------------------------------------------------------------

struct ConnectionEntry {
    peer: PeerHandle,
    peripheral: Peripheral,
    sink: EventSink,
    tasks: Vec<JoinHandle<()>>,
}

impl ConnectionEntry {
    fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// Open connections keyed by the handle given to the client role
pub struct BleConnections {
    adapter: Adapter,
    peers: PeerRegistry,
    connect_timeout: Duration,
    next_id: AtomicU64,
    connections: Arc<Mutex<HashMap<ConnectionHandle, ConnectionEntry>>>,
}

impl BleConnections {
    pub fn new(adapter: Adapter, peers: PeerRegistry, connect_timeout: Duration) -> Self {
        Self {
            adapter,
            peers,
            connect_timeout,
            next_id: AtomicU64::new(1),
            connections: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Begin connecting to a scanned peer
    pub async fn connect(
        &self,
        peer: &PeerHandle,
        sink: EventSink,
    ) -> Result<ConnectionHandle, BleDriverError> {
        let peripheral = self.peers.peripheral(&peer.address).await?;
        let handle = ConnectionHandle(self.next_id.fetch_add(1, Ordering::Relaxed));

        let events = self
            .adapter
            .events()
            .await
            .map_err(|e| BleDriverError::EventStreamFailed(e.to_string()))?;

        let watcher = {
            let sink = sink.clone();
            let id = peripheral.id();
            tokio::spawn(async move {
                let mut events = events;
                while let Some(event) = events.next().await {
                    if matches!(event, CentralEvent::DeviceDisconnected(ref gone) if *gone == id) {
                        debug!("Link to {:?} dropped", id);
                        sink.emit(DriverEvent::Disconnected);
                        break;
                    }
                }
            })
        };

        let connector = {
            let sink = sink.clone();
            let peripheral = peripheral.clone();
            let connect_timeout = self.connect_timeout;
            let peer = peer.clone();
            tokio::spawn(async move {
                match timeout(connect_timeout, peripheral.connect()).await {
                    Ok(Ok(())) => {
                        info!("Connected to peer {}", peer);
                        sink.emit(DriverEvent::Connected);
                    }
                    Ok(Err(e)) => {
                        error!("Failed to connect to peer {}: {}", peer, e);
                        sink.emit(DriverEvent::ConnectFailed(e.to_string()));
                    }
                    Err(_) => {
                        error!("Connection to peer {} timed out", peer);
                        sink.emit(DriverEvent::ConnectFailed(
                            BleDriverError::ConnectionTimeout.to_string(),
                        ));
                    }
                }
            })
        };

        self.connections.lock().await.insert(
            handle,
            ConnectionEntry {
                peer: peer.clone(),
                peripheral,
                sink,
                tasks: vec![watcher, connector],
            },
        );
        Ok(handle)
    }

    /// Discover services and report the characteristics of `marker`
    pub async fn discover_services(
        &self,
        connection: ConnectionHandle,
        marker: ServiceMarker,
    ) -> Result<(), BleDriverError> {
        let mut connections = self.connections.lock().await;
        let entry = connections
            .get_mut(&connection)
            .ok_or(BleDriverError::UnknownHandle)?;

        let peripheral = entry.peripheral.clone();
        let sink = entry.sink.clone();
        entry.tasks.push(tokio::spawn(async move {
            if let Err(e) = peripheral.discover_services().await {
                error!("Failed to discover services: {}", e);
                sink.emit(DriverEvent::ConnectFailed(format!(
                    "Failed to discover services: {}",
                    e
                )));
                return;
            }

            let endpoints: SmallVec<[EndpointId; 4]> = peripheral
                .services()
                .into_iter()
                .filter(|service| service.uuid == marker.0)
                .flat_map(|service| service.characteristics)
                .map(|characteristic| EndpointId(characteristic.uuid))
                .collect();

            debug!("Service {} exposes {} endpoints", marker, endpoints.len());
            sink.emit(DriverEvent::ServicesDiscovered { endpoints });
        }));
        Ok(())
    }

    /// Read one characteristic of `marker`
    pub async fn read_endpoint(
        &self,
        connection: ConnectionHandle,
        marker: ServiceMarker,
        endpoint: EndpointId,
    ) -> Result<(), BleDriverError> {
        let mut connections = self.connections.lock().await;
        let entry = connections
            .get_mut(&connection)
            .ok_or(BleDriverError::UnknownHandle)?;

        let characteristic = entry
            .peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == endpoint.0 && c.service_uuid == marker.0)
            .ok_or_else(|| BleDriverError::CharacteristicNotFound {
                characteristic: endpoint.to_string(),
            })?;

        let peripheral = entry.peripheral.clone();
        let sink = entry.sink.clone();
        let peer = entry.peer.clone();
        entry.tasks.push(tokio::spawn(async move {
            let result = peripheral
                .read(&characteristic)
                .await
                .map_err(|e| e.to_string());
            match &result {
                Ok(bytes) => debug!("Read {} bytes from {}", bytes.len(), peer),
                Err(e) => error!("Failed to read from {}: {}", peer, e),
            }
            sink.emit(DriverEvent::ReadCompleted { endpoint, result });
        }));
        Ok(())
    }

    /// Drop the connection whatever state it is in
    pub async fn disconnect(&self, connection: ConnectionHandle) -> Result<(), BleDriverError> {
        let entry = self.connections.lock().await.remove(&connection);
        let Some(mut entry) = entry else {
            return Err(BleDriverError::UnknownHandle);
        };

        entry.abort_tasks();
        if let Err(e) = entry.peripheral.disconnect().await {
            debug!("Disconnect from {} reported: {}", entry.peer, e);
        }
        info!("Disconnected from peer: {}", entry.peer);
        Ok(())
    }

    /// Drop every open connection
    pub async fn disconnect_all(&self) {
        let entries: Vec<_> = self.connections.lock().await.drain().collect();
        for (_, mut entry) in entries {
            entry.abort_tasks();
            if let Err(e) = entry.peripheral.disconnect().await {
                debug!("Disconnect from {} reported: {}", entry.peer, e);
            }
        }
    }
}
