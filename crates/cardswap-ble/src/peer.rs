//! Discovered peripherals

use std::collections::HashMap;
use std::sync::Arc;

use btleplug::api::Peripheral as _;
use btleplug::platform::{Peripheral as PlatformPeripheral, PeripheralId};
use cardswap_core::PeerHandle;
use tokio::sync::RwLock;

use crate::error::BleDriverError;

// ----------------------------------------------------------------------------
// Peer Registry
// ----------------------------------------------------------------------------

/// A peripheral seen advertising the card service
#[derive(Debug, Clone)]
pub struct BlePeer {
    pub peripheral: PlatformPeripheral,
    pub address: String,
    pub local_name: Option<String>,
}

impl BlePeer {
    pub fn new(peripheral: PlatformPeripheral, local_name: Option<String>) -> Self {
        let address = peripheral.address().to_string();
        Self {
            peripheral,
            address,
            local_name,
        }
    }

    /// Handle passed to the core, addressing the peer by its BD address
    pub fn handle(&self) -> PeerHandle {
        PeerHandle {
            address: self.address.clone(),
            name: self.local_name.clone(),
        }
    }

    pub fn peripheral_id(&self) -> PeripheralId {
        self.peripheral.id()
    }
}

/// Peripherals discovered by the current adapter, keyed by address
#[derive(Debug, Clone, Default)]
pub struct PeerRegistry {
    peers: Arc<RwLock<HashMap<String, BlePeer>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a peer, returns false if it was already known
    pub async fn insert(&self, peer: BlePeer) -> bool {
        let mut peers = self.peers.write().await;
        peers.insert(peer.address.clone(), peer).is_none()
    }

    pub async fn peripheral(&self, address: &str) -> Result<PlatformPeripheral, BleDriverError> {
        self.peers
            .read()
            .await
            .get(address)
            .map(|peer| peer.peripheral.clone())
            .ok_or_else(|| BleDriverError::PeerNotFound {
                address: address.to_string(),
            })
    }

    /// Forget every peer, done at the start of each scan
    pub async fn clear(&self) {
        self.peers.write().await.clear();
    }
}
