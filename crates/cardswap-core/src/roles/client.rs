//! Channel client role
//!
//! Connects to a discovered peer, reads its card and disconnects. Every
//! exit path goes through [`ChannelClient::disconnect`], which releases the
//! connection handle exactly once.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::driver::{BleDriver, ConnectionHandle, EventSink, PeerHandle};
use crate::errors::{ExchangeError, FailureReason, Role};
use crate::protocol::{EndpointId, ServiceMarker};
use crate::record::IdentityRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClientState {
    #[default]
    Disconnected,
    Connecting,
    ServiceDiscovery,
    Reading,
}

pub struct ChannelClient {
    driver: Arc<dyn BleDriver>,
    state: ClientState,
    peer: Option<PeerHandle>,
    connection: Option<ConnectionHandle>,
    marker: ServiceMarker,
    endpoint: EndpointId,
}

impl ChannelClient {
    pub fn new(driver: Arc<dyn BleDriver>) -> Self {
        Self {
            driver,
            state: ClientState::Disconnected,
            peer: None,
            connection: None,
            marker: ServiceMarker::default(),
            endpoint: EndpointId::default(),
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn peer(&self) -> Option<&PeerHandle> {
        self.peer.as_ref()
    }

    /// Connect to `peer` and fetch `endpoint` from the `marker` service
    ///
    /// A client busy with another peer rejects the call and keeps its
    /// connection; connecting again to the current peer is a no-op.
    pub async fn connect(
        &mut self,
        peer: PeerHandle,
        marker: ServiceMarker,
        endpoint: EndpointId,
        sink: EventSink,
    ) -> Result<(), ExchangeError> {
        if self.state != ClientState::Disconnected {
            if self.peer.as_ref() == Some(&peer) {
                debug!("Already connecting to {}", peer);
                return Ok(());
            }
            return Err(ExchangeError::already_running(Role::Client));
        }

        self.state = ClientState::Connecting;
        self.marker = marker;
        self.endpoint = endpoint;
        match self.driver.connect(&peer, sink).await {
            Ok(handle) => {
                info!("Connecting to {}", peer);
                self.connection = Some(handle);
                self.peer = Some(peer);
                Ok(())
            }
            Err(e) => {
                self.state = ClientState::Disconnected;
                Err(e.into_exchange_error(Role::Client))
            }
        }
    }

    /// Link established, start service discovery
    pub async fn on_connected(&mut self) -> Result<(), ExchangeError> {
        if self.state != ClientState::Connecting {
            return Ok(());
        }
        let Some(connection) = self.connection else {
            return Ok(());
        };

        self.state = ClientState::ServiceDiscovery;
        if let Err(e) = self.driver.discover_services(connection, self.marker).await {
            self.disconnect().await;
            return Err(e.into_exchange_error(Role::Client));
        }
        Ok(())
    }

    /// Link could not be established
    pub async fn on_connect_failed(&mut self, reason: String) -> Option<ExchangeError> {
        if self.state == ClientState::Disconnected {
            return None;
        }
        self.disconnect().await;
        Some(ExchangeError::new(Role::Client, FailureReason::Connect(reason)))
    }

    /// Discovery finished, read the card if the endpoint exists
    pub async fn on_services_discovered(
        &mut self,
        endpoints: &[EndpointId],
    ) -> Result<(), ExchangeError> {
        if self.state != ClientState::ServiceDiscovery {
            return Ok(());
        }
        let Some(connection) = self.connection else {
            return Ok(());
        };

        if !endpoints.contains(&self.endpoint) {
            let endpoint = self.endpoint;
            self.disconnect().await;
            return Err(ExchangeError::new(
                Role::Client,
                FailureReason::EndpointNotFound(endpoint),
            ));
        }

        self.state = ClientState::Reading;
        if let Err(e) = self
            .driver
            .read_endpoint(connection, self.marker, self.endpoint)
            .await
        {
            self.disconnect().await;
            return Err(ExchangeError::new(Role::Client, FailureReason::Read(e.to_string())));
        }
        Ok(())
    }

    /// Read finished
    ///
    /// Returns the decoded card on success. The connection is released on
    /// every outcome, corrupt payloads included.
    pub async fn on_read_completed(
        &mut self,
        endpoint: EndpointId,
        result: Result<Vec<u8>, String>,
    ) -> Result<Option<IdentityRecord>, ExchangeError> {
        if self.state != ClientState::Reading {
            return Ok(None);
        }
        if endpoint != self.endpoint {
            debug!("Ignoring read completion for unexpected endpoint {}", endpoint);
            return Ok(None);
        }

        let outcome = match result {
            Ok(bytes) => IdentityRecord::decode(&bytes).map(Some).map_err(|e| {
                debug!(
                    "Undecodable payload ({} bytes): {}",
                    bytes.len(),
                    hex::encode(&bytes[..bytes.len().min(32)])
                );
                ExchangeError::new(Role::Client, FailureReason::PayloadCorrupt(e))
            }),
            Err(reason) => Err(ExchangeError::new(Role::Client, FailureReason::Read(reason))),
        };
        self.disconnect().await;
        outcome
    }

    /// The peer dropped the link before the read completed
    pub async fn on_disconnected(&mut self) -> Option<ExchangeError> {
        if self.state == ClientState::Disconnected {
            return None;
        }
        self.disconnect().await;
        Some(ExchangeError::new(
            Role::Client,
            FailureReason::Connect("connection lost".to_string()),
        ))
    }

    /// Release the connection, a no-op when disconnected
    pub async fn disconnect(&mut self) {
        self.state = ClientState::Disconnected;
        self.peer = None;
        let Some(connection) = self.connection.take() else {
            return;
        };
        if let Err(e) = self.driver.disconnect(connection).await {
            warn!("Failed to disconnect: {}", e);
        }
        info!("Disconnected");
    }
}
