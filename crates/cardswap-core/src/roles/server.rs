//! Channel server role
//!
//! Exposes the local card as one readable endpoint.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::driver::{BleDriver, EventSink, RequestId, ServerHandle};
use crate::errors::{ExchangeError, FailureReason, Role};
use crate::protocol::{EndpointId, ServiceMarker};
use crate::record::IdentityRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServerState {
    #[default]
    Closed,
    Open,
}

pub struct ChannelServer {
    driver: Arc<dyn BleDriver>,
    state: ServerState,
    handle: Option<ServerHandle>,
    endpoint: EndpointId,
    payload: Vec<u8>,
    reads_served: u32,
}

impl ChannelServer {
    pub fn new(driver: Arc<dyn BleDriver>) -> Self {
        Self {
            driver,
            state: ServerState::Closed,
            handle: None,
            endpoint: EndpointId::default(),
            payload: Vec::new(),
            reads_served: 0,
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Reads answered since the server was last opened
    pub fn reads_served(&self) -> u32 {
        self.reads_served
    }

    /// Register the service and serve `record` from `endpoint`
    pub async fn open(
        &mut self,
        record: &IdentityRecord,
        marker: ServiceMarker,
        endpoint: EndpointId,
        max_payload_size: usize,
        sink: EventSink,
    ) -> Result<(), ExchangeError> {
        if self.state == ServerState::Open {
            return Err(ExchangeError::already_running(Role::Server));
        }

        let payload = record.encode_within(max_payload_size).map_err(|e| {
            ExchangeError::new(
                Role::Server,
                FailureReason::Server(format!("local card cannot be served: {e}")),
            )
        })?;

        let handle = self
            .driver
            .open_server(marker, endpoint, sink)
            .await
            .map_err(|e| e.into_exchange_error(Role::Server))?;

        self.handle = Some(handle);
        self.endpoint = endpoint;
        self.payload = payload;
        self.reads_served = 0;
        self.state = ServerState::Open;
        info!("Server open, serving {} bytes on {}", self.payload.len(), endpoint);
        Ok(())
    }

    /// Answer a read request
    ///
    /// Requests for any other endpoint get no response. Continuation reads
    /// (non-zero `offset`) are answered but belong to the read that started
    /// at offset 0. Returns whether a new read of the card began.
    pub async fn on_read_request(
        &mut self,
        request: RequestId,
        endpoint: EndpointId,
        offset: usize,
    ) -> Result<bool, ExchangeError> {
        let Some(handle) = self.handle else {
            debug!("Read request {:?} after server closed", request);
            return Ok(false);
        };
        if endpoint != self.endpoint {
            debug!("Ignoring read request for unexpected endpoint {}", endpoint);
            return Ok(false);
        }

        self.driver
            .respond(handle, request, self.payload.clone())
            .await
            .map_err(|e| e.into_exchange_error(Role::Server))?;
        if offset > 0 {
            debug!("Continued read request {:?} at offset {}", request, offset);
            return Ok(false);
        }
        self.reads_served += 1;
        debug!("Served read request {:?}", request);
        Ok(true)
    }

    /// Release the service registration, a no-op when closed
    pub async fn close(&mut self) {
        self.state = ServerState::Closed;
        self.payload.clear();
        let Some(handle) = self.handle.take() else {
            return;
        };
        if let Err(e) = self.driver.close_server(handle).await {
            warn!("Failed to close server: {}", e);
        }
        info!("Server closed");
    }
}
