//! Scriptable in-memory BLE driver
//!
//! [`SimulatedDriver`] answers every [`BleDriver`] call synchronously and
//! pushes the matching completion into the sink straight away, so a
//! coordinator backed by it runs whole exchanges without a radio. The remote
//! side is described with builder methods; counters record every call made
//! against the driver.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use smallvec::SmallVec;
use tracing::debug;

use crate::driver::{
    BleDriver, ConnectionHandle, DriverEvent, EventSink, PeerHandle, RequestId, ServerHandle,
};
use crate::errors::{AdvertiseFailure, DriverError, Role};
use crate::protocol::{AdvertiseSettings, EndpointId, ScanSettings, ServiceMarker};
use crate::record::IdentityRecord;

/// Counters of driver calls
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimStats {
    pub advertise_calls: u32,
    pub stop_advertising_calls: u32,
    pub scan_calls: u32,
    pub stop_scan_calls: u32,
    pub servers_opened: u32,
    pub servers_closed: u32,
    pub connects: u32,
    pub disconnects: u32,
    pub reads: u32,
    /// Payloads sent in answer to read requests
    pub responses: Vec<Vec<u8>>,
}

#[derive(Debug)]
struct SimState {
    radio_enabled: bool,
    peers: Vec<PeerHandle>,
    remote_endpoints: SmallVec<[EndpointId; 4]>,
    remote_payload: Vec<u8>,
    read_error: Option<String>,
    connect_error: Option<String>,
    advertise_failure: Option<AdvertiseFailure>,
    hold_connect: bool,
    advertising: bool,
    scanning: bool,
    next_handle: u64,
    server: Option<(ServerHandle, EventSink)>,
    connections: HashMap<ConnectionHandle, EventSink>,
    last_sinks: HashMap<Role, EventSink>,
    stats: SimStats,
}

impl Default for SimState {
    fn default() -> Self {
        let mut remote_endpoints = SmallVec::new();
        remote_endpoints.push(EndpointId::default());
        Self {
            radio_enabled: true,
            peers: Vec::new(),
            remote_endpoints,
            remote_payload: Vec::new(),
            read_error: None,
            connect_error: None,
            advertise_failure: None,
            hold_connect: false,
            advertising: false,
            scanning: false,
            next_handle: 1,
            server: None,
            connections: HashMap::new(),
            last_sinks: HashMap::new(),
            stats: SimStats::default(),
        }
    }
}

impl SimState {
    fn next_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn remember(&mut self, sink: &EventSink) {
        self.last_sinks.insert(sink.role(), sink.clone());
    }
}

/// In-memory [`BleDriver`] with a scripted remote peer
#[derive(Debug, Clone, Default)]
pub struct SimulatedDriver {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ------------------------------------------------------------------------
    // Scripting
    // ------------------------------------------------------------------------

    /// Report `peer` from every scan
    pub fn with_peer(self, peer: PeerHandle) -> Self {
        self.lock().peers.push(peer);
        self
    }

    /// Serve `record` from the remote endpoint
    pub fn with_remote_record(self, record: &IdentityRecord) -> Self {
        let payload = record.encode().unwrap_or_default();
        self.with_remote_payload(payload)
    }

    /// Serve raw bytes from the remote endpoint
    pub fn with_remote_payload(self, payload: impl Into<Vec<u8>>) -> Self {
        self.lock().remote_payload = payload.into();
        self
    }

    /// Endpoints listed by service discovery on the remote peer
    pub fn with_remote_endpoints(self, endpoints: &[EndpointId]) -> Self {
        self.lock().remote_endpoints = endpoints.iter().copied().collect();
        self
    }

    pub fn with_radio_disabled(self) -> Self {
        self.lock().radio_enabled = false;
        self
    }

    /// Connects are accepted but never confirmed until [`Self::complete_connect`]
    pub fn with_held_connect(self) -> Self {
        self.lock().hold_connect = true;
        self
    }

    pub fn with_read_error(self, reason: impl Into<String>) -> Self {
        self.lock().read_error = Some(reason.into());
        self
    }

    pub fn with_connect_error(self, reason: impl Into<String>) -> Self {
        self.lock().connect_error = Some(reason.into());
        self
    }

    /// Reject advertisements asynchronously with `failure`
    pub fn with_advertise_failure(self, failure: AdvertiseFailure) -> Self {
        self.lock().advertise_failure = Some(failure);
        self
    }

    // ------------------------------------------------------------------------
    // Remote Actions
    // ------------------------------------------------------------------------

    /// A remote central reads `endpoint` from our server
    ///
    /// Returns false when no server is open.
    pub fn simulate_remote_read(&self, endpoint: EndpointId) -> bool {
        self.simulate_remote_read_at(endpoint, 0)
    }

    /// A continuation read of `endpoint` starting at `offset`
    pub fn simulate_remote_read_at(&self, endpoint: EndpointId, offset: usize) -> bool {
        let mut state = self.lock();
        let request = RequestId(state.next_handle());
        match &state.server {
            Some((_, sink)) => sink.emit(DriverEvent::ReadRequest {
                request,
                endpoint,
                offset,
                peer: Some("sim-central".to_string()),
            }),
            None => false,
        }
    }

    /// Confirm every held connection
    pub fn complete_connect(&self) {
        let state = self.lock();
        for sink in state.connections.values() {
            sink.emit(DriverEvent::Connected);
        }
    }

    /// The remote peer drops every open link
    pub fn simulate_link_loss(&self) {
        let state = self.lock();
        for sink in state.connections.values() {
            sink.emit(DriverEvent::Disconnected);
        }
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    pub fn stats(&self) -> SimStats {
        self.lock().stats.clone()
    }

    /// The most recent sink handed to `role`, kept after the operation ends
    pub fn last_sink(&self, role: Role) -> Option<EventSink> {
        self.lock().last_sinks.get(&role).cloned()
    }

    pub fn open_connections(&self) -> usize {
        self.lock().connections.len()
    }
}

#[async_trait]
impl BleDriver for SimulatedDriver {
    async fn radio_enabled(&self) -> Result<bool, DriverError> {
        Ok(self.lock().radio_enabled)
    }

    async fn advertise(
        &self,
        marker: ServiceMarker,
        _settings: &AdvertiseSettings,
        sink: EventSink,
    ) -> Result<(), DriverError> {
        let mut state = self.lock();
        if !state.radio_enabled {
            return Err(DriverError::RadioDisabled);
        }
        if state.advertising {
            return Err(DriverError::Advertise(AdvertiseFailure::AlreadyStarted));
        }
        state.stats.advertise_calls += 1;
        state.remember(&sink);
        debug!("sim: advertise {}", marker);

        match state.advertise_failure.clone() {
            Some(failure) => {
                sink.emit(DriverEvent::AdvertiseFailed(failure));
            }
            None => {
                state.advertising = true;
                sink.emit(DriverEvent::AdvertiseStarted);
            }
        }
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.advertising = false;
        state.stats.stop_advertising_calls += 1;
        Ok(())
    }

    async fn scan(
        &self,
        marker: ServiceMarker,
        _settings: &ScanSettings,
        sink: EventSink,
    ) -> Result<(), DriverError> {
        let mut state = self.lock();
        if !state.radio_enabled {
            return Err(DriverError::RadioDisabled);
        }
        if state.scanning {
            return Err(DriverError::AlreadyRunning);
        }
        state.scanning = true;
        state.stats.scan_calls += 1;
        state.remember(&sink);
        debug!("sim: scan {}", marker);

        for peer in &state.peers {
            sink.emit(DriverEvent::PeerFound(peer.clone()));
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.scanning = false;
        state.stats.stop_scan_calls += 1;
        Ok(())
    }

    async fn open_server(
        &self,
        _marker: ServiceMarker,
        _endpoint: EndpointId,
        sink: EventSink,
    ) -> Result<ServerHandle, DriverError> {
        let mut state = self.lock();
        if !state.radio_enabled {
            return Err(DriverError::RadioDisabled);
        }
        if state.server.is_some() {
            return Err(DriverError::AlreadyRunning);
        }
        let handle = ServerHandle(state.next_handle());
        state.remember(&sink);
        state.server = Some((handle, sink));
        state.stats.servers_opened += 1;
        Ok(handle)
    }

    async fn respond(
        &self,
        server: ServerHandle,
        _request: RequestId,
        payload: Vec<u8>,
    ) -> Result<(), DriverError> {
        let mut state = self.lock();
        if !matches!(&state.server, Some((handle, _)) if *handle == server) {
            return Err(DriverError::UnknownHandle);
        }
        state.stats.responses.push(payload);
        Ok(())
    }

    async fn close_server(&self, server: ServerHandle) -> Result<(), DriverError> {
        let mut state = self.lock();
        if !matches!(&state.server, Some((handle, _)) if *handle == server) {
            return Err(DriverError::UnknownHandle);
        }
        state.server = None;
        state.stats.servers_closed += 1;
        Ok(())
    }

    async fn connect(
        &self,
        peer: &PeerHandle,
        sink: EventSink,
    ) -> Result<ConnectionHandle, DriverError> {
        let mut state = self.lock();
        let handle = ConnectionHandle(state.next_handle());
        state.stats.connects += 1;
        state.remember(&sink);
        debug!("sim: connect {}", peer);

        if let Some(reason) = state.connect_error.clone() {
            sink.emit(DriverEvent::ConnectFailed(reason));
        } else if !state.hold_connect {
            sink.emit(DriverEvent::Connected);
        }
        state.connections.insert(handle, sink);
        Ok(handle)
    }

    async fn discover_services(
        &self,
        connection: ConnectionHandle,
        _marker: ServiceMarker,
    ) -> Result<(), DriverError> {
        let state = self.lock();
        let sink = state
            .connections
            .get(&connection)
            .ok_or(DriverError::UnknownHandle)?;
        sink.emit(DriverEvent::ServicesDiscovered {
            endpoints: state.remote_endpoints.clone(),
        });
        Ok(())
    }

    async fn read_endpoint(
        &self,
        connection: ConnectionHandle,
        _marker: ServiceMarker,
        endpoint: EndpointId,
    ) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.stats.reads += 1;
        let sink = state
            .connections
            .get(&connection)
            .ok_or(DriverError::UnknownHandle)?;
        let result = match &state.read_error {
            Some(reason) => Err(reason.clone()),
            None => Ok(state.remote_payload.clone()),
        };
        sink.emit(DriverEvent::ReadCompleted { endpoint, result });
        Ok(())
    }

    async fn disconnect(&self, connection: ConnectionHandle) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.stats.disconnects += 1;
        state
            .connections
            .remove(&connection)
            .map(|_| ())
            .ok_or(DriverError::UnknownHandle)
    }
}
