//! Injected BLE driver capability
//!
//! The core never touches a radio directly. Every platform operation goes
//! through [`BleDriver`], and every asynchronous completion comes back as a
//! [`DriverEvent`] pushed into the [`EventSink`] handed to the operation.
//! Sinks are stamped with the session epoch and the role that started the
//! operation, so completions from a torn down session can be recognised and
//! dropped by the coordinator.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tokio::sync::mpsc;

use crate::errors::{AdvertiseFailure, DriverError, Role};
use crate::protocol::{AdvertiseSettings, EndpointId, ScanSettings, ServiceMarker};

// ----------------------------------------------------------------------------
// Session Epoch
// ----------------------------------------------------------------------------

/// Monotonic session token, advanced on every start and stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Epoch(pub u64);

impl Epoch {
    pub fn next(self) -> Self {
        Epoch(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Handles
// ----------------------------------------------------------------------------

/// Remote device found by a scan
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerHandle {
    /// Platform-assigned address, unique per peer for the adapter
    pub address: String,
    /// Advertised display name, if any
    pub name: Option<String>,
}

impl PeerHandle {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn summary(&self) -> PeerSummary {
        PeerSummary {
            address: self.address.clone(),
            name: self.name.clone(),
        }
    }
}

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.address),
            None => f.write_str(&self.address),
        }
    }
}

/// Caller-facing description of a peer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerSummary {
    pub address: String,
    pub name: Option<String>,
}

/// Driver-issued handle for an open connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(pub u64);

/// Driver-issued handle for a registered GATT service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServerHandle(pub u64);

/// Identifies a pending read request on the server side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

// ----------------------------------------------------------------------------
// Driver Events
// ----------------------------------------------------------------------------

/// Asynchronous completions delivered by a driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    /// The platform confirmed the advertisement is on air
    AdvertiseStarted,
    /// The platform rejected the advertisement after accepting the request
    AdvertiseFailed(AdvertiseFailure),
    /// A device advertising the marker was seen
    PeerFound(PeerHandle),
    /// The running scan was aborted by the platform
    ScanFailed(String),
    /// A remote central asked to read an endpoint of our server
    ///
    /// Values longer than the link MTU arrive as a first read at offset 0
    /// followed by continuation reads at increasing offsets.
    ReadRequest {
        request: RequestId,
        endpoint: EndpointId,
        offset: usize,
        peer: Option<String>,
    },
    /// The link to the peer is up
    Connected,
    /// The link could not be established
    ConnectFailed(String),
    /// Service discovery finished
    ServicesDiscovered {
        endpoints: SmallVec<[EndpointId; 4]>,
    },
    /// A read issued with `read_endpoint` completed
    ReadCompleted {
        endpoint: EndpointId,
        result: Result<Vec<u8>, String>,
    },
    /// The link went down
    Disconnected,
}

/// A driver event tagged with the session and role it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleEvent {
    pub epoch: Epoch,
    pub role: Role,
    pub event: DriverEvent,
}

/// Where a driver reports completions for one operation
#[derive(Debug, Clone)]
pub struct EventSink {
    epoch: Epoch,
    role: Role,
    tx: mpsc::UnboundedSender<RoleEvent>,
}

impl EventSink {
    pub fn new(epoch: Epoch, role: Role, tx: mpsc::UnboundedSender<RoleEvent>) -> Self {
        Self { epoch, role, tx }
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Deliver an event, returns false once the coordinator is gone
    pub fn emit(&self, event: DriverEvent) -> bool {
        self.tx
            .send(RoleEvent {
                epoch: self.epoch,
                role: self.role,
                event,
            })
            .is_ok()
    }

    /// Whether the receiving coordinator has shut down
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ----------------------------------------------------------------------------
// Driver Trait
// ----------------------------------------------------------------------------

/// Platform BLE operations consumed by the roles
///
/// Methods return once the platform accepted the request. Completion is
/// reported through the sink passed to the operation that started it; for
/// connections that is the sink passed to [`BleDriver::connect`], for the
/// server the one passed to [`BleDriver::open_server`].
#[async_trait]
pub trait BleDriver: Send + Sync {
    /// Whether the radio is powered and usable
    async fn radio_enabled(&self) -> Result<bool, DriverError>;

    /// Start broadcasting `marker`, confirmed by `AdvertiseStarted` or `AdvertiseFailed`
    async fn advertise(
        &self,
        marker: ServiceMarker,
        settings: &AdvertiseSettings,
        sink: EventSink,
    ) -> Result<(), DriverError>;

    async fn stop_advertising(&self) -> Result<(), DriverError>;

    /// Scan for devices advertising `marker`, matches arrive as `PeerFound`
    async fn scan(
        &self,
        marker: ServiceMarker,
        settings: &ScanSettings,
        sink: EventSink,
    ) -> Result<(), DriverError>;

    async fn stop_scan(&self) -> Result<(), DriverError>;

    /// Register a service under `marker` with one readable `endpoint`
    async fn open_server(
        &self,
        marker: ServiceMarker,
        endpoint: EndpointId,
        sink: EventSink,
    ) -> Result<ServerHandle, DriverError>;

    /// Answer a pending `ReadRequest` with a successful status and the full
    /// `payload`, the driver returns the part from the request offset on
    async fn respond(
        &self,
        server: ServerHandle,
        request: RequestId,
        payload: Vec<u8>,
    ) -> Result<(), DriverError>;

    async fn close_server(&self, server: ServerHandle) -> Result<(), DriverError>;

    /// Open a link to `peer`, confirmed by `Connected` or `ConnectFailed`
    async fn connect(
        &self,
        peer: &PeerHandle,
        sink: EventSink,
    ) -> Result<ConnectionHandle, DriverError>;

    /// Discover services, answered by `ServicesDiscovered` listing the
    /// endpoints of the marker service
    async fn discover_services(
        &self,
        connection: ConnectionHandle,
        marker: ServiceMarker,
    ) -> Result<(), DriverError>;

    /// Read `endpoint`, answered by `ReadCompleted`
    async fn read_endpoint(
        &self,
        connection: ConnectionHandle,
        marker: ServiceMarker,
        endpoint: EndpointId,
    ) -> Result<(), DriverError>;

    /// Release the connection, valid whatever state the link is in
    async fn disconnect(&self, connection: ConnectionHandle) -> Result<(), DriverError>;
}
