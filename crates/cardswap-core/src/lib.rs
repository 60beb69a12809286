//! Session coordination for peer-to-peer BLE identity card exchange
//!
//! Two devices each run an [`ExchangeCoordinator`]. Each side advertises a
//! service marker and serves its own card, scans for a peer doing the same,
//! connects, reads the peer's card and tears everything down again. The
//! radio itself sits behind the [`BleDriver`] trait so the session logic
//! runs unchanged against a platform stack or the in-memory
//! [`SimulatedDriver`].
//!
//! ## Architecture
//!
//! - [`record`] - The identity card and its JSON wire encoding
//! - [`protocol`] - Service and characteristic identifiers, radio settings
//! - [`errors`] - Failure taxonomy shared by roles and the coordinator
//! - [`config`] - Coordinator configuration
//! - [`driver`] - The injected driver capability and its event types
//! - [`roles`] - Advertiser, scanner, channel server and channel client
//! - [`coordinator`] - The session state machine and its handle
//! - [`sim`] - Scriptable driver for tests and demos
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cardswap_core::{ExchangeConfig, ExchangeCoordinator, ExchangeEvent, IdentityRecord};
//! use cardswap_core::sim::SimulatedDriver;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let driver = Arc::new(SimulatedDriver::new());
//! let (handle, _task) = ExchangeCoordinator::spawn(driver, ExchangeConfig::default())?;
//!
//! let mut events = handle.subscribe();
//! handle.start_exchange(IdentityRecord::new(1, "Ada", "Engineer")).await?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let ExchangeEvent::RecordReceived(card) = event {
//!         println!("got {card}");
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod driver;
pub mod errors;
pub mod protocol;
pub mod record;
pub mod roles;
pub mod sim;

pub use config::{ExchangeConfig, ExchangeMode};
pub use coordinator::{
    ExchangeCoordinator, ExchangeEvent, ExchangeHandle, ExchangeObserver, ExchangePhase,
    ExchangeSide, ExchangeStatus,
};
pub use driver::{
    BleDriver, ConnectionHandle, DriverEvent, Epoch, EventSink, PeerHandle, PeerSummary,
    RequestId, RoleEvent, ServerHandle,
};
pub use errors::{
    AdvertiseFailure, ConfigError, DriverError, ErrorClass, ExchangeError, FailureReason, Role,
};
pub use protocol::{
    AdvertiseSettings, EndpointId, MatchMode, RadioMode, ScanSettings, ServiceMarker,
    CARD_CHARACTERISTIC_UUID, CARD_SERVICE_UUID, MAX_READ_SIZE,
};
pub use record::{DecodeError, IdentityRecord};
pub use roles::RoleStates;
