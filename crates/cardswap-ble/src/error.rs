//! Error types for the BLE driver

use cardswap_core::{AdvertiseFailure, DriverError};
use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors raised by the platform driver
#[derive(Error, Debug)]
pub enum BleDriverError {
    #[error("BLE adapter not available")]
    AdapterNotAvailable,

    #[error("Peer not found: {address}")]
    PeerNotFound { address: String },

    #[error("Unknown connection or server handle")]
    UnknownHandle,

    #[error("Connection timeout")]
    ConnectionTimeout,

    #[error("Read request was not answered within {0:?}")]
    ResponseTimeout(std::time::Duration),

    #[error("Exchange coordinator is gone")]
    SinkClosed,

    #[error("Characteristic not found: {characteristic}")]
    CharacteristicNotFound { characteristic: String },

    #[error("Failed to get BLE events: {0}")]
    EventStreamFailed(String),

    #[error("Advertising rejected: {0}")]
    AdvertiseRejected(AdvertiseFailure),

    #[error("GATT server already registered")]
    ServerAlreadyRunning,

    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),

    #[error("btleplug: {0}")]
    Btleplug(#[from] btleplug::Error),

    #[cfg(target_os = "linux")]
    #[error("BlueZ: {0}")]
    Bluez(#[from] bluer::Error),
}

impl From<BleDriverError> for DriverError {
    fn from(err: BleDriverError) -> Self {
        match err {
            BleDriverError::AdvertiseRejected(failure) => DriverError::Advertise(failure),
            BleDriverError::Unsupported("advertising") => {
                DriverError::Advertise(AdvertiseFailure::FeatureUnsupported)
            }
            BleDriverError::ServerAlreadyRunning => DriverError::AlreadyRunning,
            BleDriverError::UnknownHandle => DriverError::UnknownHandle,
            BleDriverError::Btleplug(btleplug::Error::PermissionDenied) => {
                DriverError::PermissionDenied
            }
            #[cfg(target_os = "linux")]
            BleDriverError::Bluez(ref e) => match e.kind {
                bluer::ErrorKind::NotAuthorized | bluer::ErrorKind::NotPermitted => {
                    DriverError::PermissionDenied
                }
                bluer::ErrorKind::NotReady => DriverError::RadioDisabled,
                _ => DriverError::Platform(err.to_string()),
            },
            other => DriverError::Platform(other.to_string()),
        }
    }
}

/// Translate a BlueZ advertisement registration error into a failure code
#[cfg(target_os = "linux")]
pub(crate) fn advertise_failure(err: &bluer::Error) -> AdvertiseFailure {
    match err.kind {
        bluer::ErrorKind::AlreadyExists => AdvertiseFailure::AlreadyStarted,
        bluer::ErrorKind::InvalidLength => AdvertiseFailure::DataTooLarge,
        // BlueZ reports an exhausted advertising slot pool as NotPermitted
        bluer::ErrorKind::NotPermitted => AdvertiseFailure::TooManyAdvertisers,
        bluer::ErrorKind::NotSupported => AdvertiseFailure::FeatureUnsupported,
        bluer::ErrorKind::Failed => AdvertiseFailure::InternalError,
        _ => AdvertiseFailure::Unknown(err.to_string()),
    }
}
