//! Error types for card exchange
//!
//! Every failure is scoped to a single exchange session. [`FailureReason`]
//! carries the taxonomy, [`ExchangeError`] pins it to the role that raised
//! it, and [`DriverError`] is the narrower vocabulary a platform driver
//! reports back to the roles.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::EndpointId;
use crate::record::DecodeError;

// ----------------------------------------------------------------------------
// Roles
// ----------------------------------------------------------------------------

/// The component that raised an error or produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Advertiser,
    Scanner,
    Server,
    Client,
    Coordinator,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Advertiser => "advertiser",
            Role::Scanner => "scanner",
            Role::Server => "server",
            Role::Client => "client",
            Role::Coordinator => "coordinator",
        };
        f.write_str(name)
    }
}

// ----------------------------------------------------------------------------
// Platform Failure Codes
// ----------------------------------------------------------------------------

/// Reasons the platform refuses to start an advertisement
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdvertiseFailure {
    #[error("advertisement already started")]
    AlreadyStarted,
    #[error("advertising data too large")]
    DataTooLarge,
    #[error("too many concurrent advertisers")]
    TooManyAdvertisers,
    #[error("advertising not supported on this adapter")]
    FeatureUnsupported,
    #[error("internal advertiser error")]
    InternalError,
    #[error("unknown advertiser error: {0}")]
    Unknown(String),
}

// ----------------------------------------------------------------------------
// Failure Taxonomy
// ----------------------------------------------------------------------------

/// Broad handling class of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Ends the session, retrying will not help until the platform state changes
    Fatal,
    /// The caller can fix the cause (e.g. enable the radio) and start again
    Recoverable,
    /// A call arrived in the wrong order, the running session is untouched
    Ordering,
    /// A single role failed
    RoleLocal,
    /// The payload could not be trusted
    DataIntegrity,
}

/// What went wrong during an exchange
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    #[error("bluetooth permission denied")]
    PermissionDenied,

    #[error("bluetooth radio is disabled")]
    RadioDisabled,

    #[error("already running")]
    AlreadyRunning,

    #[error("advertising failed: {0}")]
    Advertise(AdvertiseFailure),

    #[error("scan failed: {0}")]
    Scan(String),

    #[error("server failed: {0}")]
    Server(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("endpoint {0} not found on peer")]
    EndpointNotFound(EndpointId),

    #[error("read failed: {0}")]
    Read(String),

    #[error("payload corrupt: {0}")]
    PayloadCorrupt(DecodeError),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("exchange coordinator is not running")]
    Shutdown,
}

impl FailureReason {
    /// Classify the failure for the caller's retry decision
    pub fn class(&self) -> ErrorClass {
        match self {
            FailureReason::PermissionDenied | FailureReason::Shutdown => ErrorClass::Fatal,
            FailureReason::RadioDisabled => ErrorClass::Recoverable,
            FailureReason::AlreadyRunning => ErrorClass::Ordering,
            FailureReason::PayloadCorrupt(_) => ErrorClass::DataIntegrity,
            FailureReason::Advertise(_)
            | FailureReason::Scan(_)
            | FailureReason::Server(_)
            | FailureReason::Connect(_)
            | FailureReason::EndpointNotFound(_)
            | FailureReason::Read(_)
            | FailureReason::Timeout(_) => ErrorClass::RoleLocal,
        }
    }
}

/// A failure attributed to the role that raised it
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{role}: {reason}")]
pub struct ExchangeError {
    pub role: Role,
    pub reason: FailureReason,
}

impl ExchangeError {
    pub fn new(role: Role, reason: FailureReason) -> Self {
        Self { role, reason }
    }

    pub fn already_running(role: Role) -> Self {
        Self::new(role, FailureReason::AlreadyRunning)
    }

    pub fn class(&self) -> ErrorClass {
        self.reason.class()
    }

    /// Whether the coordinator should leave the running session alone
    pub fn preserves_session(&self) -> bool {
        self.class() == ErrorClass::Ordering
    }
}

// ----------------------------------------------------------------------------
// Driver Errors
// ----------------------------------------------------------------------------

/// Errors a [`crate::driver::BleDriver`] may return from an operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("permission denied")]
    PermissionDenied,

    #[error("radio disabled")]
    RadioDisabled,

    #[error("operation already running")]
    AlreadyRunning,

    #[error("advertising rejected: {0}")]
    Advertise(AdvertiseFailure),

    #[error("unknown handle")]
    UnknownHandle,

    #[error("{0}")]
    Platform(String),
}

impl DriverError {
    /// Attribute a driver error to `role`, translating generic platform
    /// failures into the role's own failure kind
    pub fn into_exchange_error(self, role: Role) -> ExchangeError {
        let reason = match self {
            DriverError::PermissionDenied => FailureReason::PermissionDenied,
            DriverError::RadioDisabled => FailureReason::RadioDisabled,
            DriverError::AlreadyRunning => FailureReason::AlreadyRunning,
            DriverError::Advertise(failure) => FailureReason::Advertise(failure),
            other => {
                let message = other.to_string();
                match role {
                    Role::Advertiser => FailureReason::Advertise(AdvertiseFailure::Unknown(message)),
                    Role::Scanner => FailureReason::Scan(message),
                    Role::Server | Role::Coordinator => FailureReason::Server(message),
                    Role::Client => FailureReason::Connect(message),
                }
            }
        };
        ExchangeError::new(role, reason)
    }
}

// ----------------------------------------------------------------------------
// Configuration Errors
// ----------------------------------------------------------------------------

/// Rejected configuration values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {field} {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(FailureReason::PermissionDenied.class(), ErrorClass::Fatal);
        assert_eq!(FailureReason::RadioDisabled.class(), ErrorClass::Recoverable);
        assert_eq!(FailureReason::AlreadyRunning.class(), ErrorClass::Ordering);
        assert_eq!(
            FailureReason::PayloadCorrupt(DecodeError::Empty).class(),
            ErrorClass::DataIntegrity
        );
        assert_eq!(
            FailureReason::Read("gatt 0x85".into()).class(),
            ErrorClass::RoleLocal
        );
    }

    #[test]
    fn test_driver_error_attribution() {
        let err = DriverError::Platform("adapter gone".into()).into_exchange_error(Role::Client);
        assert_eq!(err.role, Role::Client);
        assert_eq!(err.reason, FailureReason::Connect("adapter gone".into()));

        let err = DriverError::RadioDisabled.into_exchange_error(Role::Scanner);
        assert_eq!(err.reason, FailureReason::RadioDisabled);
    }

    #[test]
    fn test_display_includes_role() {
        let err = ExchangeError::already_running(Role::Advertiser);
        assert_eq!(err.to_string(), "advertiser: already running");
        assert!(err.preserves_session());
    }
}
