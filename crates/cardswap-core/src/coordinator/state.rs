//! Session state and its observable projection

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::ExchangeMode;
use crate::driver::{Epoch, PeerHandle, PeerSummary};
use crate::record::IdentityRecord;
use crate::roles::{AdvertiserState, ClientState, RoleStates, ScannerState, ServerState};

// ----------------------------------------------------------------------------
// Phases
// ----------------------------------------------------------------------------

/// Which side of the exchange is transferring a card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangeSide {
    /// Our card was read and the server is lingering before close
    Giver,
    /// We are reading the peer's card
    Taker,
}

/// Coordinator phase as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExchangePhase {
    #[default]
    Idle,
    ServingOnly,
    ScanningOnly,
    ServingAndScanning,
    Connecting,
    Exchanging(ExchangeSide),
    TearingDown,
}

impl ExchangePhase {
    /// Derive the phase of a live session from its role states
    pub fn from_roles(roles: &RoleStates, lingering: bool) -> Self {
        match roles.client {
            ClientState::Connecting | ClientState::ServiceDiscovery => {
                return ExchangePhase::Connecting
            }
            ClientState::Reading => return ExchangePhase::Exchanging(ExchangeSide::Taker),
            ClientState::Disconnected => {}
        }
        if lingering {
            return ExchangePhase::Exchanging(ExchangeSide::Giver);
        }

        let serving =
            roles.server == ServerState::Open || roles.advertiser != AdvertiserState::Idle;
        let scanning = roles.scanner == ScannerState::Scanning;
        match (serving, scanning) {
            (true, true) => ExchangePhase::ServingAndScanning,
            (true, false) => ExchangePhase::ServingOnly,
            (false, true) => ExchangePhase::ScanningOnly,
            (false, false) => ExchangePhase::Idle,
        }
    }
}

// ----------------------------------------------------------------------------
// Session
// ----------------------------------------------------------------------------

/// Mutable state of the one running exchange
#[derive(Debug, Clone)]
pub struct ExchangeSession {
    pub epoch: Epoch,
    pub record: IdentityRecord,
    pub mode: ExchangeMode,
    /// Peer handed to the client, cleared when the link is released
    pub peer: Option<PeerHandle>,
    /// The peer's card arrived
    pub received: bool,
    /// Our card was read at least once
    pub served: bool,
    pub started_at: Instant,
}

impl ExchangeSession {
    pub fn new(epoch: Epoch, record: IdentityRecord, mode: ExchangeMode) -> Self {
        Self {
            epoch,
            record,
            mode,
            peer: None,
            received: false,
            served: false,
            started_at: Instant::now(),
        }
    }
}

// ----------------------------------------------------------------------------
// Status
// ----------------------------------------------------------------------------

/// Read-only projection of the coordinator published to callers
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExchangeStatus {
    pub phase: ExchangePhase,
    pub is_active: bool,
    /// Survives the end of the session that received it
    pub last_received_record: Option<IdentityRecord>,
    pub peer: Option<PeerSummary>,
    pub epoch: Epoch,
    pub roles: RoleStates,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_from_roles() {
        let mut roles = RoleStates::default();
        assert_eq!(ExchangePhase::from_roles(&roles, false), ExchangePhase::Idle);

        roles.server = ServerState::Open;
        roles.advertiser = AdvertiserState::Starting;
        roles.scanner = ScannerState::Scanning;
        assert_eq!(
            ExchangePhase::from_roles(&roles, false),
            ExchangePhase::ServingAndScanning
        );

        roles.scanner = ScannerState::Idle;
        roles.client = ClientState::ServiceDiscovery;
        assert_eq!(ExchangePhase::from_roles(&roles, false), ExchangePhase::Connecting);

        roles.client = ClientState::Reading;
        assert_eq!(
            ExchangePhase::from_roles(&roles, true),
            ExchangePhase::Exchanging(ExchangeSide::Taker)
        );
    }

    #[test]
    fn test_lingering_server_is_giving() {
        let roles = RoleStates {
            server: ServerState::Open,
            ..RoleStates::default()
        };
        assert_eq!(
            ExchangePhase::from_roles(&roles, true),
            ExchangePhase::Exchanging(ExchangeSide::Giver)
        );
        assert_eq!(ExchangePhase::from_roles(&roles, false), ExchangePhase::ServingOnly);
    }
}
