//! The four exchange roles
//!
//! Each role is a long-lived state machine over one slice of the driver.
//! Roles never call each other; they turn driver completions into state
//! transitions and hand results back to the coordinator that owns them.

pub mod advertiser;
pub mod client;
pub mod scanner;
pub mod server;

pub use advertiser::{Advertiser, AdvertiserState};
pub use client::{ChannelClient, ClientState};
pub use scanner::{Scanner, ScannerState};
pub use server::{ChannelServer, ServerState};

use serde::{Deserialize, Serialize};

/// Snapshot of every role's state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoleStates {
    pub advertiser: AdvertiserState,
    pub scanner: ScannerState,
    pub server: ServerState,
    pub client: ClientState,
}

impl RoleStates {
    /// True when no role holds a radio resource
    pub fn all_idle(&self) -> bool {
        self.advertiser == AdvertiserState::Idle
            && self.scanner == ScannerState::Idle
            && self.server == ServerState::Closed
            && self.client == ClientState::Disconnected
    }
}
