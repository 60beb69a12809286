//! Scanner role
//!
//! Single-shot: the first matching peer stops the scan.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::driver::{BleDriver, EventSink, PeerHandle};
use crate::errors::{ExchangeError, FailureReason, Role};
use crate::protocol::{ScanSettings, ServiceMarker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScannerState {
    #[default]
    Idle,
    Scanning,
}

/// Looks for a peer advertising the service marker
pub struct Scanner {
    driver: Arc<dyn BleDriver>,
    state: ScannerState,
}

impl Scanner {
    pub fn new(driver: Arc<dyn BleDriver>) -> Self {
        Self {
            driver,
            state: ScannerState::Idle,
        }
    }

    pub fn state(&self) -> ScannerState {
        self.state
    }

    /// Start scanning for `marker`
    pub async fn start(
        &mut self,
        marker: ServiceMarker,
        settings: &ScanSettings,
        sink: EventSink,
    ) -> Result<(), ExchangeError> {
        if self.state == ScannerState::Scanning {
            return Err(ExchangeError::already_running(Role::Scanner));
        }

        let enabled = self
            .driver
            .radio_enabled()
            .await
            .map_err(|e| e.into_exchange_error(Role::Scanner))?;
        if !enabled {
            return Err(ExchangeError::new(Role::Scanner, FailureReason::RadioDisabled));
        }

        self.driver
            .scan(marker, settings, sink)
            .await
            .map_err(|e| e.into_exchange_error(Role::Scanner))?;
        self.state = ScannerState::Scanning;
        info!("Scanning for {}", marker);
        Ok(())
    }

    /// Handle a match
    ///
    /// Returns the peer for the first match only. The scan is stopped before
    /// returning, so later reports of the same or other peers yield `None`.
    pub async fn on_peer_found(&mut self, peer: PeerHandle) -> Option<PeerHandle> {
        if self.state != ScannerState::Scanning {
            debug!("Ignoring peer {} reported after scan ended", peer);
            return None;
        }
        self.stop().await;
        Some(peer)
    }

    /// The platform aborted the scan
    ///
    /// A failure reported after the scan was stopped is dropped.
    pub fn on_failed(&mut self, reason: String) -> Option<ExchangeError> {
        if self.state == ScannerState::Idle {
            debug!("Ignoring scan failure while idle: {}", reason);
            return None;
        }
        self.state = ScannerState::Idle;
        Some(ExchangeError::new(Role::Scanner, FailureReason::Scan(reason)))
    }

    /// Stop scanning, a no-op when idle
    pub async fn stop(&mut self) {
        if self.state == ScannerState::Idle {
            return;
        }
        self.state = ScannerState::Idle;
        if let Err(e) = self.driver.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }
        info!("Scan stopped");
    }
}
