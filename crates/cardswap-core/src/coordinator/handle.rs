//! Caller-facing handle to a running coordinator

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::messages::{ExchangeCommand, ExchangeEvent};
use super::state::ExchangeStatus;
use crate::config::ExchangeMode;
use crate::driver::{Epoch, PeerSummary};
use crate::errors::{ExchangeError, FailureReason, Role};
use crate::record::IdentityRecord;

// ----------------------------------------------------------------------------
// Observer
// ----------------------------------------------------------------------------

/// Callback-style view of the event stream
///
/// All methods default to no-ops, implement only what you need.
pub trait ExchangeObserver: Send + Sync + 'static {
    fn on_record_received(&self, _record: &IdentityRecord) {}
    fn on_peer_discovered(&self, _peer: &PeerSummary) {}
    fn on_record_served(&self, _peer: Option<&str>) {}
    fn on_error(&self, _error: &ExchangeError) {}
}

// ----------------------------------------------------------------------------
// Handle
// ----------------------------------------------------------------------------

/// Cloneable handle for driving an exchange
#[derive(Clone)]
pub struct ExchangeHandle {
    command_tx: mpsc::Sender<ExchangeCommand>,
    event_tx: broadcast::Sender<ExchangeEvent>,
    status_rx: watch::Receiver<ExchangeStatus>,
}

impl ExchangeHandle {
    pub(crate) fn new(
        command_tx: mpsc::Sender<ExchangeCommand>,
        event_tx: broadcast::Sender<ExchangeEvent>,
        status_rx: watch::Receiver<ExchangeStatus>,
    ) -> Self {
        Self {
            command_tx,
            event_tx,
            status_rx,
        }
    }

    /// Start an exchange in the configured mode
    pub async fn start_exchange(&self, record: IdentityRecord) -> Result<Epoch, ExchangeError> {
        self.start(record, None).await
    }

    /// Start an exchange in `mode`
    pub async fn start_exchange_with(
        &self,
        record: IdentityRecord,
        mode: ExchangeMode,
    ) -> Result<Epoch, ExchangeError> {
        self.start(record, Some(mode)).await
    }

    async fn start(
        &self,
        record: IdentityRecord,
        mode: Option<ExchangeMode>,
    ) -> Result<Epoch, ExchangeError> {
        debug!(?mode, "ExchangeHandle::start_exchange: called");
        let (reply, reply_rx) = oneshot::channel();
        self.send(ExchangeCommand::StartExchange { record, mode, reply })
            .await?;
        reply_rx.await.map_err(|_| shutdown())?
    }

    /// Stop the running exchange, a no-op when idle
    pub async fn stop_exchange(&self) -> Result<(), ExchangeError> {
        debug!("ExchangeHandle::stop_exchange: called");
        let (reply, reply_rx) = oneshot::channel();
        self.send(ExchangeCommand::StopExchange { reply }).await?;
        reply_rx.await.map_err(|_| shutdown())
    }

    /// Stop the exchange and end the coordinator task
    pub async fn shutdown(&self) -> Result<(), ExchangeError> {
        debug!("ExchangeHandle::shutdown: called");
        let (reply, reply_rx) = oneshot::channel();
        self.send(ExchangeCommand::Shutdown { reply }).await?;
        reply_rx.await.map_err(|_| shutdown())
    }

    /// Subscribe to events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ExchangeEvent> {
        self.event_tx.subscribe()
    }

    /// Current status snapshot
    pub fn status(&self) -> ExchangeStatus {
        self.status_rx.borrow().clone()
    }

    /// Receiver that tracks status changes
    pub fn watch_status(&self) -> watch::Receiver<ExchangeStatus> {
        self.status_rx.clone()
    }

    /// Wait for the first status satisfying `predicate`
    pub async fn wait_for_status<F>(&self, mut predicate: F) -> Result<ExchangeStatus, ExchangeError>
    where
        F: FnMut(&ExchangeStatus) -> bool,
    {
        let mut rx = self.status_rx.clone();
        let status = rx.wait_for(|status| predicate(status)).await.map_err(|_| shutdown())?;
        Ok(status.clone())
    }

    /// Wait until no session is active
    pub async fn wait_until_idle(&self) -> Result<ExchangeStatus, ExchangeError> {
        self.wait_for_status(|status| !status.is_active).await
    }

    /// Forward events to `observer` until the coordinator stops
    pub fn observe(&self, observer: Arc<dyn ExchangeObserver>) -> JoinHandle<()> {
        let mut events = self.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ExchangeEvent::RecordReceived(record)) => observer.on_record_received(&record),
                    Ok(ExchangeEvent::PeerDiscovered(peer)) => observer.on_peer_discovered(&peer),
                    Ok(ExchangeEvent::RecordServed { peer }) => {
                        observer.on_record_served(peer.as_deref())
                    }
                    Ok(ExchangeEvent::Error(error)) => observer.on_error(&error),
                    Ok(ExchangeEvent::Started { .. } | ExchangeEvent::Finished { .. }) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Exchange observer lagged, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn send(&self, command: ExchangeCommand) -> Result<(), ExchangeError> {
        self.command_tx.send(command).await.map_err(|_| shutdown())
    }
}

fn shutdown() -> ExchangeError {
    ExchangeError::new(Role::Coordinator, FailureReason::Shutdown)
}
