//! Exchange coordinator task
//!
//! Owns the four roles and serialises every caller command, driver
//! completion and timer expiry through one select loop, so role state is
//! only ever touched from this task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::messages::{ExchangeCommand, ExchangeEvent, TimerEvent, TimerKind};
use super::state::{ExchangePhase, ExchangeSession, ExchangeStatus};
use crate::config::{ExchangeConfig, ExchangeMode};
use crate::driver::{BleDriver, DriverEvent, Epoch, EventSink, PeerHandle, RoleEvent};
use crate::errors::{ExchangeError, FailureReason, Role};
use crate::record::IdentityRecord;
use crate::roles::{
    Advertiser, ChannelClient, ChannelServer, ClientState, RoleStates, Scanner, ServerState,
};

// ----------------------------------------------------------------------------
// Coordinator
// ----------------------------------------------------------------------------

/// The session state machine driving the four roles
pub struct ExchangeCoordinator {
    config: ExchangeConfig,
    advertiser: Advertiser,
    scanner: Scanner,
    server: ChannelServer,
    client: ChannelClient,
    /// Current session token, stamped on every sink and timer
    epoch: Epoch,
    session: Option<ExchangeSession>,
    last_received: Option<IdentityRecord>,
    tearing_down: bool,
    timers: HashMap<TimerKind, JoinHandle<()>>,
    command_rx: mpsc::Receiver<ExchangeCommand>,
    role_tx: mpsc::UnboundedSender<RoleEvent>,
    role_rx: mpsc::UnboundedReceiver<RoleEvent>,
    timer_tx: mpsc::UnboundedSender<TimerEvent>,
    timer_rx: mpsc::UnboundedReceiver<TimerEvent>,
    event_tx: broadcast::Sender<ExchangeEvent>,
    status_tx: watch::Sender<ExchangeStatus>,
    running: bool,
}

impl ExchangeCoordinator {
    pub(crate) fn new(
        driver: Arc<dyn BleDriver>,
        config: ExchangeConfig,
        command_rx: mpsc::Receiver<ExchangeCommand>,
        event_tx: broadcast::Sender<ExchangeEvent>,
        status_tx: watch::Sender<ExchangeStatus>,
    ) -> Self {
        let (role_tx, role_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();

        Self {
            config,
            advertiser: Advertiser::new(driver.clone()),
            scanner: Scanner::new(driver.clone()),
            server: ChannelServer::new(driver.clone()),
            client: ChannelClient::new(driver),
            epoch: Epoch::default(),
            session: None,
            last_received: None,
            tearing_down: false,
            timers: HashMap::new(),
            command_rx,
            role_tx,
            role_rx,
            timer_tx,
            timer_rx,
            event_tx,
            status_tx,
            running: true,
        }
    }

    /// Run until shut down or every handle is dropped
    pub async fn run(mut self) {
        info!("Exchange coordinator starting");

        while self.running {
            tokio::select! {
                command = self.command_rx.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            info!("Command channel closed, shutting down");
                            break;
                        }
                    }
                }

                Some(event) = self.role_rx.recv() => {
                    self.handle_role_event(event).await;
                }

                Some(timer) = self.timer_rx.recv() => {
                    self.handle_timer(timer).await;
                }
            }
            self.publish_status();
        }

        if self.session.is_some() {
            self.teardown().await;
            self.publish_status();
        }
        info!("Exchange coordinator stopped");
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    async fn handle_command(&mut self, command: ExchangeCommand) {
        match command {
            ExchangeCommand::StartExchange { record, mode, reply } => {
                let mode = mode.unwrap_or(self.config.mode);
                let result = self.start_exchange(record, mode).await;
                self.publish_status();
                let _ = reply.send(result);
            }
            ExchangeCommand::StopExchange { reply } => {
                info!(epoch = %self.epoch, "Exchange stop requested");
                self.teardown().await;
                self.publish_status();
                let _ = reply.send(());
            }
            ExchangeCommand::Shutdown { reply } => {
                self.teardown().await;
                self.running = false;
                self.publish_status();
                let _ = reply.send(());
            }
        }
    }

    async fn start_exchange(
        &mut self,
        record: IdentityRecord,
        mode: ExchangeMode,
    ) -> Result<Epoch, ExchangeError> {
        if self.session.is_some() {
            let err = ExchangeError::already_running(Role::Coordinator);
            self.report(&err);
            return Err(err);
        }

        self.epoch = self.epoch.next();
        let epoch = self.epoch;
        self.session = Some(ExchangeSession::new(epoch, record.clone(), mode));
        info!(epoch = %epoch, ?mode, "Exchange starting");
        self.emit(ExchangeEvent::Started { epoch, mode });

        match self.start_roles(&record, mode).await {
            Ok(()) => Ok(epoch),
            Err(err) => {
                self.report(&err);
                self.teardown().await;
                Err(err)
            }
        }
    }

    /// Server before advertiser so the service exists when a peer connects
    async fn start_roles(
        &mut self,
        record: &IdentityRecord,
        mode: ExchangeMode,
    ) -> Result<(), ExchangeError> {
        let marker = self.config.service_marker;

        if mode.gives() {
            let sink = self.sink(Role::Server);
            self.server
                .open(
                    record,
                    marker,
                    self.config.endpoint,
                    self.config.max_payload_size,
                    sink,
                )
                .await?;
            if let Some(timeout) = self.config.server_timeout {
                self.arm_timer(TimerKind::ServerIdle, timeout);
            }

            let sink = self.sink(Role::Advertiser);
            self.advertiser
                .start(marker, &self.config.advertise, sink)
                .await?;
        }

        if mode.takes() {
            let sink = self.sink(Role::Scanner);
            self.scanner.start(marker, &self.config.scan, sink).await?;
            if let Some(timeout) = self.config.scan_timeout {
                self.arm_timer(TimerKind::ScanTimeout, timeout);
            }
        }

        Ok(())
    }

    // ------------------------------------------------------------------------
    // Driver Events
    // ------------------------------------------------------------------------

    async fn handle_role_event(&mut self, envelope: RoleEvent) {
        if envelope.epoch != self.epoch || self.session.is_none() {
            debug!(
                epoch = %envelope.epoch,
                current = %self.epoch,
                role = %envelope.role,
                "Dropping stale {:?}",
                envelope.event
            );
            return;
        }
        debug!(epoch = %self.epoch, role = %envelope.role, "Driver event {:?}", envelope.event);

        let result = match envelope.event {
            DriverEvent::AdvertiseStarted => {
                self.advertiser.on_started();
                Ok(())
            }
            DriverEvent::AdvertiseFailed(failure) => match self.advertiser.on_failed(failure) {
                Some(err) => Err(err),
                None => Ok(()),
            },
            DriverEvent::PeerFound(peer) => match self.scanner.on_peer_found(peer).await {
                Some(peer) => self.on_peer_found(peer).await,
                None => Ok(()),
            },
            DriverEvent::ScanFailed(reason) => match self.scanner.on_failed(reason) {
                Some(err) => Err(err),
                None => Ok(()),
            },
            DriverEvent::ReadRequest {
                request,
                endpoint,
                offset,
                peer,
            } => match self.server.on_read_request(request, endpoint, offset).await {
                Ok(true) => {
                    self.on_record_served(peer);
                    Ok(())
                }
                Ok(false) => Ok(()),
                Err(err) => Err(err),
            },
            DriverEvent::Connected => self.client.on_connected().await,
            DriverEvent::ConnectFailed(reason) => match self.client.on_connect_failed(reason).await {
                Some(err) => Err(err),
                None => Ok(()),
            },
            DriverEvent::ServicesDiscovered { endpoints } => {
                self.client.on_services_discovered(&endpoints).await
            }
            DriverEvent::ReadCompleted { endpoint, result } => {
                match self.client.on_read_completed(endpoint, result).await {
                    Ok(Some(record)) => {
                        self.on_record_received(record).await;
                        Ok(())
                    }
                    Ok(None) => Ok(()),
                    Err(err) => Err(err),
                }
            }
            DriverEvent::Disconnected => match self.client.on_disconnected().await {
                Some(err) => Err(err),
                None => Ok(()),
            },
        };

        if let Err(err) = result {
            self.fail(err).await;
        }
    }

    async fn on_peer_found(&mut self, peer: PeerHandle) -> Result<(), ExchangeError> {
        self.cancel_timer(TimerKind::ScanTimeout);
        info!(epoch = %self.epoch, "Peer discovered: {}", peer);
        self.emit(ExchangeEvent::PeerDiscovered(peer.summary()));
        if let Some(session) = self.session.as_mut() {
            session.peer = Some(peer.clone());
        }

        // A stale client must release its link before the next connect
        self.client.disconnect().await;
        let sink = self.sink(Role::Client);
        self.client
            .connect(peer, self.config.service_marker, self.config.endpoint, sink)
            .await?;
        self.arm_timer(TimerKind::ConnectTimeout, self.config.connection_timeout);
        Ok(())
    }

    async fn on_record_received(&mut self, record: IdentityRecord) {
        self.cancel_timer(TimerKind::ConnectTimeout);
        info!(epoch = %self.epoch, "Record received: {}", record);
        self.last_received = Some(record.clone());
        if let Some(session) = self.session.as_mut() {
            session.received = true;
            session.peer = None;
        }
        self.emit(ExchangeEvent::RecordReceived(record));

        // Take side is over either way
        self.scanner.stop().await;
        self.cancel_timer(TimerKind::ScanTimeout);

        let server_open = self.server.state() == ServerState::Open;
        if server_open && self.config.keep_serving_after_receive {
            info!(epoch = %self.epoch, "Continuing to serve after receive");
            return;
        }
        if server_open && self.timers.contains_key(&TimerKind::ServerCloseDue) {
            debug!(epoch = %self.epoch, "Letting served read settle before close");
            self.advertiser.stop().await;
            return;
        }
        self.teardown().await;
    }

    fn on_record_served(&mut self, peer: Option<String>) {
        self.cancel_timer(TimerKind::ServerIdle);
        info!(epoch = %self.epoch, "Record served to {}", peer.as_deref().unwrap_or("unknown peer"));
        if let Some(session) = self.session.as_mut() {
            session.served = true;
        }
        self.emit(ExchangeEvent::RecordServed { peer });

        if !self.timers.contains_key(&TimerKind::ServerCloseDue) {
            self.arm_timer(TimerKind::ServerCloseDue, self.config.server_close_delay);
        }
    }

    // ------------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------------

    fn arm_timer(&mut self, kind: TimerKind, after: Duration) {
        let tx = self.timer_tx.clone();
        let epoch = self.epoch;
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(TimerEvent { epoch, kind });
        });
        if let Some(previous) = self.timers.insert(kind, task) {
            previous.abort();
        }
    }

    fn cancel_timer(&mut self, kind: TimerKind) {
        if let Some(task) = self.timers.remove(&kind) {
            task.abort();
        }
    }

    async fn handle_timer(&mut self, timer: TimerEvent) {
        if timer.epoch != self.epoch || self.timers.remove(&timer.kind).is_none() {
            debug!(epoch = %timer.epoch, "Dropping stale {:?} timer", timer.kind);
            return;
        }

        match timer.kind {
            TimerKind::ServerCloseDue => {
                info!(epoch = %self.epoch, "Close delay elapsed, closing server");
                self.cancel_timer(TimerKind::ServerIdle);
                self.server.close().await;
                self.advertiser.stop().await;

                // Once served, only a read already under way may still finish
                if self.client.state() != ClientState::Disconnected {
                    debug!(epoch = %self.epoch, "Waiting for in-flight read before finishing");
                    self.scanner.stop().await;
                    self.cancel_timer(TimerKind::ScanTimeout);
                    return;
                }
                self.teardown().await;
            }
            TimerKind::ServerIdle => {
                let received = self.session.as_ref().map(|s| s.received).unwrap_or(false);
                if received {
                    info!(epoch = %self.epoch, "Server idle after receive, finishing");
                    self.teardown().await;
                } else {
                    let timeout = self.config.server_timeout.unwrap_or_default();
                    self.fail(ExchangeError::new(Role::Server, FailureReason::Timeout(timeout)))
                        .await;
                }
            }
            TimerKind::ScanTimeout => {
                let timeout = self.config.scan_timeout.unwrap_or_default();
                self.fail(ExchangeError::new(Role::Scanner, FailureReason::Timeout(timeout)))
                    .await;
            }
            TimerKind::ConnectTimeout => {
                let timeout = self.config.connection_timeout;
                self.fail(ExchangeError::new(Role::Client, FailureReason::Timeout(timeout)))
                    .await;
            }
        }
    }

    // ------------------------------------------------------------------------
    // Teardown and Reporting
    // ------------------------------------------------------------------------

    /// Surface a failure and end the session unless it was an ordering error
    async fn fail(&mut self, err: ExchangeError) {
        self.report(&err);
        if !err.preserves_session() {
            self.teardown().await;
        }
    }

    fn report(&self, err: &ExchangeError) {
        if err.preserves_session() {
            warn!(epoch = %self.epoch, "Exchange call rejected: {}", err);
        } else {
            error!(epoch = %self.epoch, "Exchange failed: {}", err);
        }
        self.emit(ExchangeEvent::Error(err.clone()));
    }

    /// Stop every role and clear the session, safe from any state
    async fn teardown(&mut self) {
        self.tearing_down = true;
        self.publish_status();

        for (_, task) in self.timers.drain() {
            task.abort();
        }

        self.scanner.stop().await;
        self.advertiser.stop().await;
        self.client.disconnect().await;
        self.server.close().await;

        let finished = self.session.take();
        self.epoch = self.epoch.next();
        self.tearing_down = false;
        self.publish_status();

        if let Some(session) = finished {
            info!(
                epoch = %session.epoch,
                elapsed_ms = session.started_at.elapsed().as_millis() as u64,
                "Exchange finished"
            );
            self.emit(ExchangeEvent::Finished {
                epoch: session.epoch,
            });
        }
    }

    fn sink(&self, role: Role) -> EventSink {
        EventSink::new(self.epoch, role, self.role_tx.clone())
    }

    fn emit(&self, event: ExchangeEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    fn role_states(&self) -> RoleStates {
        RoleStates {
            advertiser: self.advertiser.state(),
            scanner: self.scanner.state(),
            server: self.server.state(),
            client: self.client.state(),
        }
    }

    fn publish_status(&self) {
        let roles = self.role_states();
        let phase = if self.tearing_down {
            ExchangePhase::TearingDown
        } else if self.session.is_none() {
            ExchangePhase::Idle
        } else {
            let lingering = self.timers.contains_key(&TimerKind::ServerCloseDue);
            ExchangePhase::from_roles(&roles, lingering)
        };

        let status = ExchangeStatus {
            phase,
            is_active: self.session.is_some(),
            last_received_record: self.last_received.clone(),
            peer: self
                .session
                .as_ref()
                .and_then(|s| s.peer.as_ref())
                .map(PeerHandle::summary),
            epoch: self.epoch,
            roles,
        };

        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}
