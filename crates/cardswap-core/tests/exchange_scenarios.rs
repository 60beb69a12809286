//! End-to-end exchange scenarios
//!
//! Drives the coordinator through its public handle against the simulated
//! driver and checks the observable session behaviour.

use std::sync::Arc;

use cardswap_core::roles::{AdvertiserState, ScannerState, ServerState};
use cardswap_core::sim::SimulatedDriver;
use cardswap_core::{
    AdvertiseFailure, DecodeError, DriverEvent, EndpointId, ErrorClass, ExchangeConfig,
    ExchangeCoordinator, ExchangeError, ExchangeEvent, ExchangeHandle, ExchangeMode,
    ExchangeObserver, ExchangePhase, ExchangeSide, FailureReason, IdentityRecord, PeerHandle,
    PeerSummary, Role,
};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{timeout, Duration, Instant};

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

fn local_card() -> IdentityRecord {
    IdentityRecord::new(42, "Local", "Tester")
}

fn remote_card() -> IdentityRecord {
    IdentityRecord::new(1, "A", "Eng")
}

/// Config without timers that could fire while a test waits
fn quiet_config() -> ExchangeConfig {
    ExchangeConfig::default()
        .with_scan_timeout(None)
        .with_server_timeout(None)
}

fn spawn(driver: &SimulatedDriver, config: ExchangeConfig) -> ExchangeHandle {
    let (handle, _task) = ExchangeCoordinator::spawn(Arc::new(driver.clone()), config)
        .expect("valid config");
    handle
}

async fn next_event(events: &mut broadcast::Receiver<ExchangeEvent>) -> ExchangeEvent {
    timeout(Duration::from_secs(600), events.recv())
        .await
        .expect("timed out waiting for an exchange event")
        .expect("event stream closed")
}

async fn events_until_finished(events: &mut broadcast::Receiver<ExchangeEvent>) -> Vec<ExchangeEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(events).await;
        let done = matches!(event, ExchangeEvent::Finished { .. });
        seen.push(event);
        if done {
            return seen;
        }
    }
}

fn errors(events: &[ExchangeEvent]) -> Vec<ExchangeError> {
    events
        .iter()
        .filter_map(|event| match event {
            ExchangeEvent::Error(err) => Some(err.clone()),
            _ => None,
        })
        .collect()
}

fn received(events: &[ExchangeEvent]) -> Vec<IdentityRecord> {
    events
        .iter()
        .filter_map(|event| match event {
            ExchangeEvent::RecordReceived(record) => Some(record.clone()),
            _ => None,
        })
        .collect()
}

// ----------------------------------------------------------------------------
// Successful Exchanges
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_exchange_receives_remote_record() {
    let driver = SimulatedDriver::new()
        .with_peer(PeerHandle::new("AA:BB:CC:DD:EE:01").with_name("P"))
        .with_remote_record(&remote_card());
    let handle = spawn(&driver, quiet_config());
    let mut events = handle.subscribe();

    handle.start_exchange(local_card()).await.unwrap();
    let seen = events_until_finished(&mut events).await;

    assert!(matches!(seen[0], ExchangeEvent::Started { mode: ExchangeMode::Both, .. }));
    assert_eq!(
        seen[1],
        ExchangeEvent::PeerDiscovered(PeerSummary {
            address: "AA:BB:CC:DD:EE:01".into(),
            name: Some("P".into()),
        })
    );
    assert_eq!(seen[2], ExchangeEvent::RecordReceived(remote_card()));
    assert!(matches!(seen[3], ExchangeEvent::Finished { .. }));

    let status = handle.wait_until_idle().await.unwrap();
    assert!(!status.is_active);
    assert_eq!(status.phase, ExchangePhase::Idle);
    assert_eq!(status.last_received_record, Some(remote_card()));
    assert!(status.roles.all_idle());

    let stats = driver.stats();
    assert_eq!(stats.connects, 1);
    assert_eq!(stats.disconnects, 1);
    assert_eq!(stats.servers_opened, 1);
    assert_eq!(stats.servers_closed, 1);
}

#[tokio::test]
async fn test_at_most_one_record_per_exchange() {
    let driver = SimulatedDriver::new()
        .with_peer(PeerHandle::new("11:11:11:11:11:11"))
        .with_peer(PeerHandle::new("22:22:22:22:22:22"))
        .with_remote_record(&remote_card());
    let handle = spawn(&driver, quiet_config().with_mode(ExchangeMode::Take));
    let mut events = handle.subscribe();

    handle.start_exchange(local_card()).await.unwrap();
    let seen = events_until_finished(&mut events).await;
    assert_eq!(received(&seen), vec![remote_card()]);

    // A late completion from the finished session changes nothing
    let late = driver.last_sink(Role::Client).unwrap();
    late.emit(DriverEvent::ReadCompleted {
        endpoint: EndpointId::default(),
        result: Ok(remote_card().encode().unwrap()),
    });
    handle.stop_exchange().await.unwrap();

    assert!(events.try_recv().is_err());
    assert_eq!(driver.stats().connects, 1);
}

#[tokio::test]
async fn test_keep_serving_after_receive() {
    let driver = SimulatedDriver::new()
        .with_peer(PeerHandle::new("AA:BB:CC:DD:EE:01"))
        .with_remote_record(&remote_card());
    let handle = spawn(&driver, quiet_config().with_keep_serving_after_receive(true));

    handle.start_exchange(local_card()).await.unwrap();
    let status = handle
        .wait_for_status(|s| s.last_received_record.is_some())
        .await
        .unwrap();

    assert!(status.is_active);
    assert_eq!(status.phase, ExchangePhase::ServingOnly);

    handle.stop_exchange().await.unwrap();
    let status = handle.status();
    assert!(!status.is_active);
    assert!(status.roles.all_idle());
}

#[tokio::test(start_paused = true)]
async fn test_give_only_closes_after_served_read() {
    let driver = SimulatedDriver::new();
    let config = quiet_config()
        .with_mode(ExchangeMode::Give)
        .with_server_close_delay(Duration::from_secs(5));
    let handle = spawn(&driver, config);
    let mut events = handle.subscribe();

    handle.start_exchange(local_card()).await.unwrap();
    assert!(matches!(next_event(&mut events).await, ExchangeEvent::Started { .. }));

    assert!(driver.simulate_remote_read(EndpointId::default()));
    assert_eq!(
        next_event(&mut events).await,
        ExchangeEvent::RecordServed {
            peer: Some("sim-central".into())
        }
    );
    let status = handle
        .wait_for_status(|s| s.phase == ExchangePhase::Exchanging(ExchangeSide::Giver))
        .await
        .unwrap();
    assert!(status.is_active);

    assert!(matches!(next_event(&mut events).await, ExchangeEvent::Finished { .. }));
    let status = handle.wait_until_idle().await.unwrap();
    assert!(status.roles.all_idle());
    assert_eq!(status.last_received_record, None);

    let stats = driver.stats();
    assert_eq!(stats.responses, vec![local_card().encode().unwrap()]);
    assert_eq!(stats.servers_closed, 1);
    assert_eq!(stats.scan_calls, 0);
}

#[tokio::test(start_paused = true)]
async fn test_exchange_finishes_after_serving_without_a_peer() {
    let driver = SimulatedDriver::new();
    let close_delay = Duration::from_secs(5);
    let config = quiet_config()
        .with_scan_timeout(Some(Duration::from_secs(30)))
        .with_server_close_delay(close_delay);
    let handle = spawn(&driver, config);
    let mut events = handle.subscribe();

    handle.start_exchange(local_card()).await.unwrap();
    assert!(matches!(next_event(&mut events).await, ExchangeEvent::Started { .. }));

    let served_at = Instant::now();
    assert!(driver.simulate_remote_read(EndpointId::default()));
    assert!(matches!(next_event(&mut events).await, ExchangeEvent::RecordServed { .. }));

    let seen = events_until_finished(&mut events).await;
    assert!(errors(&seen).is_empty(), "unexpected errors: {:?}", errors(&seen));
    assert_eq!(seen.len(), 1);
    let elapsed = served_at.elapsed();
    assert!(elapsed >= close_delay);
    assert!(elapsed < Duration::from_secs(30));

    let status = handle.wait_until_idle().await.unwrap();
    assert!(status.roles.all_idle());
    assert_eq!(status.last_received_record, None);

    let stats = driver.stats();
    assert_eq!(stats.stop_scan_calls, 1);
    assert_eq!(stats.servers_closed, 1);
    assert_eq!(stats.connects, 0);
}

#[tokio::test(start_paused = true)]
async fn test_continued_read_is_served_once() {
    let driver = SimulatedDriver::new();
    let config = quiet_config().with_mode(ExchangeMode::Give);
    let handle = spawn(&driver, config);
    let mut events = handle.subscribe();

    handle.start_exchange(local_card()).await.unwrap();
    assert!(matches!(next_event(&mut events).await, ExchangeEvent::Started { .. }));

    assert!(driver.simulate_remote_read(EndpointId::default()));
    assert!(driver.simulate_remote_read_at(EndpointId::default(), 22));
    let seen = events_until_finished(&mut events).await;

    let served = seen
        .iter()
        .filter(|event| matches!(event, ExchangeEvent::RecordServed { .. }))
        .count();
    assert_eq!(served, 1);
    assert_eq!(driver.stats().responses.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_record_received_while_served_read_settles() {
    let driver = SimulatedDriver::new()
        .with_peer(PeerHandle::new("AA:BB:CC:DD:EE:01"))
        .with_remote_record(&remote_card())
        .with_held_connect();
    let close_delay = Duration::from_secs(5);
    let config = quiet_config()
        .with_server_close_delay(close_delay)
        .with_connection_timeout(Duration::from_secs(60));
    let handle = spawn(&driver, config);
    let mut events = handle.subscribe();

    handle.start_exchange(local_card()).await.unwrap();
    handle
        .wait_for_status(|s| s.phase == ExchangePhase::Connecting)
        .await
        .unwrap();

    let served_at = Instant::now();
    assert!(driver.simulate_remote_read(EndpointId::default()));
    loop {
        if let ExchangeEvent::RecordServed { .. } = next_event(&mut events).await {
            break;
        }
    }

    driver.complete_connect();
    loop {
        match next_event(&mut events).await {
            ExchangeEvent::RecordReceived(record) => {
                assert_eq!(record, remote_card());
                break;
            }
            ExchangeEvent::Finished { .. } => panic!("finished before the record arrived"),
            _ => {}
        }
    }

    // Take side is done, the server stays up until the close delay
    let status = handle
        .wait_for_status(|s| s.last_received_record.is_some())
        .await
        .unwrap();
    assert!(status.is_active);
    assert_eq!(status.phase, ExchangePhase::Exchanging(ExchangeSide::Giver));
    assert_eq!(status.roles.server, ServerState::Open);
    assert_eq!(status.roles.advertiser, AdvertiserState::Idle);
    assert_eq!(status.roles.scanner, ScannerState::Idle);

    let seen = events_until_finished(&mut events).await;
    assert!(errors(&seen).is_empty());
    assert!(served_at.elapsed() >= close_delay);

    let status = handle.wait_until_idle().await.unwrap();
    assert!(status.roles.all_idle());
    assert_eq!(status.last_received_record, Some(remote_card()));

    let stats = driver.stats();
    assert_eq!(stats.servers_closed, 1);
    assert_eq!(stats.disconnects, 1);
    assert_eq!(driver.open_connections(), 0);
}

// ----------------------------------------------------------------------------
// Idempotence and Ordering
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_stop_is_idempotent() {
    let driver = SimulatedDriver::new();
    let handle = spawn(&driver, quiet_config());

    handle.stop_exchange().await.unwrap();
    handle.stop_exchange().await.unwrap();
    assert!(handle.status().roles.all_idle());
    assert_eq!(driver.stats().stop_scan_calls, 0);

    handle.start_exchange(local_card()).await.unwrap();
    handle.stop_exchange().await.unwrap();
    handle.stop_exchange().await.unwrap();

    let status = handle.status();
    assert_eq!(status.phase, ExchangePhase::Idle);
    assert!(status.roles.all_idle());

    let stats = driver.stats();
    assert_eq!(stats.servers_closed, 1);
    assert_eq!(stats.stop_scan_calls, 1);
    assert_eq!(stats.stop_advertising_calls, 1);
}

#[tokio::test]
async fn test_second_start_is_rejected_without_touching_session() {
    let driver = SimulatedDriver::new();
    let handle = spawn(&driver, quiet_config());
    let mut events = handle.subscribe();

    let epoch = handle.start_exchange(local_card()).await.unwrap();
    let err = handle.start_exchange(local_card()).await.unwrap_err();
    assert_eq!(err.reason, FailureReason::AlreadyRunning);
    assert_eq!(err.class(), ErrorClass::Ordering);

    assert!(matches!(next_event(&mut events).await, ExchangeEvent::Started { .. }));
    assert_eq!(next_event(&mut events).await, ExchangeEvent::Error(err));

    let status = handle.status();
    assert!(status.is_active);
    assert_eq!(status.epoch, epoch);
    assert_eq!(status.phase, ExchangePhase::ServingAndScanning);

    let stats = driver.stats();
    assert_eq!(stats.advertise_calls, 1);
    assert_eq!(stats.scan_calls, 1);
    assert_eq!(stats.servers_opened, 1);
}

#[tokio::test]
async fn test_stop_while_connecting_leaves_every_role_idle() {
    let driver = SimulatedDriver::new()
        .with_peer(PeerHandle::new("AA:BB:CC:DD:EE:01"))
        .with_held_connect();
    let handle = spawn(&driver, quiet_config());

    handle.start_exchange(local_card()).await.unwrap();
    let status = handle
        .wait_for_status(|s| s.phase == ExchangePhase::Connecting)
        .await
        .unwrap();
    assert_eq!(status.peer.map(|p| p.address), Some("AA:BB:CC:DD:EE:01".to_string()));

    handle.stop_exchange().await.unwrap();

    let status = handle.status();
    assert!(!status.is_active);
    assert!(status.roles.all_idle());
    assert_eq!(driver.stats().disconnects, 1);
    assert_eq!(driver.open_connections(), 0);

    // Confirmation arriving after the stop is ignored
    driver.complete_connect();
    handle.stop_exchange().await.unwrap();
    assert!(handle.status().roles.all_idle());
}

#[tokio::test]
async fn test_stale_callbacks_are_ignored() {
    let driver = SimulatedDriver::new();
    let handle = spawn(&driver, quiet_config().with_mode(ExchangeMode::Take));
    let mut events = handle.subscribe();

    handle.start_exchange(local_card()).await.unwrap();
    let stale = driver.last_sink(Role::Scanner).unwrap();
    handle.stop_exchange().await.unwrap();
    handle.start_exchange(local_card()).await.unwrap();
    let fresh = driver.last_sink(Role::Scanner).unwrap();
    assert!(fresh.epoch() > stale.epoch());

    stale.emit(DriverEvent::PeerFound(PeerHandle::new("stale")));
    fresh.emit(DriverEvent::PeerFound(PeerHandle::new("fresh")));

    let discovered = loop {
        if let ExchangeEvent::PeerDiscovered(peer) = next_event(&mut events).await {
            break peer;
        }
    };
    assert_eq!(discovered.address, "fresh");

    handle.wait_until_idle().await.unwrap();
    assert_eq!(driver.stats().connects, 1);
}

// ----------------------------------------------------------------------------
// Failures
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_malformed_payload_reports_corruption() {
    let driver = SimulatedDriver::new()
        .with_peer(PeerHandle::new("AA:BB:CC:DD:EE:01"))
        .with_remote_payload(b"<card/>".to_vec());
    let handle = spawn(&driver, quiet_config());
    let mut events = handle.subscribe();

    handle.start_exchange(local_card()).await.unwrap();
    let seen = events_until_finished(&mut events).await;

    let errors = errors(&seen);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].role, Role::Client);
    assert!(matches!(
        errors[0].reason,
        FailureReason::PayloadCorrupt(DecodeError::Malformed(_))
    ));
    assert_eq!(errors[0].class(), ErrorClass::DataIntegrity);
    assert!(received(&seen).is_empty());

    let status = handle.wait_until_idle().await.unwrap();
    assert_eq!(status.phase, ExchangePhase::Idle);
    assert_eq!(status.last_received_record, None);
    assert_eq!(driver.stats().disconnects, 1);
    assert_eq!(driver.open_connections(), 0);
}

#[tokio::test]
async fn test_radio_disabled_is_reported() {
    let driver = SimulatedDriver::new().with_radio_disabled();
    let handle = spawn(&driver, quiet_config().with_mode(ExchangeMode::Take));

    let err = handle.start_exchange(local_card()).await.unwrap_err();
    assert_eq!(err.role, Role::Scanner);
    assert_eq!(err.reason, FailureReason::RadioDisabled);
    assert_eq!(err.class(), ErrorClass::Recoverable);

    let status = handle.status();
    assert!(!status.is_active);
    assert!(status.roles.all_idle());
}

#[tokio::test]
async fn test_advertise_failure_tears_down_all_roles() {
    let driver =
        SimulatedDriver::new().with_advertise_failure(AdvertiseFailure::TooManyAdvertisers);
    let handle = spawn(&driver, quiet_config());
    let mut events = handle.subscribe();

    handle.start_exchange(local_card()).await.unwrap();
    let seen = events_until_finished(&mut events).await;

    assert_eq!(
        errors(&seen),
        vec![ExchangeError::new(
            Role::Advertiser,
            FailureReason::Advertise(AdvertiseFailure::TooManyAdvertisers)
        )]
    );
    let status = handle.wait_until_idle().await.unwrap();
    assert!(status.roles.all_idle());

    let stats = driver.stats();
    assert_eq!(stats.servers_closed, 1);
    assert_eq!(stats.stop_scan_calls, 1);
}

#[tokio::test]
async fn test_missing_endpoint_is_reported() {
    let driver = SimulatedDriver::new()
        .with_peer(PeerHandle::new("AA:BB:CC:DD:EE:01"))
        .with_remote_endpoints(&[]);
    let handle = spawn(&driver, quiet_config().with_mode(ExchangeMode::Take));
    let mut events = handle.subscribe();

    handle.start_exchange(local_card()).await.unwrap();
    let seen = events_until_finished(&mut events).await;

    assert_eq!(
        errors(&seen)[0].reason,
        FailureReason::EndpointNotFound(EndpointId::default())
    );
    assert_eq!(driver.stats().disconnects, 1);
    assert_eq!(driver.stats().reads, 0);
}

#[tokio::test]
async fn test_link_loss_while_connecting() {
    let driver = SimulatedDriver::new()
        .with_peer(PeerHandle::new("AA:BB:CC:DD:EE:01"))
        .with_held_connect();
    let handle = spawn(&driver, quiet_config());
    let mut events = handle.subscribe();

    handle.start_exchange(local_card()).await.unwrap();
    handle
        .wait_for_status(|s| s.phase == ExchangePhase::Connecting)
        .await
        .unwrap();
    driver.simulate_link_loss();

    let seen = events_until_finished(&mut events).await;
    let errors = errors(&seen);
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0].reason, FailureReason::Connect(_)));
    assert_eq!(driver.stats().disconnects, 1);
}

#[tokio::test(start_paused = true)]
async fn test_scan_timeout_ends_session() {
    let driver = SimulatedDriver::new();
    let config = quiet_config()
        .with_mode(ExchangeMode::Take)
        .with_scan_timeout(Some(Duration::from_secs(30)));
    let handle = spawn(&driver, config);
    let mut events = handle.subscribe();

    handle.start_exchange(local_card()).await.unwrap();
    let seen = events_until_finished(&mut events).await;

    assert_eq!(
        errors(&seen),
        vec![ExchangeError::new(
            Role::Scanner,
            FailureReason::Timeout(Duration::from_secs(30))
        )]
    );
    assert_eq!(driver.stats().stop_scan_calls, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_connection_times_out() {
    let driver = SimulatedDriver::new()
        .with_peer(PeerHandle::new("AA:BB:CC:DD:EE:01"))
        .with_held_connect();
    let config = quiet_config()
        .with_mode(ExchangeMode::Take)
        .with_connection_timeout(Duration::from_secs(10));
    let handle = spawn(&driver, config);
    let mut events = handle.subscribe();

    handle.start_exchange(local_card()).await.unwrap();
    let seen = events_until_finished(&mut events).await;

    let errors = errors(&seen);
    assert_eq!(errors[0].role, Role::Client);
    assert_eq!(errors[0].reason, FailureReason::Timeout(Duration::from_secs(10)));
    assert_eq!(driver.stats().disconnects, 1);
}

// ----------------------------------------------------------------------------
// Handle Surface
// ----------------------------------------------------------------------------

struct ChannelObserver {
    records: mpsc::UnboundedSender<IdentityRecord>,
    peers: mpsc::UnboundedSender<PeerSummary>,
}

impl ExchangeObserver for ChannelObserver {
    fn on_record_received(&self, record: &IdentityRecord) {
        let _ = self.records.send(record.clone());
    }

    fn on_peer_discovered(&self, peer: &PeerSummary) {
        let _ = self.peers.send(peer.clone());
    }
}

#[tokio::test]
async fn test_observer_receives_callbacks() {
    let driver = SimulatedDriver::new()
        .with_peer(PeerHandle::new("AA:BB:CC:DD:EE:01"))
        .with_remote_record(&remote_card());
    let handle = spawn(&driver, quiet_config());

    let (records_tx, mut records_rx) = mpsc::unbounded_channel();
    let (peers_tx, mut peers_rx) = mpsc::unbounded_channel();
    handle.observe(Arc::new(ChannelObserver {
        records: records_tx,
        peers: peers_tx,
    }));

    handle.start_exchange(local_card()).await.unwrap();

    let peer = timeout(Duration::from_secs(5), peers_rx.recv()).await.unwrap().unwrap();
    assert_eq!(peer.address, "AA:BB:CC:DD:EE:01");
    let record = timeout(Duration::from_secs(5), records_rx.recv()).await.unwrap().unwrap();
    assert_eq!(record, remote_card());
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let driver = SimulatedDriver::new();
    let config = ExchangeConfig::default().with_max_payload_size(0);
    assert!(ExchangeCoordinator::spawn(Arc::new(driver), config).is_err());
}

#[tokio::test]
async fn test_calls_after_shutdown_fail() {
    let driver = SimulatedDriver::new();
    let (handle, task) =
        ExchangeCoordinator::spawn(Arc::new(driver), quiet_config()).expect("valid config");

    handle.shutdown().await.unwrap();
    task.await.unwrap();

    let err = handle.start_exchange(local_card()).await.unwrap_err();
    assert_eq!(err.reason, FailureReason::Shutdown);
    assert_eq!(err.class(), ErrorClass::Fatal);
}
