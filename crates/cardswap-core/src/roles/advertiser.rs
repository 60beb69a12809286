//! Advertiser role

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::driver::{BleDriver, EventSink};
use crate::errors::{AdvertiseFailure, ExchangeError, FailureReason, Role};
use crate::protocol::{AdvertiseSettings, ServiceMarker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AdvertiserState {
    #[default]
    Idle,
    /// Requested, waiting for the platform confirmation
    Starting,
    Advertising,
}

/// Broadcasts the service marker
pub struct Advertiser {
    driver: Arc<dyn BleDriver>,
    state: AdvertiserState,
}

impl Advertiser {
    pub fn new(driver: Arc<dyn BleDriver>) -> Self {
        Self {
            driver,
            state: AdvertiserState::Idle,
        }
    }

    pub fn state(&self) -> AdvertiserState {
        self.state
    }

    /// Request the advertisement
    ///
    /// Only one advertisement may be in flight, a second start while
    /// starting or advertising is rejected without touching the platform.
    pub async fn start(
        &mut self,
        marker: ServiceMarker,
        settings: &AdvertiseSettings,
        sink: EventSink,
    ) -> Result<(), ExchangeError> {
        if self.state != AdvertiserState::Idle {
            return Err(ExchangeError::already_running(Role::Advertiser));
        }

        self.state = AdvertiserState::Starting;
        match self.driver.advertise(marker, settings, sink).await {
            Ok(()) => {
                debug!("Advertise requested for {}", marker);
                Ok(())
            }
            Err(e) => {
                self.state = AdvertiserState::Idle;
                Err(e.into_exchange_error(Role::Advertiser))
            }
        }
    }

    /// Platform confirmed the advertisement
    pub fn on_started(&mut self) {
        if self.state == AdvertiserState::Starting {
            info!("Advertising started");
            self.state = AdvertiserState::Advertising;
        }
    }

    /// Platform rejected the advertisement
    ///
    /// Returns `None` when nothing was requested, e.g. a rejection arriving
    /// after `stop`.
    pub fn on_failed(&mut self, failure: AdvertiseFailure) -> Option<ExchangeError> {
        if self.state == AdvertiserState::Idle {
            debug!("Ignoring advertise failure while idle: {:?}", failure);
            return None;
        }
        self.state = AdvertiserState::Idle;
        Some(ExchangeError::new(Role::Advertiser, FailureReason::Advertise(failure)))
    }

    /// Stop advertising, a no-op when idle
    pub async fn stop(&mut self) {
        if self.state == AdvertiserState::Idle {
            return;
        }
        self.state = AdvertiserState::Idle;
        if let Err(e) = self.driver.stop_advertising().await {
            warn!("Failed to stop advertising: {}", e);
        }
        info!("Advertising stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverEvent, Epoch};
    use crate::sim::SimulatedDriver;
    use tokio::sync::mpsc;

    fn setup(driver: &SimulatedDriver) -> (Advertiser, EventSink, mpsc::UnboundedReceiver<crate::driver::RoleEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(Epoch(1), Role::Advertiser, tx);
        (Advertiser::new(Arc::new(driver.clone())), sink, rx)
    }

    #[tokio::test]
    async fn test_stop_before_start_is_noop() {
        let driver = SimulatedDriver::new();
        let (mut advertiser, _sink, _rx) = setup(&driver);

        advertiser.stop().await;
        advertiser.stop().await;
        assert_eq!(advertiser.state(), AdvertiserState::Idle);
        assert_eq!(driver.stats().stop_advertising_calls, 0);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let driver = SimulatedDriver::new();
        let (mut advertiser, sink, mut rx) = setup(&driver);
        let settings = AdvertiseSettings::default();

        advertiser
            .start(ServiceMarker::default(), &settings, sink.clone())
            .await
            .unwrap();
        assert_eq!(advertiser.state(), AdvertiserState::Starting);
        assert_eq!(rx.recv().await.unwrap().event, DriverEvent::AdvertiseStarted);
        advertiser.on_started();
        assert_eq!(advertiser.state(), AdvertiserState::Advertising);

        let err = advertiser
            .start(ServiceMarker::default(), &settings, sink)
            .await
            .unwrap_err();
        assert_eq!(err.reason, FailureReason::AlreadyRunning);
        assert_eq!(driver.stats().advertise_calls, 1);

        advertiser.stop().await;
        advertiser.stop().await;
        assert_eq!(advertiser.state(), AdvertiserState::Idle);
        assert_eq!(driver.stats().stop_advertising_calls, 1);
    }

    #[tokio::test]
    async fn test_platform_rejection_returns_to_idle() {
        let driver = SimulatedDriver::new().with_advertise_failure(AdvertiseFailure::DataTooLarge);
        let (mut advertiser, sink, mut rx) = setup(&driver);

        advertiser
            .start(ServiceMarker::default(), &AdvertiseSettings::default(), sink)
            .await
            .unwrap();
        let DriverEvent::AdvertiseFailed(failure) = rx.recv().await.unwrap().event else {
            panic!("expected advertise failure");
        };

        let err = advertiser.on_failed(failure).unwrap();
        assert_eq!(
            err.reason,
            FailureReason::Advertise(AdvertiseFailure::DataTooLarge)
        );
        assert_eq!(advertiser.state(), AdvertiserState::Idle);
    }

    #[tokio::test]
    async fn test_rejection_after_stop_is_ignored() {
        let driver = SimulatedDriver::new();
        let (mut advertiser, sink, _rx) = setup(&driver);

        advertiser
            .start(ServiceMarker::default(), &AdvertiseSettings::default(), sink)
            .await
            .unwrap();
        advertiser.stop().await;

        assert!(advertiser.on_failed(AdvertiseFailure::InternalError).is_none());
        assert_eq!(advertiser.state(), AdvertiserState::Idle);
    }
}
