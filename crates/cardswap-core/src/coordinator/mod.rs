//! Exchange coordination
//!
//! The coordinator runs as its own task. Callers talk to it through an
//! [`ExchangeHandle`]: commands go in over an mpsc channel with oneshot
//! replies, events come out over a broadcast channel and the current
//! [`ExchangeStatus`] is published on a watch channel. Driver completions
//! arrive on a separate unbounded queue, so every state change is applied
//! by a single writer.

pub mod task;
pub mod handle;
pub mod messages;
pub mod state;

pub use task::ExchangeCoordinator;
pub use handle::{ExchangeHandle, ExchangeObserver};
pub use messages::{ExchangeCommand, ExchangeEvent};
pub use state::{ExchangePhase, ExchangeSession, ExchangeSide, ExchangeStatus};

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::ExchangeConfig;
use crate::driver::BleDriver;
use crate::errors::ConfigError;

/// Command queue depth
const COMMAND_BUFFER: usize = 32;

impl ExchangeCoordinator {
    /// Validate `config`, spawn the coordinator task and return its handle
    pub fn spawn(
        driver: Arc<dyn BleDriver>,
        config: ExchangeConfig,
    ) -> Result<(ExchangeHandle, JoinHandle<()>), ConfigError> {
        config.validate()?;

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, _) = broadcast::channel(config.event_capacity);
        let (status_tx, status_rx) = watch::channel(ExchangeStatus::default());

        let coordinator =
            ExchangeCoordinator::new(driver, config, command_rx, event_tx.clone(), status_tx);
        let task = tokio::spawn(coordinator.run());

        Ok((ExchangeHandle::new(command_tx, event_tx, status_rx), task))
    }
}
