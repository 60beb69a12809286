//! Command handlers for the cardswap CLI

use std::sync::Arc;
use std::time::Duration;

use cardswap_ble::PlatformDriver;
use cardswap_core::{
    ExchangeCoordinator, ExchangeError, ExchangeEvent, ExchangeMode, IdentityRecord,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};

use crate::cli::{Cli, Commands, ExchangeArgs};
use crate::config::AppConfig;
use crate::error::{CliError, Result};

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(cli: Cli, config: AppConfig) -> Result<()> {
        match cli.command {
            Commands::Give(args) => Self::handle_exchange(config, args, ExchangeMode::Give).await,
            Commands::Take(args) => Self::handle_exchange(config, args, ExchangeMode::Take).await,
            Commands::Exchange(args) => {
                Self::handle_exchange(config, args, ExchangeMode::Both).await
            }
            Commands::Config => Self::handle_config_command(&config),
        }
    }

    /// Run one exchange session against the local adapter
    async fn handle_exchange(config: AppConfig, args: ExchangeArgs, mode: ExchangeMode) -> Result<()> {
        let card = match config.card(&args) {
            Ok(card) => card,
            // A take-only session never serves its card
            Err(_) if mode == ExchangeMode::Take => IdentityRecord::new(0, "", ""),
            Err(e) => return Err(e),
        };

        let exchange_config = config
            .exchange_config()?
            .with_mode(mode)
            .with_keep_serving_after_receive(
                args.keep_serving || config.exchange.keep_serving_after_receive,
            );

        let driver = Arc::new(PlatformDriver::new(config.driver_config()).await?);
        let (handle, task) = ExchangeCoordinator::spawn(driver.clone(), exchange_config)?;
        let mut events = handle.subscribe();

        let epoch = handle.start_exchange(card).await?;
        info!("Exchange {} started in {:?} mode", epoch, mode);

        let outcome = tokio::select! {
            outcome = Self::follow_session(&mut events, args.timeout.map(Duration::from_secs)) => outcome,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping the exchange");
                Ok(None)
            }
        };

        if let Err(e) = handle.stop_exchange().await {
            debug!("Stop after session end: {}", e);
        }
        if let Err(e) = handle.shutdown().await {
            debug!("Coordinator shutdown: {}", e);
        }
        if let Err(e) = task.await {
            warn!("Coordinator task ended abnormally: {}", e);
        }
        driver.shutdown().await;

        match outcome? {
            Some(card) if args.json => println!("{}", serde_json::to_string_pretty(&card)?),
            Some(card) => println!("Received card: {}", card),
            None if mode.takes() => println!("No card received"),
            None => println!("Card offered"),
        }
        Ok(())
    }

    /// Follow the event stream until the session finishes
    ///
    /// Returns the received card, the last error if nothing arrived, or
    /// `TimedOut` when `limit` elapses first.
    async fn follow_session(
        events: &mut broadcast::Receiver<ExchangeEvent>,
        limit: Option<Duration>,
    ) -> Result<Option<IdentityRecord>> {
        let follow = async {
            let mut received = None;
            let mut last_error: Option<ExchangeError> = None;

            loop {
                match events.recv().await {
                    Ok(ExchangeEvent::Started { epoch, mode }) => {
                        debug!("Session {} running as {:?}", epoch, mode)
                    }
                    Ok(ExchangeEvent::PeerDiscovered(peer)) => {
                        info!("Found peer {}", peer.name.as_deref().unwrap_or(&peer.address))
                    }
                    Ok(ExchangeEvent::RecordServed { peer }) => {
                        info!("Card read by {}", peer.as_deref().unwrap_or("a peer"))
                    }
                    Ok(ExchangeEvent::RecordReceived(card)) => received = Some(card),
                    Ok(ExchangeEvent::Error(e)) => {
                        error!("{}", e);
                        last_error = Some(e);
                    }
                    Ok(ExchangeEvent::Finished { epoch }) => {
                        debug!("Session {} finished", epoch);
                        break;
                    }
                    Err(RecvError::Lagged(skipped)) => warn!("Missed {} exchange events", skipped),
                    Err(RecvError::Closed) => break,
                }
            }

            match (received, last_error) {
                (Some(card), _) => Ok(Some(card)),
                (None, Some(e)) => Err(CliError::Exchange(e)),
                (None, None) => Ok(None),
            }
        };

        match limit {
            Some(limit) => tokio::time::timeout(limit, follow)
                .await
                .unwrap_or(Err(CliError::TimedOut(limit))),
            None => follow.await,
        }
    }

    /// Print the effective configuration
    fn handle_config_command(config: &AppConfig) -> Result<()> {
        config.exchange_config()?;
        print!("{}", config.to_toml()?);
        Ok(())
    }
}
