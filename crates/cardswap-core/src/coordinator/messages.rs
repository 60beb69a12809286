//! Messages exchanged between the coordinator task and its handles

use tokio::sync::oneshot;

use crate::config::ExchangeMode;
use crate::driver::{Epoch, PeerSummary};
use crate::errors::ExchangeError;
use crate::record::IdentityRecord;

/// Requests sent from an [`super::ExchangeHandle`] to the coordinator task
#[derive(Debug)]
pub enum ExchangeCommand {
    StartExchange {
        record: IdentityRecord,
        /// `None` uses the configured mode
        mode: Option<ExchangeMode>,
        reply: oneshot::Sender<Result<Epoch, ExchangeError>>,
    },
    StopExchange {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Notifications broadcast to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeEvent {
    Started { epoch: Epoch, mode: ExchangeMode },
    PeerDiscovered(PeerSummary),
    RecordReceived(IdentityRecord),
    /// A remote central read our card
    RecordServed { peer: Option<String> },
    Error(ExchangeError),
    Finished { epoch: Epoch },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TimerKind {
    /// Close delay after serving a read elapsed
    ServerCloseDue,
    /// Nobody read the server in time
    ServerIdle,
    ScanTimeout,
    ConnectTimeout,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct TimerEvent {
    pub epoch: Epoch,
    pub kind: TimerKind,
}
