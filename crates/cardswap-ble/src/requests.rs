//! Bridge between GATT read callbacks and the server role
//!
//! The GATT stack asks for characteristic values from its own callback. The
//! bridge parks each read under a [`RequestId`], reports it to the exchange
//! core as a `ReadRequest` and waits for the matching `respond` call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cardswap_core::{DriverEvent, EndpointId, EventSink, RequestId};
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::BleDriverError;

#[derive(Debug, Clone)]
pub struct ReadBridge {
    pending: Arc<Mutex<HashMap<RequestId, oneshot::Sender<Vec<u8>>>>>,
    next_id: Arc<AtomicU64>,
    response_timeout: Duration,
}

impl ReadBridge {
    pub fn new(response_timeout: Duration) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            response_timeout,
        }
    }

    /// Report a remote read and wait for the answer
    ///
    /// Returns the value from `offset` onwards, empty when the offset lies
    /// past the end.
    pub async fn request(
        &self,
        endpoint: EndpointId,
        peer: Option<String>,
        offset: usize,
        sink: &EventSink,
    ) -> Result<Vec<u8>, BleDriverError> {
        let request = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request, tx);

        if !sink.emit(DriverEvent::ReadRequest {
            request,
            endpoint,
            offset,
            peer,
        }) {
            self.pending.lock().await.remove(&request);
            return Err(BleDriverError::SinkClosed);
        }

        let payload = match timeout(self.response_timeout, rx).await {
            Ok(Ok(payload)) => payload,
            Ok(Err(_)) => {
                debug!("Read request {:?} dropped without an answer", request);
                return Err(BleDriverError::SinkClosed);
            }
            Err(_) => {
                warn!("Read request {:?} timed out", request);
                self.pending.lock().await.remove(&request);
                return Err(BleDriverError::ResponseTimeout(self.response_timeout));
            }
        };

        Ok(payload.get(offset..).map(<[u8]>::to_vec).unwrap_or_default())
    }

    /// Answer a pending read
    pub async fn respond(&self, request: RequestId, payload: Vec<u8>) -> Result<(), BleDriverError> {
        let tx = self
            .pending
            .lock()
            .await
            .remove(&request)
            .ok_or(BleDriverError::UnknownHandle)?;

        tx.send(payload).map_err(|_| BleDriverError::UnknownHandle)
    }

    /// Fail every pending read, used when the server closes
    pub async fn clear(&self) {
        let mut pending = self.pending.lock().await;
        if !pending.is_empty() {
            debug!("Dropping {} pending read requests", pending.len());
        }
        pending.clear();
    }

    #[cfg(test)]
    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }
}
