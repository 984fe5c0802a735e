//! Outstanding `check_p2p_data` requests, one slot per connection.
//!
//! A slot is resolved by whichever comes first: the answer, the connection
//! closing, or the requester's timeout. Resolution removes the slot, so the
//! later paths find nothing and skip. Each slot carries a generation so a
//! requester that gave up can only ever remove its own slot, never a newer
//! one opened on the same connection.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};

use beacon_messages::CheckP2pDataResponse;
use beacon_network::ConnectionId;

use crate::RequestError;

type Waiter = oneshot::Sender<Result<CheckP2pDataResponse, RequestError>>;

struct Slot {
    generation: u64,
    waiter: Waiter,
}

#[derive(Default)]
struct Slots {
    open: HashMap<ConnectionId, Slot>,
    next_generation: u64,
}

#[derive(Default)]
pub struct PendingRequests {
    slots: Mutex<Slots>,
}

/// The requester's half of a pending slot.
pub struct PendingResponse {
    connection: ConnectionId,
    generation: u64,
    rx: oneshot::Receiver<Result<CheckP2pDataResponse, RequestError>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the slot for `connection`. Fails if one is already open.
    pub async fn register(&self, connection: ConnectionId) -> Result<PendingResponse, RequestError> {
        let mut slots = self.slots.lock().await;
        if slots.open.contains_key(&connection) {
            return Err(RequestError::Busy(connection));
        }
        slots.next_generation += 1;
        let generation = slots.next_generation;
        let (waiter, rx) = oneshot::channel();
        slots.open.insert(connection, Slot { generation, waiter });
        Ok(PendingResponse {
            connection,
            generation,
            rx,
        })
    }

    /// Deliver an answer. Returns `false` if no request was waiting.
    pub async fn resolve(&self, connection: ConnectionId, response: CheckP2pDataResponse) -> bool {
        self.complete(connection, Ok(response)).await
    }

    /// Fail the waiting request, if any.
    pub async fn fail(&self, connection: ConnectionId, error: RequestError) -> bool {
        self.complete(connection, Err(error)).await
    }

    /// Drop the slot `pending` was issued for without resolving it. A newer
    /// slot on the same connection is left alone.
    pub async fn cancel(&self, pending: &PendingResponse) -> bool {
        self.cancel_generation(pending.connection, pending.generation).await
    }

    async fn cancel_generation(&self, connection: ConnectionId, generation: u64) -> bool {
        let mut slots = self.slots.lock().await;
        match slots.open.get(&connection) {
            Some(slot) if slot.generation == generation => {
                slots.open.remove(&connection);
                true
            }
            _ => false,
        }
    }

    pub async fn is_pending(&self, connection: ConnectionId) -> bool {
        self.slots.lock().await.open.contains_key(&connection)
    }

    async fn complete(
        &self,
        connection: ConnectionId,
        outcome: Result<CheckP2pDataResponse, RequestError>,
    ) -> bool {
        let Some(slot) = self.slots.lock().await.open.remove(&connection) else {
            return false;
        };
        // The requester may have given up between the lookup and the send.
        slot.waiter.send(outcome).is_ok()
    }

    /// Wait for `pending` to resolve, giving up after `timeout`.
    pub async fn wait(
        &self,
        pending: PendingResponse,
        timeout: Duration,
    ) -> Result<CheckP2pDataResponse, RequestError> {
        let PendingResponse {
            connection,
            generation,
            rx,
        } = pending;
        let waited = tokio::time::timeout(timeout, rx).await;
        match waited {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RequestError::ConnectionLost),
            Err(_) => {
                self.cancel_generation(connection, generation).await;
                Err(RequestError::Timeout(timeout))
            }
        }
    }
}
