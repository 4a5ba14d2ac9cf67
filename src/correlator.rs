//! Response Correlator - routes each reply to the caller that issued the command
//!
//! Every submitted command gets a single-assignment slot keyed by its
//! [`RequestId`]. The acceptor fills the slot of the command it dispatched on
//! a connection; the caller waits on the slot until it is filled or its
//! deadline passes. Replies for slots that already expired are dropped.

use crate::bridge::BridgeError;
use crate::types::{Action, RequestId};

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

/// What the acceptor hands back for one request
pub type Delivery = Result<Value, BridgeError>;

/// Deadline used when `now + timeout` does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

struct PendingSlot {
    action: Action,
    response_tx: oneshot::Sender<Delivery>,
    created_at: Instant,
}

/// Caller-side handle of an in-flight request
#[derive(Debug)]
pub struct PendingRequest {
    id: RequestId,
    action: Action,
    timeout: Duration,
    deadline: Instant,
    response_rx: oneshot::Receiver<Delivery>,
}

impl PendingRequest {
    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

#[derive(Default)]
struct Slots {
    open: HashMap<RequestId, PendingSlot>,
    closed: bool,
}

/// Pending result slots keyed by request id
#[derive(Default)]
pub struct Correlator {
    slots: Mutex<Slots>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a result slot that expires `timeout` from now.
    /// Fails with `Shutdown` once `fail_all` has run.
    pub fn register(
        &self,
        id: RequestId,
        action: Action,
        timeout: Duration,
    ) -> Result<PendingRequest, BridgeError> {
        let (response_tx, response_rx) = oneshot::channel();
        let created_at = Instant::now();

        {
            let mut slots = self.slots.lock();
            if slots.closed {
                return Err(BridgeError::Shutdown);
            }
            slots.open.insert(
                id,
                PendingSlot {
                    action,
                    response_tx,
                    created_at,
                },
            );
        }

        let deadline = created_at
            .checked_add(timeout)
            .unwrap_or_else(|| created_at + FAR_FUTURE);

        Ok(PendingRequest {
            id,
            action,
            timeout,
            deadline,
            response_rx,
        })
    }

    /// Fill the slot for `id`. Returns false when nobody is waiting any more.
    pub fn deliver(&self, id: RequestId, delivery: Delivery) -> bool {
        let slot = self.slots.lock().open.remove(&id);
        match slot {
            Some(slot) => {
                let waited = slot.created_at.elapsed();
                if slot.response_tx.send(delivery).is_err() {
                    debug!("Caller for {} ({}) went away before delivery", id, slot.action);
                    return false;
                }
                debug!("Delivered {} result for {} after {:?}", slot.action, id, waited);
                true
            }
            None => {
                warn!("Dropping late reply for expired request {}", id);
                false
            }
        }
    }

    /// Mark the slot expired. Returns false if it was already filled or expired.
    pub fn expire(&self, id: RequestId) -> bool {
        self.slots.lock().open.remove(&id).is_some()
    }

    /// Wait for the slot to be filled, up to the request's deadline
    pub async fn await_result(&self, pending: PendingRequest) -> Delivery {
        let PendingRequest {
            id,
            action,
            timeout,
            deadline,
            mut response_rx,
        } = pending;

        match tokio::time::timeout_at(deadline, &mut response_rx).await {
            Ok(Ok(delivery)) => delivery,
            Ok(Err(_)) => Err(BridgeError::Shutdown),
            Err(_) => {
                if !self.expire(id) {
                    // Filled while the timer fired
                    if let Ok(delivery) = response_rx.try_recv() {
                        return delivery;
                    }
                }
                debug!("{} request {} expired after {:?}", action, id, timeout);
                Err(BridgeError::Timeout(timeout))
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.slots.lock().open.len()
    }

    /// Fail every waiting caller and refuse new registrations, used at shutdown
    pub fn fail_all(&self, error: BridgeError) -> usize {
        let drained: Vec<PendingSlot> = {
            let mut slots = self.slots.lock();
            slots.closed = true;
            slots.open.drain().map(|(_, slot)| slot).collect()
        };
        let count = drained.len();
        for slot in drained {
            let _ = slot.response_tx.send(Err(error.clone()));
        }
        count
    }
}
