use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::bitcoin;
use crate::event::{EngineEvent, EventHub};

/// The decision a pending approval request is waiting on.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "content")]
pub enum ApprovalPayload {
    /// Confirm the first irreversible action of a swap.
    LockBitcoin {
        #[serde(with = "::bitcoin::amount::serde::as_sat")]
        btc_lock_amount: bitcoin::Amount,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accepted,
    Rejected,
    /// Nobody answered within the request's lifetime. Treated like a
    /// rejection by every caller, but reported distinctly.
    Expired,
}

impl Decision {
    pub fn is_accepted(self) -> bool {
        matches!(self, Decision::Accepted)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("approval request {0} not found or already resolved")]
pub struct UnknownApprovalRequest(pub Uuid);

struct PendingApproval {
    payload: ApprovalPayload,
    respond: oneshot::Sender<bool>,
}

/// Pending user-decision points.
///
/// The state machine parks on [`ApprovalRegistry::request`]; the command
/// surface resolves by request id. Requests die with their swap task: if the
/// waiting future is dropped, the entry is cleaned up on the next resolve.
pub struct ApprovalRegistry {
    pending: Mutex<HashMap<Uuid, PendingApproval>>,
    hub: EventHub,
}

impl ApprovalRegistry {
    pub fn new(hub: EventHub) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            hub,
        }
    }

    /// Create a request and wait for its resolution. `ttl` of `None` waits
    /// forever.
    pub async fn request(&self, payload: ApprovalPayload, ttl: Option<Duration>) -> Decision {
        let request_id = Uuid::new_v4();
        let (respond, rx) = oneshot::channel();

        self.pending
            .lock()
            .expect("approval mutex poisoned")
            .insert(
                request_id,
                PendingApproval {
                    payload: payload.clone(),
                    respond,
                },
            );

        self.hub.emit(EngineEvent::ApprovalRequested {
            request_id,
            payload,
        });
        tracing::info!(%request_id, "waiting for approval");

        let outcome = match ttl {
            Some(ttl) => match tokio::time::timeout(ttl, rx).await {
                Ok(result) => result.ok(),
                Err(_) => None,
            },
            None => rx.await.ok(),
        };

        let decision = match outcome {
            Some(true) => Decision::Accepted,
            Some(false) => Decision::Rejected,
            None => {
                // Expired (or the registry was dropped): drop our entry so
                // a late resolve reports an unknown request.
                self.pending
                    .lock()
                    .expect("approval mutex poisoned")
                    .remove(&request_id);
                self.hub.emit(EngineEvent::ApprovalResolved {
                    request_id,
                    accepted: false,
                });
                Decision::Expired
            }
        };

        tracing::info!(%request_id, ?decision, "approval settled");
        decision
    }

    /// Resolve a pending request. Fails if the id is unknown, already
    /// resolved or expired.
    pub fn resolve(&self, request_id: Uuid, accept: bool) -> Result<(), UnknownApprovalRequest> {
        let entry = self
            .pending
            .lock()
            .expect("approval mutex poisoned")
            .remove(&request_id)
            .ok_or(UnknownApprovalRequest(request_id))?;

        // The waiter may be gone (swap suspended); that still consumes the
        // request.
        let _ = entry.respond.send(accept);

        self.hub.emit(EngineEvent::ApprovalResolved {
            request_id,
            accepted: accept,
        });
        Ok(())
    }

    pub fn pending(&self) -> Vec<(Uuid, ApprovalPayload)> {
        self.pending
            .lock()
            .expect("approval mutex poisoned")
            .iter()
            .map(|(id, entry)| (*id, entry.payload.clone()))
            .collect()
    }
}
