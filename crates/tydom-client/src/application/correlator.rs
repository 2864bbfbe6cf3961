//! Request/response correlation by transaction id.
//!
//! # How a request finds its response (for beginners)
//!
//! Every request frame carries a unique `Transac-Id`.  Before the frame is
//! sent, the correlator parks a *slot* (a `oneshot` channel pair) under that
//! id.  When the receive loop decodes a response with the same id it calls
//! [`Correlator::fulfil`], which pushes the status and body into the slot's
//! sender.  The caller waiting in [`Correlator::await_response`] wakes up the
//! instant the reply arrives, or gives up when the attempt budget runs out.
//!
//! Sending and waiting are separate steps, so a caller can fire several
//! requests and collect the results afterwards.  Either way the slot is
//! removed once `await_result` returns.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};
use tydom_core::{
    encode_request, Body, Request, Response, TransactionId, TransactionIdGenerator,
};

use crate::application::transport::FrameSink;
use crate::domain::SendError;

/// One outstanding request.
#[derive(Debug)]
struct PendingRequest {
    created_at: Instant,
    /// Taken by `fulfil`.
    tx: Option<oneshot::Sender<Response>>,
    /// Taken by `await_result`.
    rx: Option<oneshot::Receiver<Response>>,
}

/// Issues transaction ids and owns the map of pending requests.
pub struct Correlator {
    ids: TransactionIdGenerator,
    pending: Mutex<HashMap<TransactionId, PendingRequest>>,
    user_agent: String,
}

impl Correlator {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            ids: TransactionIdGenerator::new(),
            pending: Mutex::new(HashMap::new()),
            user_agent: user_agent.into(),
        }
    }

    /// Registers a slot, encodes `request` and hands the frame to `sink`.
    ///
    /// Returns as soon as the frame is queued.
    ///
    /// # Errors
    ///
    /// Propagates the sink's [`SendError`]; the slot is removed so the
    /// request counts as never sent.
    pub async fn send_request(
        &self,
        sink: &dyn FrameSink,
        request: &Request,
    ) -> Result<TransactionId, SendError> {
        let id = self.ids.next();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(
            id,
            PendingRequest {
                created_at: Instant::now(),
                tx: Some(tx),
                rx: Some(rx),
            },
        );

        let frame = encode_request(request, id, &self.user_agent);
        debug!("transaction {id}: {} {}", request.method, request.path);

        if let Err(err) = sink.send_frame(frame).await {
            self.pending.lock().await.remove(&id);
            warn!(
                "transaction {id}: {} {} not sent: {err}",
                request.method, request.path
            );
            return Err(err);
        }
        Ok(id)
    }

    /// Waits up to `budget` for the body of the response to `id`.
    ///
    /// See [`Correlator::await_response`].
    pub async fn await_result(&self, id: TransactionId, budget: Duration) -> Option<Body> {
        self.await_response(id, budget)
            .await
            .map(|response| response.body)
    }

    /// Waits up to `budget` for the response to `id`.
    ///
    /// Returns `None` on timeout, for an unknown id, or if the slot was
    /// already being awaited elsewhere.  The slot is removed in every case.
    pub async fn await_response(&self, id: TransactionId, budget: Duration) -> Option<Response> {
        let rx = self
            .pending
            .lock()
            .await
            .get_mut(&id)
            .and_then(|slot| slot.rx.take());

        let result = match rx {
            Some(rx) => match timeout(budget, rx).await {
                Ok(Ok(response)) => Some(response),
                Ok(Err(_)) => None,
                Err(_) => {
                    debug!("transaction {id}: no response within {budget:?}");
                    None
                }
            },
            None => None,
        };

        self.pending.lock().await.remove(&id);
        result
    }

    /// Sends `request` and immediately waits for its response.
    ///
    /// # Errors
    ///
    /// See [`Correlator::send_request`].  A timeout is `Ok(None)`.
    pub async fn request(
        &self,
        sink: &dyn FrameSink,
        request: &Request,
        budget: Duration,
    ) -> Result<Option<Body>, SendError> {
        let id = self.send_request(sink, request).await?;
        Ok(self.await_result(id, budget).await)
    }

    /// Delivers `response` to the slot for `id`.
    ///
    /// Returns `false` when no slot exists (unknown or expired id) or the slot
    /// was already filled; the caller logs and drops the frame.
    pub async fn fulfil(&self, id: TransactionId, response: Response) -> bool {
        let tx = self
            .pending
            .lock()
            .await
            .get_mut(&id)
            .and_then(|slot| slot.tx.take());
        match tx {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    /// Drops never-awaited slots older than `max_age`.  Returns how many.
    pub async fn purge_expired(&self, max_age: Duration) -> usize {
        let mut pending = self.pending.lock().await;
        let before = pending.len();
        pending.retain(|_, slot| slot.rx.is_none() || slot.created_at.elapsed() < max_age);
        let purged = before - pending.len();
        if purged > 0 {
            debug!("purged {purged} expired pending request(s)");
        }
        purged
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_pending(&self, id: TransactionId) -> bool {
        self.pending.lock().await.contains_key(&id)
    }
}
