//! Routes push frames to subscription callbacks.
//!
//! The receive loop calls [`SubscriptionRouter::route`] for every frame whose
//! routing key belongs to a subscription.  Matching callbacks are not run on
//! the receive loop: they are bundled into one [`Dispatch`] and pushed onto a
//! bounded queue served by a [`Dispatcher`] task.  A slow callback therefore
//! delays other callbacks, never frame delivery.
//!
//! A callback that returns `Err` or panics is logged and skipped; the
//! dispatcher keeps running.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, warn};
use tydom_core::{ParsedFrame, StateEvent, SubscriptionId, TransactionId};

/// Callback invoked with every matching push event.
pub type StateCallback = Arc<dyn Fn(&StateEvent) -> anyhow::Result<()> + Send + Sync>;

struct Subscription {
    filter: Vec<String>,
    callback: StateCallback,
}

/// One decoded push event and the callbacks it must reach.
pub struct Dispatch {
    pub event: StateEvent,
    callbacks: Vec<StateCallback>,
}

/// Subscription table plus the producer side of the dispatch queue.
pub struct SubscriptionRouter {
    subscriptions: RwLock<HashMap<TransactionId, Vec<Subscription>>>,
    queue: mpsc::Sender<Dispatch>,
}

impl SubscriptionRouter {
    /// Creates a router and the dispatcher that must be spawned to serve it.
    pub fn new(queue_capacity: usize) -> (Self, Dispatcher) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        (
            Self {
                subscriptions: RwLock::new(HashMap::new()),
                queue: tx,
            },
            Dispatcher { queue: rx },
        )
    }

    /// Adds a callback on `subscription`.  An empty `filter` accepts every
    /// event name.  Several callbacks may share one subscription id.
    pub async fn register(
        &self,
        subscription: SubscriptionId,
        callback: StateCallback,
        filter: Vec<String>,
    ) {
        debug!("registering callback on {subscription} (filter: {filter:?})");
        self.subscriptions
            .write()
            .await
            .entry(subscription.transaction_id())
            .or_default()
            .push(Subscription { filter, callback });
    }

    /// Returns `true` if `key` belongs to a registered subscription.
    pub async fn is_subscribed(&self, key: TransactionId) -> bool {
        self.subscriptions.read().await.contains_key(&key)
    }

    /// Queues `frame` for every subscription callback on `key` whose filter
    /// accepts it.
    ///
    /// Returns `false` when `key` has no subscription, so the caller can fall
    /// back to the correlator.  A frame that matches no filter still counts as
    /// routed.
    pub async fn route(&self, key: TransactionId, frame: &ParsedFrame) -> bool {
        let event = StateEvent::from_frame(frame);
        let callbacks: Vec<StateCallback> = {
            let subscriptions = self.subscriptions.read().await;
            let Some(subs) = subscriptions.get(&key) else {
                return false;
            };
            subs.iter()
                .filter(|sub| event.matches(&sub.filter))
                .map(|sub| Arc::clone(&sub.callback))
                .collect()
        };

        if callbacks.is_empty() {
            return true;
        }

        debug!(
            "dispatching {} to {} callback(s) ({} changed id(s))",
            event.name,
            callbacks.len(),
            event.changed_ids.len()
        );
        match self.queue.try_send(Dispatch { event, callbacks }) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dispatch)) => {
                warn!("dispatch queue full, dropping {}", dispatch.event.name);
            }
            Err(mpsc::error::TrySendError::Closed(dispatch)) => {
                warn!("dispatcher stopped, dropping {}", dispatch.event.name);
            }
        }
        true
    }
}

/// Consumer side of the dispatch queue.
pub struct Dispatcher {
    queue: mpsc::Receiver<Dispatch>,
}

impl Dispatcher {
    /// Runs callbacks until the router is dropped.
    pub async fn run(mut self) {
        while let Some(dispatch) = self.queue.recv().await {
            for callback in &dispatch.callbacks {
                match catch_unwind(AssertUnwindSafe(|| callback(&dispatch.event))) {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        warn!("state callback for {} failed: {err:#}", dispatch.event.name);
                    }
                    Err(_) => {
                        error!("state callback for {} panicked", dispatch.event.name);
                    }
                }
            }
        }
        debug!("dispatcher finished");
    }
}
