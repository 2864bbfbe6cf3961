//! Transaction and subscription identifiers.
//!
//! # What is a transaction id? (for beginners)
//!
//! Every request frame carries a `Transac-Id` header.  The gateway copies the
//! header into its response, which is how a response that arrives seconds
//! later, interleaved with other traffic, finds its way back to the caller
//! that sent the request.
//!
//! Request ids are derived from the wall clock in microseconds, the same
//! scheme the gateway's own mobile apps use.  Two requests issued within the
//! same microsecond (or a clock that steps backwards) must still get distinct
//! ids, so the generator never hands out a value lower than or equal to the
//! previous one.
//!
//! # Two disjoint id spaces
//!
//! Push channels ("subscriptions") also use the `Transac-Id` header as their
//! routing key, but their ids are chosen by the subscriber and never come from
//! the generator.  Request ids are always at or above [`REQUEST_ID_FLOOR`];
//! subscription ids are always below it, so the two maps can never collide.
//!
//! # Thread safety
//!
//! The generator uses an `AtomicU64` with a compare-and-swap loop, so any
//! number of tasks can call [`TransactionIdGenerator::next`] concurrently
//! without a lock and without ever observing the same id twice.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Lowest value a request transaction id can take.
///
/// Microsecond timestamps passed this value in 1970, so every clock-derived
/// id is above it.  Subscription ids must stay strictly below it.
pub const REQUEST_ID_FLOOR: u64 = 1_000_000_000_000;

/// Correlation key carried in the `Transac-Id` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Returns the raw numeric value.
    pub fn value(self) -> u64 {
        self.0
    }

    /// Returns `true` when the id belongs to the request id space.
    pub fn is_request_id(self) -> bool {
        self.0 >= REQUEST_ID_FLOOR
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Standing push channel identifier.
///
/// A subscription id is a [`TransactionId`] from the out-of-band space below
/// [`REQUEST_ID_FLOOR`].  [`SubscriptionId::STATE`] is the default channel:
/// push frames that carry no `Transac-Id` header at all are routed there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Default channel for unsolicited state pushes.
    pub const STATE: SubscriptionId = SubscriptionId(0);

    /// Maps a device or area id to its push channel.
    ///
    /// Returns `None` when `entity_id` falls inside the request id space,
    /// because routing such an id as a subscription could swallow responses.
    pub fn for_entity(entity_id: u64) -> Option<Self> {
        if entity_id < REQUEST_ID_FLOOR {
            Some(Self(entity_id))
        } else {
            None
        }
    }

    /// Returns the routing key used in the `Transac-Id` header.
    pub fn transaction_id(self) -> TransactionId {
        TransactionId(self.0)
    }

    /// Returns the routing key an inbound frame is matched against.
    ///
    /// Frames without a `Transac-Id` header belong to [`SubscriptionId::STATE`].
    pub fn routing_key(frame_id: Option<TransactionId>) -> TransactionId {
        frame_id.unwrap_or(Self::STATE.transaction_id())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub:{}", self.0)
    }
}

/// Thread-safe generator of clock-derived, strictly increasing request ids.
///
/// # Examples
///
/// ```rust
/// use tydom_core::{TransactionIdGenerator, REQUEST_ID_FLOOR};
///
/// let ids = TransactionIdGenerator::new();
/// let a = ids.next();
/// let b = ids.next();
/// assert!(b > a);
/// assert!(a.value() >= REQUEST_ID_FLOOR);
/// ```
#[derive(Debug)]
pub struct TransactionIdGenerator {
    /// The most recently issued id (0 before the first call).
    last: AtomicU64,
}

impl TransactionIdGenerator {
    /// Creates a generator that has not issued any id yet.
    pub fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    /// Returns a fresh id: the current time in microseconds, bumped past the
    /// previously issued id when the clock has not advanced.
    pub fn next(&self) -> TransactionId {
        let now = current_timestamp_us().max(REQUEST_ID_FLOOR);
        let mut previous = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(previous.saturating_add(1));
            // `compare_exchange_weak` only stores `candidate` if no other
            // thread has issued an id since we read `previous`.
            match self.last.compare_exchange_weak(
                previous,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return TransactionId(candidate),
                Err(actual) => previous = actual,
            }
        }
    }

    /// Returns the most recently issued id, if any.
    pub fn last(&self) -> Option<TransactionId> {
        match self.last.load(Ordering::Relaxed) {
            0 => None,
            value => Some(TransactionId(value)),
        }
    }
}

impl Default for TransactionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn current_timestamp_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_generated_ids_are_in_request_space() {
        // Arrange
        let ids = TransactionIdGenerator::new();

        // Act
        let id = ids.next();

        // Assert
        assert!(id.is_request_id());
    }

    #[test]
    fn test_generated_ids_increase_strictly() {
        // Arrange
        let ids = TransactionIdGenerator::new();

        // Act
        let values: Vec<TransactionId> = (0..1000).map(|_| ids.next()).collect();

        // Assert – even within one microsecond the ids must keep increasing
        for window in values.windows(2) {
            assert!(window[1] > window[0], "ids must be strictly increasing");
        }
    }

    #[test]
    fn test_generator_recovers_from_clock_behind_last_id() {
        // Arrange – simulate a previous id far in the future (clock stepped back)
        let ids = TransactionIdGenerator {
            last: AtomicU64::new(u64::MAX - 10),
        };

        // Act
        let id = ids.next();

        // Assert
        assert_eq!(id.value(), u64::MAX - 9);
    }

    #[test]
    fn test_generator_is_thread_safe() {
        // Arrange
        let ids = Arc::new(TransactionIdGenerator::new());
        let thread_count = 8;
        let per_thread = 500;

        // Act
        let handles: Vec<_> = (0..thread_count)
            .map(|_| {
                let ids = Arc::clone(&ids);
                thread::spawn(move || (0..per_thread).map(|_| ids.next()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<TransactionId> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("thread panicked"))
            .collect();

        // Assert – no two callers ever observed the same id
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), thread_count * per_thread);
    }

    #[test]
    fn test_last_is_none_before_first_id() {
        let ids = TransactionIdGenerator::default();
        assert_eq!(ids.last(), None);
        let id = ids.next();
        assert_eq!(ids.last(), Some(id));
    }

    #[test]
    fn test_subscription_for_entity_rejects_request_space() {
        assert!(SubscriptionId::for_entity(1_612_345_678).is_some());
        assert!(SubscriptionId::for_entity(REQUEST_ID_FLOOR).is_none());
    }

    #[test]
    fn test_routing_key_defaults_to_state_channel() {
        // Arrange / Act
        let key = SubscriptionId::routing_key(None);

        // Assert
        assert_eq!(key, SubscriptionId::STATE.transaction_id());
        assert_eq!(
            SubscriptionId::routing_key(Some(TransactionId(42))),
            TransactionId(42)
        );
    }
}
