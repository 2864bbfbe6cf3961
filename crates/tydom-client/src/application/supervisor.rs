//! Connection supervisor: health polling and reconnect with cooldown.
//!
//! # Reconnect policy (for beginners)
//!
//! The supervisor wakes whenever the connection state changes, and at least
//! once per `health_interval`.  It reacts to two states:
//!
//! - `Disconnected` – nothing has been attempted yet; connect immediately.
//! - `Failed` – the last attempt failed or the socket closed; wait out the
//!   cooldown, then connect again.
//!
//! `Unauthorized` parks the supervisor: a rejected password is never retried
//! on a timer.  It resumes once the client is moved back to `Disconnected`
//! by `authorize` or `start`.
//!
//! The cooldown is slept in `cooldown_step` slices and the stop flag is
//! checked between slices, so `stop()` during a 20 s cooldown takes effect
//! within one step and no further attempt is made.
//!
//! Each pass also garbage-collects pending request slots nobody awaited.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::domain::{AuthMode, ClientConfig, ConnectionState, HandshakeError};

/// What the supervisor needs from the client it looks after.
#[async_trait]
pub trait Supervised: Send + Sync {
    fn is_stopped(&self) -> bool;

    fn state(&self) -> ConnectionState;

    fn subscribe_state(&self) -> watch::Receiver<ConnectionState>;

    /// Runs one full handshake (auth sequence included) and installs the
    /// resulting transport.  Sets `Ready` or `Failed` itself.
    async fn establish(&self) -> Result<AuthMode, HandshakeError>;

    /// Drops stale pending request slots.
    async fn purge_expired(&self);
}

/// Timing knobs, taken from [`ClientConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorTiming {
    pub cooldown: Duration,
    pub cooldown_step: Duration,
    pub health_interval: Duration,
}

impl SupervisorTiming {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            cooldown: config.reconnect_cooldown(),
            cooldown_step: config.cooldown_step(),
            health_interval: config.health_interval(),
        }
    }
}

pub struct Supervisor<S: Supervised> {
    target: S,
    timing: SupervisorTiming,
}

impl<S: Supervised> Supervisor<S> {
    pub fn new(target: S, timing: SupervisorTiming) -> Self {
        Self { target, timing }
    }

    /// Runs until the target is stopped.
    pub async fn run(self) {
        info!("connection supervisor started");
        let mut changes = self.target.subscribe_state();

        while !self.target.is_stopped() {
            match self.target.state() {
                ConnectionState::Disconnected => self.connect().await,
                ConnectionState::Failed => {
                    warn!(
                        "gateway connection lost, reconnecting in {:?}",
                        self.timing.cooldown
                    );
                    if !self.cool_down().await {
                        break;
                    }
                    self.connect().await;
                }
                ConnectionState::Stopped => break,
                ConnectionState::Unauthorized => {
                    debug!("credentials rejected, waiting for new ones");
                }
                ConnectionState::Connecting
                | ConnectionState::Authenticating
                | ConnectionState::Ready => {}
            }

            self.target.purge_expired().await;

            // Mark the current value seen so only later transitions wake us.
            changes.borrow_and_update();
            if self.target.state() != ConnectionState::Failed {
                let _ = timeout(self.timing.health_interval, changes.changed()).await;
            }
        }
        info!("connection supervisor stopped");
    }

    async fn connect(&self) {
        if self.target.is_stopped() {
            return;
        }
        match self.target.establish().await {
            Ok(mode) => info!("gateway connection established (auth: {mode})"),
            Err(err) => warn!("gateway connection attempt failed: {err}"),
        }
    }

    /// Sleeps the cooldown in steps.  Returns `false` if stopped meanwhile.
    async fn cool_down(&self) -> bool {
        let step = self.timing.cooldown_step.max(Duration::from_millis(1));
        let mut remaining = self.timing.cooldown;
        while !remaining.is_zero() {
            if self.target.is_stopped() {
                debug!("stop requested during reconnect cooldown");
                return false;
            }
            let slice = remaining.min(step);
            sleep(slice).await;
            remaining -= slice;
        }
        !self.target.is_stopped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ConnectError;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    // ── Test double ───────────────────────────────────────────────────────────

    /// Scripted connection: each `establish` pops the next outcome.
    struct FakeConnection {
        state: watch::Sender<ConnectionState>,
        stopped: AtomicBool,
        outcomes: Mutex<VecDeque<bool>>,
        attempts: Mutex<Vec<Instant>>,
        purges: AtomicUsize,
    }

    impl FakeConnection {
        fn new(outcomes: &[bool]) -> Arc<Self> {
            Arc::new(Self {
                state: watch::channel(ConnectionState::Disconnected).0,
                stopped: AtomicBool::new(false),
                outcomes: Mutex::new(outcomes.iter().copied().collect()),
                attempts: Mutex::new(Vec::new()),
                purges: AtomicUsize::new(0),
            })
        }

        fn fail(&self) {
            self.state.send_replace(ConnectionState::Failed);
        }

        fn reject_credentials(&self) {
            self.state.send_replace(ConnectionState::Unauthorized);
        }

        fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
            self.state.send_replace(ConnectionState::Stopped);
        }

        fn attempts(&self) -> Vec<Instant> {
            self.attempts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Supervised for Arc<FakeConnection> {
        fn is_stopped(&self) -> bool {
            self.stopped.load(Ordering::SeqCst)
        }

        fn state(&self) -> ConnectionState {
            *self.state.borrow()
        }

        fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
            self.state.subscribe()
        }

        async fn establish(&self) -> Result<AuthMode, HandshakeError> {
            self.attempts.lock().unwrap().push(Instant::now());
            self.state.send_replace(ConnectionState::Connecting);
            let ok = self.outcomes.lock().unwrap().pop_front().unwrap_or(true);
            if ok {
                self.state.send_replace(ConnectionState::Ready);
                Ok(AuthMode::Secured)
            } else {
                self.state.send_replace(ConnectionState::Failed);
                Err(ConnectError::Transport("refused".to_string()).into())
            }
        }

        async fn purge_expired(&self) {
            self.purges.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn timing() -> SupervisorTiming {
        SupervisorTiming {
            cooldown: Duration::from_secs(20),
            cooldown_step: Duration::from_secs(1),
            health_interval: Duration::from_secs(2),
        }
    }

    // ── Tests ─────────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_disconnected_connects_immediately() {
        // Arrange
        let conn = FakeConnection::new(&[true]);
        let started = Instant::now();

        // Act
        let handle = tokio::spawn(Supervisor::new(Arc::clone(&conn), timing()).run());
        sleep(Duration::from_millis(10)).await;

        // Assert
        assert_eq!(conn.attempts().len(), 1);
        assert!(conn.attempts()[0] - started < Duration::from_millis(10));
        assert_eq!(conn.state(), ConnectionState::Ready);
        assert!(conn.purges.load(Ordering::SeqCst) >= 1);

        conn.stop();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_reconnects_after_cooldown() {
        // Arrange
        let conn = FakeConnection::new(&[true, true]);
        let handle = tokio::spawn(Supervisor::new(Arc::clone(&conn), timing()).run());
        sleep(Duration::from_millis(10)).await;

        // Act
        let failed_at = Instant::now();
        conn.fail();
        sleep(Duration::from_secs(19)).await;
        assert_eq!(conn.attempts().len(), 1, "no attempt during cooldown");
        sleep(Duration::from_secs(2)).await;

        // Assert
        let attempts = conn.attempts();
        assert_eq!(attempts.len(), 2);
        let waited = attempts[1] - failed_at;
        assert!(waited >= Duration::from_secs(20));
        assert!(waited < Duration::from_secs(21));

        conn.stop();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_attempt_keeps_retrying() {
        let conn = FakeConnection::new(&[false, false, true]);
        let handle = tokio::spawn(Supervisor::new(Arc::clone(&conn), timing()).run());

        sleep(Duration::from_secs(45)).await;

        assert_eq!(conn.attempts().len(), 3);
        assert_eq!(conn.state(), ConnectionState::Ready);
        conn.stop();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_cooldown_prevents_reconnect() {
        // Arrange
        let conn = FakeConnection::new(&[false]);
        let handle = tokio::spawn(Supervisor::new(Arc::clone(&conn), timing()).run());
        sleep(Duration::from_secs(5)).await;
        assert_eq!(conn.attempts().len(), 1);

        // Act
        conn.stop();
        let stopped_at = Instant::now();
        handle.await.unwrap();
        sleep(Duration::from_secs(60)).await;

        // Assert
        assert_eq!(conn.attempts().len(), 1);
        assert!(Instant::now() - stopped_at >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_credentials_park_until_reset() {
        // Arrange
        let conn = FakeConnection::new(&[true, true]);
        let handle = tokio::spawn(Supervisor::new(Arc::clone(&conn), timing()).run());
        sleep(Duration::from_millis(10)).await;

        // Act – several cooldowns pass with the password rejected
        conn.reject_credentials();
        sleep(Duration::from_secs(120)).await;

        // Assert
        assert_eq!(conn.attempts().len(), 1, "rejected password must not be retried");
        assert_eq!(conn.state(), ConnectionState::Unauthorized);

        // Act – new credentials move the client back to Disconnected
        conn.state.send_replace(ConnectionState::Disconnected);
        sleep(Duration::from_millis(10)).await;

        // Assert
        assert_eq!(conn.attempts().len(), 2);
        assert_eq!(conn.state(), ConnectionState::Ready);

        conn.stop();
        handle.await.unwrap();
    }
}
