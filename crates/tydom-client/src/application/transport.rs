//! Transport seam: the `Connector` trait and the live `Transport` handle.
//!
//! # How the pieces fit together (for beginners)
//!
//! A [`Connector`] performs one WebSocket upgrade attempt.  If the gateway
//! switches protocols it hands back a [`TransportLink`]: a command channel the
//! client writes frames into, and an event channel the socket pump reports
//! lifecycle notifications on.
//!
//! ```text
//!  TydomClient ──LinkCommand──► socket pump task ──Binary──► gateway
//!       ▲                            │
//!       └──────TransportEvent────────┘◄──────Binary/Close────┘
//! ```
//!
//! The application layer only ever sees these channels, so the production
//! WebSocket connector and the in-memory mock are interchangeable.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;
use tydom_core::UpgradeRequest;

use crate::domain::{ConnectError, SendError};

/// Instruction sent from the client to the socket pump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCommand {
    /// Write one frame as a binary WebSocket message.
    Send(Vec<u8>),
    /// Send a close frame and end the pump.
    Close,
}

/// Lifecycle notification emitted by the socket pump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The link is established and frames may flow.
    Opened,
    /// One inbound message (binary or text) was received.
    MessageReceived(Vec<u8>),
    /// A non-fatal I/O or protocol error was observed.
    Error(String),
    /// The socket is gone.  Always the last event on a link.
    Closed { code: Option<u16>, reason: String },
}

/// Channel pair handed back by a successful upgrade.
#[derive(Debug)]
pub struct TransportLink {
    pub commands: mpsc::Sender<LinkCommand>,
    pub events: mpsc::Receiver<TransportEvent>,
}

impl TransportLink {
    /// Creates a link and the opposite ends for the pump (or a test) to hold.
    pub fn pair(capacity: usize) -> (Self, mpsc::Receiver<LinkCommand>, mpsc::Sender<TransportEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(capacity);
        let (evt_tx, evt_rx) = mpsc::channel(capacity);
        (
            Self {
                commands: cmd_tx,
                events: evt_rx,
            },
            cmd_rx,
            evt_tx,
        )
    }
}

/// Result of one upgrade attempt.
///
/// `status` is `101` when the protocol switched; `link` is present only then.
/// `challenge` carries the `WWW-Authenticate` value whenever the gateway sent
/// one, on a 101 or on a 401.
#[derive(Debug)]
pub struct UpgradeResponse {
    pub status: u16,
    pub challenge: Option<String>,
    pub link: Option<TransportLink>,
}

impl UpgradeResponse {
    pub const SWITCHING_PROTOCOLS: u16 = 101;
    pub const UNAUTHORIZED: u16 = 401;

    /// An accepted upgrade with no challenge.
    pub fn open(link: TransportLink) -> Self {
        Self {
            status: Self::SWITCHING_PROTOCOLS,
            challenge: None,
            link: Some(link),
        }
    }

    /// A 401 carrying a digest challenge.
    pub fn challenged(challenge: impl Into<String>) -> Self {
        Self {
            status: Self::UNAUTHORIZED,
            challenge: Some(challenge.into()),
            link: None,
        }
    }

    /// A rejection with no challenge (e.g. 401 after a bad credential).
    pub fn rejected(status: u16) -> Self {
        Self {
            status,
            challenge: None,
            link: None,
        }
    }

    pub fn is_switched(&self) -> bool {
        self.status == Self::SWITCHING_PROTOCOLS && self.link.is_some()
    }
}

/// Performs WebSocket upgrades against the gateway.
///
/// Infrastructure implements this with tokio-tungstenite over rustls; tests
/// use the in-memory `MockConnector` or a `mockall` mock.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    /// Attempts one upgrade.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError`] only when no HTTP response was obtained at all
    /// (DNS, TCP, TLS failure).  HTTP-level refusals are reported through
    /// [`UpgradeResponse::status`].
    async fn upgrade(&self, request: &UpgradeRequest) -> Result<UpgradeResponse, ConnectError>;
}

/// Destination for encoded request frames.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send_frame(&self, frame: Vec<u8>) -> Result<(), SendError>;
}

// ── Transport handle ──────────────────────────────────────────────────────────

/// The one live connection of a client.
///
/// A new `Transport` (with a new `generation`) is created on every reconnect;
/// the old one is closed and dropped, never reused.
#[derive(Debug)]
pub struct Transport {
    generation: u64,
    commands: mpsc::Sender<LinkCommand>,
    open: AtomicBool,
}

impl Transport {
    pub fn new(generation: u64, commands: mpsc::Sender<LinkCommand>) -> Self {
        Self {
            generation,
            commands,
            open: AtomicBool::new(true),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns `true` until the link closes or [`Transport::close`] is called.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.commands.is_closed()
    }

    /// Records that the pump reported the socket closed.
    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Queues one frame for sending.
    ///
    /// # Errors
    ///
    /// [`SendError::NotReady`] if the transport is closed,
    /// [`SendError::Closed`] if the pump went away while queuing.
    pub async fn send(&self, frame: Vec<u8>) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::NotReady);
        }
        self.commands
            .send(LinkCommand::Send(frame))
            .await
            .map_err(|_| {
                self.mark_closed();
                SendError::Closed
            })
    }

    /// Closes the link.  Safe to call any number of times from any state.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            debug!("closing transport generation {}", self.generation);
            // A full queue or a finished pump both mean nothing more to do.
            let _ = self.commands.try_send(LinkCommand::Close);
        }
    }
}

#[async_trait]
impl FrameSink for Transport {
    async fn send_frame(&self, frame: Vec<u8>) -> Result<(), SendError> {
        self.send(frame).await
    }
}
