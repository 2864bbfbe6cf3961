//! Connection lifecycle and authentication mode.
//!
//! # Connection state machine (for beginners)
//!
//! ```text
//!   Disconnected ──start──► Connecting ──challenge──► Authenticating
//!        ▲                      │                          │
//!        │                      └──────── upgrade ok ──────┤
//!        │                                                 ▼
//!     (cooldown) ◄──────── Failed ◄──── close/error ───── Ready
//!
//!   Authenticating ──credential rejected──► Unauthorized
//!   Unauthorized ──authorize()/start()──► Disconnected
//!   any state ──stop──► Stopped   (terminal)
//! ```
//!
//! The supervisor task owns every transition except two.  `Stopped` is set
//! by `TydomClient::stop` and never left again.  `Unauthorized` is only left
//! when the caller supplies credentials again; the supervisor never retries
//! a rejected password on its own.

use std::fmt;

/// Current state of the gateway connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No transport and no attempt in progress.
    Disconnected,
    /// Unauthenticated upgrade attempt in progress.
    Connecting,
    /// Digest challenge received; authenticated attempt in progress.
    Authenticating,
    /// Upgrade complete; requests may be sent.
    Ready,
    /// The last connection attempt failed or the transport closed.
    Failed,
    /// The gateway rejected the stored credential.  No reconnect happens
    /// until `authorize` succeeds or `start` is called again.
    Unauthorized,
    /// `stop()` was called.  Terminal.
    Stopped,
}

impl ConnectionState {
    /// Returns `true` only in [`ConnectionState::Ready`].
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Returns `true` when only new credentials can make progress.
    pub fn needs_credentials(self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Unauthorized => "unauthorized",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Whether the gateway demanded digest authentication on the last handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMode {
    /// No handshake has completed yet.
    Unknown,
    /// The gateway accepted the unauthenticated upgrade.
    Open,
    /// The gateway issued a digest challenge that was answered.
    Secured,
}

impl AuthMode {
    /// Human-readable label used by the CLI and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Open => "open",
            Self::Secured => "secured",
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How `TydomClient::start` behaves with respect to the first connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartMode {
    /// Connect inline and return the handshake result to the caller; the
    /// supervisor then keeps the connection alive.
    Blocking,
    /// Return immediately; the supervisor performs the first connection.
    #[default]
    Background,
}
