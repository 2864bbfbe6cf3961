//! Error types surfaced by the client.
//!
//! Each failure kind gets its own `thiserror` enum so callers can match on
//! exactly what went wrong.  [`ClientError`] wraps them all for callers that
//! only want a single type.

use thiserror::Error;
use tydom_core::AuthChallengeError;

use super::config::ConfigError;

/// The WebSocket upgrade could not be completed.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// TCP connect, TLS handshake or WebSocket I/O failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The gateway answered the upgrade with a status other than 101 or 401.
    #[error("gateway answered upgrade with HTTP {status}")]
    UnexpectedStatus { status: u16 },

    /// The upgrade request could not be turned into an HTTP request.
    #[error("invalid upgrade request: {0}")]
    InvalidRequest(String),

    /// The connection attempt did not finish in time.
    #[error("connection attempt timed out")]
    Timeout,

    /// `stop()` was called while connecting.
    #[error("client stopped")]
    Stopped,
}

/// Digest authentication failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// The gateway rejected the digest credential.
    #[error("gateway rejected credentials (HTTP {status})")]
    Rejected { status: u16 },

    /// The challenge header could not be parsed.
    #[error("invalid digest challenge: {0}")]
    Challenge(#[from] AuthChallengeError),
}

/// Outcome of a full handshake (connect plus optional authentication).
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// A request frame could not be handed to the transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    /// No open transport (connecting, failed, or never started).
    #[error("connection not ready")]
    NotReady,

    /// The transport closed while the frame was being queued.
    #[error("connection closed")]
    Closed,
}

/// A subscription could not be registered.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouterError {
    /// The id lies in the request-id space and would capture responses.
    #[error("subscription id {0} collides with request transaction ids")]
    ReservedId(u64),
}

/// Umbrella error for callers that do not need to distinguish sources.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Send(#[from] SendError),

    #[error(transparent)]
    Router(#[from] RouterError),

    /// The operation needs a running client but `stop()` was called.
    #[error("client stopped")]
    Stopped,
}

impl From<ConnectError> for ClientError {
    fn from(err: ConnectError) -> Self {
        Self::Handshake(HandshakeError::Connect(err))
    }
}

impl From<AuthError> for ClientError {
    fn from(err: AuthError) -> Self {
        Self::Handshake(HandshakeError::Auth(err))
    }
}
