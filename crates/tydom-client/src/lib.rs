//! tydom-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/` and
//! the `tydom` binary share the same module tree.
//!
//! # What does tydom-client do? (for beginners)
//!
//! A Tydom gateway sits on the home LAN and controls shutters, lights,
//! thermostats and alarms.  It exposes one TLS WebSocket at
//! `/mediation/client`; every request, response and state push travels over
//! that socket as an HTTP-looking text frame.
//!
//! The client:
//!
//! 1. Opens the WebSocket and, if the gateway answers with a digest
//!    challenge, reconnects with an RFC 2617 credential.
//! 2. Sends request frames and matches responses to callers by `Transac-Id`.
//! 3. Hands unsolicited state pushes to registered callbacks.
//! 4. Reconnects after a cooldown whenever the socket drops, until stopped.
//!
//! # Architecture
//!
//! ```text
//! [tydom-client]
//!   ├── domain/           ClientConfig, ConnectionState, error enums
//!   ├── application/      TydomClient, handshake, correlator, router, supervisor
//!   └── infrastructure/   tokio-tungstenite + rustls connector, mock gateway
//! ```
//!
//! The `application` layer depends only on `domain` and `tydom-core`; the
//! connector is injected, so the whole client runs against the in-memory
//! [`infrastructure::MockConnector`] in tests.

/// Domain layer: configuration, state and errors (no I/O).
pub mod domain;

/// Application layer: the client and its use cases.
pub mod application;

/// Infrastructure layer: WebSocket transport and test doubles.
pub mod infrastructure;

pub use application::{StateCallback, TydomClient};
pub use domain::{
    AuthError, AuthMode, ClientConfig, ClientError, ConfigError, ConnectError, ConnectionState,
    HandshakeError, RouterError, SendError, StartMode,
};
pub use tydom_core::{Body, Method, Request, Response, StateEvent, SubscriptionId, TransactionId};
