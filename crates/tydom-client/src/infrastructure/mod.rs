//! Infrastructure layer for tydom-client.
//!
//! # Responsibilities
//!
//! - Opening the TLS WebSocket to the gateway (`websocket`)
//! - Building the rustls configuration that trusts the gateway's self-signed
//!   certificate (`tls`)
//! - An in-memory gateway for tests (`mock`)
//!
//! # What does NOT belong here?
//!
//! - Handshake, correlation and reconnect logic (application layer)
//! - Configuration and error types (domain layer)

pub mod mock;
pub mod tls;
pub mod websocket;

pub use mock::{MockConnector, MockOutcome};
pub use websocket::WebSocketConnector;
