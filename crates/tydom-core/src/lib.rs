//! # tydom-core
//!
//! Shared library for the Tydom gateway client containing the frame codec,
//! transaction identifiers, typed request builders, push-event decoding and
//! the digest authentication primitives.
//!
//! This crate has zero dependencies on sockets, TLS or async runtimes.  The
//! `tydom-client` crate layers the connection, correlation and supervision
//! logic on top of it.
//!
//! # Architecture overview (for beginners)
//!
//! The gateway speaks an HTTP-like protocol, but instead of opening one TCP
//! connection per request, every request and response travels as a *frame*
//! over a single long-lived WebSocket.  Responses come back asynchronously
//! and are matched to their requests by a `Transac-Id` header.  The gateway
//! also pushes unsolicited frames when device state changes.
//!
//! - **`protocol`** – How bytes travel over the socket.  Requests are encoded
//!   into HTTP/1.1-looking text frames and inbound frames are decoded into a
//!   start line, headers, an optional transaction id and a body.
//!
//! - **`auth`** – The opening WebSocket upgrade request and the RFC 2617
//!   digest credential the gateway demands when a password is configured.

pub mod auth;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `tydom_core::TransactionId` instead of the full module path.
pub use auth::digest::{compute_digest, generate_cnonce, AuthChallenge, AuthChallengeError};
pub use auth::upgrade::{mediation_path, UpgradeRequest};
pub use protocol::event::StateEvent;
pub use protocol::frame::{
    decode_frame, encode_request, Body, ParseError, ParsedFrame, Response, StartLine,
};
pub use protocol::request::{Method, Request};
pub use protocol::transaction::{
    SubscriptionId, TransactionId, TransactionIdGenerator, REQUEST_ID_FLOOR,
};
