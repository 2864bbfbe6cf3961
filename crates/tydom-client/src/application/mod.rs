//! Application layer: the client's use cases.
//!
//! # What lives here?
//!
//! - **`transport`** – The `Connector` trait (one upgrade attempt) and the
//!   `Transport` handle wrapping a live link.  Implementations are injected
//!   from the infrastructure layer.
//!
//! - **`auth_negotiator`** – The open/secured handshake and digest retry.
//!
//! - **`correlator`** – Transaction ids, pending slots and result waiting.
//!
//! - **`router`** – Subscription table and the callback dispatcher.
//!
//! - **`supervisor`** – Health polling and reconnect with cooldown.
//!
//! - **`client`** – `TydomClient`, which wires all of the above together.
//!
//! Nothing in this layer imports `crate::infrastructure`.

pub mod auth_negotiator;
pub mod client;
pub mod correlator;
pub mod router;
pub mod supervisor;
pub mod transport;

pub use client::TydomClient;
pub use router::StateCallback;
pub use transport::{
    Connector, LinkCommand, TransportEvent, TransportLink, UpgradeResponse,
};
