//! Opening handshake primitives.
//!
//! - **`upgrade`** – the WebSocket upgrade request sent to the mediation
//!   endpoint, including the random `Sec-WebSocket-Key`.
//! - **`digest`** – parsing of the `WWW-Authenticate` challenge and the
//!   RFC 2617 digest credential sent back in `Authorization`.

pub mod digest;
pub mod upgrade;

pub use digest::{compute_digest, generate_cnonce, AuthChallenge, AuthChallengeError};
pub use upgrade::{mediation_path, UpgradeRequest};
