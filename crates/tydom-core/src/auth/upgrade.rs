//! The WebSocket upgrade request sent to the mediation endpoint.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;

/// Fixed path through which all gateway traffic is multiplexed.
pub const MEDIATION_ENDPOINT: &str = "/mediation/client";

/// Response header carrying the digest challenge.
pub const AUTHENTICATE_HEADER: &str = "WWW-Authenticate";

/// Request header carrying the digest credential.
pub const AUTHORIZATION_HEADER: &str = "Authorization";

/// HTTP method the upgrade (and therefore the digest) uses.
pub const UPGRADE_METHOD: &str = "GET";

/// Returns the mediation path (with query) for a gateway serial.
///
/// ```rust
/// assert_eq!(
///     tydom_core::mediation_path("001A25ABCDEF"),
///     "/mediation/client?mac=001A25ABCDEF&appli=1"
/// );
/// ```
pub fn mediation_path(serial: &str) -> String {
    format!("{MEDIATION_ENDPOINT}?mac={serial}&appli=1")
}

/// Returns a fresh `Sec-WebSocket-Key`: 16 random bytes, base64 encoded.
pub fn generate_websocket_key() -> String {
    let mut key = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut key);
    STANDARD.encode(key)
}

/// A fully described upgrade request: target URL, path and headers.
///
/// Built fresh for every connection attempt so each attempt carries a new
/// `Sec-WebSocket-Key`.
#[derive(Debug, Clone, PartialEq)]
pub struct UpgradeRequest {
    /// `wss://<host>:<port>/mediation/client?mac=<serial>&appli=1`
    pub url: String,
    /// Path plus query; this is the digest URI.
    pub path: String,
    /// Header name/value pairs in send order.
    pub headers: Vec<(String, String)>,
}

impl UpgradeRequest {
    /// Builds the unauthenticated upgrade request.
    pub fn new(host: &str, port: u16, serial: &str) -> Self {
        let path = mediation_path(serial);
        let headers = vec![
            ("Host".to_string(), format!("{host}:{port}")),
            ("Connection".to_string(), "Upgrade".to_string()),
            ("Upgrade".to_string(), "websocket".to_string()),
            ("Accept".to_string(), "*/*".to_string()),
            ("Sec-WebSocket-Key".to_string(), generate_websocket_key()),
            ("Sec-WebSocket-Version".to_string(), "13".to_string()),
        ];
        Self {
            url: format!("wss://{host}:{port}{path}"),
            path,
            headers,
        }
    }

    /// Adds (or replaces) the `Authorization` header.
    pub fn with_authorization(mut self, credential: impl Into<String>) -> Self {
        self.headers
            .retain(|(name, _)| !name.eq_ignore_ascii_case(AUTHORIZATION_HEADER));
        self.headers
            .push((AUTHORIZATION_HEADER.to_string(), credential.into()));
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn authorization(&self) -> Option<&str> {
        self.header(AUTHORIZATION_HEADER)
    }
}
