//! RFC 2617 digest authentication.
//!
//! # How digest authentication works (for beginners)
//!
//! The password is never sent over the wire.  Instead the gateway hands out a
//! random *nonce* in its `WWW-Authenticate` header and the client proves it
//! knows the password by hashing it together with that nonce:
//!
//! ```text
//! HA1      = MD5(login ":" realm ":" password)
//! HA2      = MD5(method ":" uri)
//! response = MD5(HA1 ":" nonce ":" nc ":" cnonce ":" qop ":" HA2)
//! ```
//!
//! `nc` (nonce count) is always `00000001` because the whole handshake is
//! replayed on every reconnect with a fresh nonce, and `cnonce` is a random
//! value chosen by the client.
//!
//! MD5 is mandated by the protocol; it is not used for collision resistance.

use md5::{Digest, Md5};
use rand::RngCore;
use thiserror::Error;

/// Realm used by the gateway on the local network.
pub const LOCAL_REALM: &str = "protected area";

/// Realm used when the gateway is reached through the vendor's relay.
pub const REMOTE_REALM: &str = "ServiceMedia";

/// Quality of protection requested by the gateway.
pub const QOP_AUTH: &str = "auth";

/// Errors raised while reading a `WWW-Authenticate` header.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthChallengeError {
    /// Neither a `nonce` directive nor a quoted third directive was found.
    #[error("challenge header carries no nonce: {0:?}")]
    MissingNonce(String),
}

/// Parameters extracted from the gateway's challenge.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthChallenge {
    pub nonce: String,
    pub realm: String,
    pub qop: String,
    pub nonce_count: u32,
}

impl AuthChallenge {
    /// Parses a `WWW-Authenticate` header value.
    ///
    /// Realm and qop are fixed to the local-access values regardless of what
    /// the header announces; the nonce comes from the `nonce` directive, or
    /// from the quoted value of the third directive when no directive is
    /// named `nonce`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthChallengeError::MissingNonce`] when no nonce can be found.
    pub fn parse(header: &str) -> Result<Self, AuthChallengeError> {
        let directives: Vec<&str> = header.splitn(4, ',').collect();

        let named = header
            .split(',')
            .filter_map(|directive| directive.trim().split_once('='))
            .find(|(key, _)| key.trim().trim_start_matches("Digest").trim() == "nonce")
            .map(|(_, value)| value.trim().trim_matches('"').to_string());

        let positional = directives
            .get(2)
            .and_then(|directive| directive.split_once('='))
            .and_then(|(_, value)| value.split('"').nth(1))
            .map(str::to_string);

        let nonce = named
            .or(positional)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| AuthChallengeError::MissingNonce(header.to_string()))?;

        Ok(Self {
            nonce,
            realm: LOCAL_REALM.to_string(),
            qop: QOP_AUTH.to_string(),
            nonce_count: 1,
        })
    }

    /// Replaces the realm (e.g. [`REMOTE_REALM`] for relayed access).
    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }
}

/// Computes the `Authorization` header value for `challenge`.
///
/// The output is fully determined by its inputs; pass a random `cnonce`
/// from [`generate_cnonce`] in production.
///
/// # Examples
///
/// ```rust
/// use tydom_core::{compute_digest, AuthChallenge};
///
/// let challenge = AuthChallenge::parse(r#"Digest realm="x", qop="auth", nonce="abc""#).unwrap();
/// let header = compute_digest(&challenge, "001A25", "pw", "GET", "/mediation/client?mac=001A25&appli=1", "0a4f113b");
/// assert!(header.starts_with(r#"Digest username="001A25", realm="protected area", nonce="abc""#));
/// ```
pub fn compute_digest(
    challenge: &AuthChallenge,
    login: &str,
    password: &str,
    method: &str,
    uri: &str,
    cnonce: &str,
) -> String {
    let nc = format!("{:08x}", challenge.nonce_count);
    let response = digest_response(challenge, login, password, method, uri, cnonce, &nc);
    format!(
        "Digest username=\"{login}\", realm=\"{realm}\", nonce=\"{nonce}\", uri=\"{uri}\", \
         response=\"{response}\", qop=\"{qop}\", nc={nc}, cnonce=\"{cnonce}\"",
        realm = challenge.realm,
        nonce = challenge.nonce,
        qop = challenge.qop,
    )
}

/// Returns 16 random hex characters for use as the client nonce.
pub fn generate_cnonce() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn digest_response(
    challenge: &AuthChallenge,
    login: &str,
    password: &str,
    method: &str,
    uri: &str,
    cnonce: &str,
    nc: &str,
) -> String {
    let ha1 = md5_hex(&format!("{login}:{}:{password}", challenge.realm));
    let ha2 = md5_hex(&format!("{method}:{uri}"));
    md5_hex(&format!(
        "{ha1}:{}:{nc}:{cnonce}:{}:{ha2}",
        challenge.nonce, challenge.qop
    ))
}

fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}
