//! Opening handshake with optional digest authentication.
//!
//! # The two-attempt handshake (for beginners)
//!
//! ```text
//! attempt 1: GET /mediation/client?mac=..  (no Authorization)
//!     ├── 101, no WWW-Authenticate  → AuthMode::Open, keep the socket
//!     └── 101 or 401 with WWW-Authenticate
//!             │  parse nonce, compute RFC 2617 digest over GET + path
//!             ▼
//! attempt 2: GET /mediation/client?mac=..  Authorization: Digest ...
//!     ├── 101  → AuthMode::Secured, keep the socket
//!     └── 401  → AuthError::Rejected (not retried)
//! ```
//!
//! Each attempt builds a fresh [`UpgradeRequest`] so it carries a new
//! `Sec-WebSocket-Key`.  The challenge is never cached: every reconnect runs
//! the full sequence again with nonce-count 1.

use std::sync::Arc;

use tracing::{debug, info, warn};
use tydom_core::auth::upgrade::UPGRADE_METHOD;
use tydom_core::{compute_digest, generate_cnonce, AuthChallenge, UpgradeRequest};

use crate::application::transport::{Connector, LinkCommand, TransportLink, UpgradeResponse};
use crate::domain::{AuthError, AuthMode, ConnectError, HandshakeError};

/// Login material for one handshake.
///
/// The login is always the gateway serial.  A missing password is sent as the
/// empty string if the gateway nevertheless issues a challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub serial: String,
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(serial: impl Into<String>, password: Option<String>) -> Self {
        Self {
            serial: serial.into(),
            password,
        }
    }
}

/// A completed handshake: the detected auth mode plus the open link.
#[derive(Debug)]
pub struct Handshake {
    pub mode: AuthMode,
    pub link: TransportLink,
}

/// Runs the handshake against one gateway address.
pub struct AuthNegotiator {
    connector: Arc<dyn Connector>,
    host: String,
    port: u16,
}

impl AuthNegotiator {
    pub fn new(connector: Arc<dyn Connector>, host: impl Into<String>, port: u16) -> Self {
        Self {
            connector,
            host: host.into(),
            port,
        }
    }

    /// Performs the handshake.
    ///
    /// `on_challenge` runs once, right before the authenticated attempt, so
    /// the caller can publish the `Authenticating` state.
    ///
    /// # Errors
    ///
    /// - [`ConnectError`] if either attempt fails below HTTP or ends with an
    ///   unexpected status.
    /// - [`AuthError::Challenge`] if the challenge header cannot be parsed.
    /// - [`AuthError::Rejected`] if the credential is refused.
    pub async fn negotiate(
        &self,
        credentials: &Credentials,
        on_challenge: impl FnOnce() + Send,
    ) -> Result<Handshake, HandshakeError> {
        let request = UpgradeRequest::new(&self.host, self.port, &credentials.serial);
        debug!("upgrade attempt to {}", request.url);
        let first = self.connector.upgrade(&request).await?;

        let header = match first.challenge {
            None => {
                return match first.link {
                    Some(link) if first.status == UpgradeResponse::SWITCHING_PROTOCOLS => {
                        info!("gateway {} accepted upgrade without authentication", self.host);
                        Ok(Handshake {
                            mode: AuthMode::Open,
                            link,
                        })
                    }
                    _ => Err(ConnectError::UnexpectedStatus {
                        status: first.status,
                    }
                    .into()),
                };
            }
            Some(header) => header,
        };

        // A challenged 101 still opened a socket; it is replaced by the
        // authenticated one.
        if let Some(link) = first.link {
            let _ = link.commands.try_send(LinkCommand::Close);
        }

        let challenge = AuthChallenge::parse(&header).map_err(AuthError::from)?;
        on_challenge();

        let credential = compute_digest(
            &challenge,
            &credentials.serial,
            credentials.password.as_deref().unwrap_or(""),
            UPGRADE_METHOD,
            &request.path,
            &generate_cnonce(),
        );
        let authed = UpgradeRequest::new(&self.host, self.port, &credentials.serial)
            .with_authorization(credential);
        debug!("authenticated upgrade attempt to {}", authed.url);
        let second = self.connector.upgrade(&authed).await?;

        match second.link {
            Some(link) if second.status == UpgradeResponse::SWITCHING_PROTOCOLS => {
                info!("gateway {} accepted digest credential", self.host);
                Ok(Handshake {
                    mode: AuthMode::Secured,
                    link,
                })
            }
            _ if second.status == UpgradeResponse::UNAUTHORIZED => {
                warn!("gateway {} rejected digest credential", self.host);
                Err(AuthError::Rejected {
                    status: second.status,
                }
                .into())
            }
            _ => Err(ConnectError::UnexpectedStatus {
                status: second.status,
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::transport::MockConnector;
    use mockall::Sequence;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const CHALLENGE: &str =
        r#"Digest realm="protected area", qop="auth", nonce="a1b2c3d4e5f6", opaque="x""#;

    fn open_response() -> UpgradeResponse {
        let (link, _commands, _events) = TransportLink::pair(4);
        UpgradeResponse::open(link)
    }

    fn credentials() -> Credentials {
        Credentials::new("001A25ABCDEF", Some("secret".to_string()))
    }

    #[tokio::test]
    async fn test_unchallenged_upgrade_is_open_mode() {
        // Arrange
        let mut connector = MockConnector::new();
        connector
            .expect_upgrade()
            .times(1)
            .withf(|req| req.authorization().is_none())
            .returning(|_| Ok(open_response()));
        let negotiator = AuthNegotiator::new(Arc::new(connector), "192.168.1.20", 443);

        // Act
        let handshake = negotiator.negotiate(&credentials(), || {}).await.unwrap();

        // Assert
        assert_eq!(handshake.mode, AuthMode::Open);
    }

    #[tokio::test]
    async fn test_challenge_triggers_digest_retry() {
        // Arrange
        let mut connector = MockConnector::new();
        let mut seq = Sequence::new();
        connector
            .expect_upgrade()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|req| req.authorization().is_none())
            .returning(|_| Ok(UpgradeResponse::challenged(CHALLENGE)));
        connector
            .expect_upgrade()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|req| {
                req.authorization().map_or(false, |auth| {
                    auth.starts_with(r#"Digest username="001A25ABCDEF", realm="protected area", nonce="a1b2c3d4e5f6""#)
                        && auth.contains(r#"uri="/mediation/client?mac=001A25ABCDEF&appli=1""#)
                        && auth.contains("nc=00000001")
                })
            })
            .returning(|_| Ok(open_response()));
        let negotiator = AuthNegotiator::new(Arc::new(connector), "192.168.1.20", 443);
        let challenged = AtomicUsize::new(0);

        // Act
        let handshake = negotiator
            .negotiate(&credentials(), || {
                challenged.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();

        // Assert
        assert_eq!(handshake.mode, AuthMode::Secured);
        assert_eq!(challenged.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_challenged_101_link_is_closed_before_retry() {
        // Arrange – the gateway switched protocols but still sent a challenge
        let (first_link, mut first_commands, _first_events) = TransportLink::pair(4);
        let mut first = Some(UpgradeResponse {
            status: 101,
            challenge: Some(CHALLENGE.to_string()),
            link: Some(first_link),
        });
        let mut connector = MockConnector::new();
        connector
            .expect_upgrade()
            .times(2)
            .returning(move |_| Ok(first.take().unwrap_or_else(open_response)));
        let negotiator = AuthNegotiator::new(Arc::new(connector), "h", 443);

        // Act
        let handshake = negotiator.negotiate(&credentials(), || {}).await.unwrap();

        // Assert
        assert_eq!(handshake.mode, AuthMode::Secured);
        assert_eq!(first_commands.recv().await, Some(LinkCommand::Close));
    }

    #[tokio::test]
    async fn test_rejected_credential_is_auth_error() {
        let mut connector = MockConnector::new();
        let mut seq = Sequence::new();
        connector
            .expect_upgrade()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(UpgradeResponse::challenged(CHALLENGE)));
        connector
            .expect_upgrade()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(UpgradeResponse::rejected(401)));
        let negotiator = AuthNegotiator::new(Arc::new(connector), "h", 443);

        let result = negotiator.negotiate(&credentials(), || {}).await;

        assert!(matches!(
            result,
            Err(HandshakeError::Auth(AuthError::Rejected { status: 401 }))
        ));
    }

    #[tokio::test]
    async fn test_unexpected_status_is_connect_error() {
        let mut connector = MockConnector::new();
        connector
            .expect_upgrade()
            .times(1)
            .returning(|_| Ok(UpgradeResponse::rejected(404)));
        let negotiator = AuthNegotiator::new(Arc::new(connector), "h", 443);

        let result = negotiator.negotiate(&credentials(), || {}).await;

        assert!(matches!(
            result,
            Err(HandshakeError::Connect(ConnectError::UnexpectedStatus { status: 404 }))
        ));
    }

    #[tokio::test]
    async fn test_unparseable_challenge_is_auth_error() {
        let mut connector = MockConnector::new();
        connector
            .expect_upgrade()
            .times(1)
            .returning(|_| Ok(UpgradeResponse::challenged("Basic")));
        let negotiator = AuthNegotiator::new(Arc::new(connector), "h", 443);

        let result = negotiator.negotiate(&credentials(), || {}).await;

        assert!(matches!(result, Err(HandshakeError::Auth(AuthError::Challenge(_)))));
    }

    #[tokio::test]
    async fn test_transport_failure_is_connect_error() {
        let mut connector = MockConnector::new();
        connector
            .expect_upgrade()
            .times(1)
            .returning(|_| Err(ConnectError::Transport("connection refused".to_string())));
        let negotiator = AuthNegotiator::new(Arc::new(connector), "h", 443);

        let result = negotiator.negotiate(&credentials(), || {}).await;

        assert!(matches!(
            result,
            Err(HandshakeError::Connect(ConnectError::Transport(_)))
        ));
    }
}
