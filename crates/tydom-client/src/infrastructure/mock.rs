//! In-memory gateway for tests and offline experiments.
//!
//! # Why a mock connector?
//!
//! The real [`WebSocketConnector`](super::websocket::WebSocketConnector)
//! needs a gateway on the network.  `MockConnector` plays the gateway inside
//! the process:
//!
//! - It answers upgrades as an *open* gateway, or as a *secured* one that
//!   issues a digest challenge and checks the returned credential against a
//!   password.
//! - It answers request frames with canned bodies registered through
//!   [`MockConnector::respond_to`], echoing the `Transac-Id`.
//! - It can push frames, drop the live connection, or refuse upgrades, so
//!   reconnect and subscription paths can be exercised.
//!
//! Every upgrade request and every frame sent is recorded for assertions.
//!
//! # Usage in tests
//!
//! ```ignore
//! let gateway = Arc::new(MockConnector::secured("secret"));
//! gateway.respond_to(Method::Get, "/info", json!({"mac": "001A25ABCDEF"}));
//! let client = TydomClient::with_connector(config, gateway.clone())?;
//! client.start(StartMode::Blocking).await?;
//! assert_eq!(gateway.upgrade_count(), 2);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tydom_core::auth::upgrade::UPGRADE_METHOD;
use tydom_core::{
    compute_digest, decode_frame, AuthChallenge, Method, StartLine, TransactionId, UpgradeRequest,
};

use crate::application::transport::{
    Connector, LinkCommand, TransportEvent, TransportLink, UpgradeResponse,
};
use crate::domain::ConnectError;

/// Challenge the secured mock issues.
pub const MOCK_CHALLENGE: &str =
    r#"Digest realm="protected area", qop="auth", nonce="5f2b1c9d0e8a7b6c", opaque="tydom""#;

/// Scripted result of one upgrade attempt, taking precedence over the
/// gateway's normal behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOutcome {
    /// Refuse with this HTTP status and no challenge.
    Reject(u16),
    /// Fail below HTTP (connection refused, TLS error, ...).
    Fail(String),
}

#[derive(Default)]
struct MockState {
    password: Option<String>,
    script: VecDeque<MockOutcome>,
    responses: HashMap<(Method, String), (u16, Value)>,
    reorder: bool,
    upgrades: Vec<UpgradeRequest>,
    frames: Vec<Vec<u8>>,
    live: Option<mpsc::Sender<TransportEvent>>,
}

/// In-memory stand-in for a Tydom gateway.
#[derive(Clone)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    /// A gateway with authentication disabled.
    pub fn open() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// A gateway that demands a digest credential for `password`.
    pub fn secured(password: impl Into<String>) -> Self {
        let connector = Self::open();
        connector.lock().password = Some(password.into());
        connector
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("lock poisoned")
    }

    /// Answers `method path` requests with `200 OK` and `body`.
    pub fn respond_to(&self, method: Method, path: impl Into<String>, body: Value) {
        self.respond_with_status(method, path, 200, body);
    }

    /// Answers `method path` requests with `status` and `body`.
    pub fn respond_with_status(
        &self,
        method: Method,
        path: impl Into<String>,
        status: u16,
        body: Value,
    ) {
        self.lock()
            .responses
            .insert((method, path.into()), (status, body));
    }

    /// Answers each request after a small delay derived from its transaction
    /// id, so responses to concurrent requests arrive out of order.
    pub fn reorder_responses(&self) {
        self.lock().reorder = true;
    }

    /// Queues an outcome for the next upgrade attempt.
    pub fn script(&self, outcome: MockOutcome) {
        self.lock().script.push_back(outcome);
    }

    /// Every upgrade request received, in order.
    pub fn upgrades(&self) -> Vec<UpgradeRequest> {
        self.lock().upgrades.clone()
    }

    pub fn upgrade_count(&self) -> usize {
        self.lock().upgrades.len()
    }

    /// Upgrade requests that carried an `Authorization` header.
    pub fn authorized_upgrade_count(&self) -> usize {
        self.lock()
            .upgrades
            .iter()
            .filter(|req| req.authorization().is_some())
            .count()
    }

    /// Every request frame received, in order.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.lock().frames.clone()
    }

    /// Pushes a raw frame to the client on the live connection.
    ///
    /// Returns `false` when no connection is live.
    pub async fn push_frame(&self, raw: &str) -> bool {
        let live = self.lock().live.clone();
        match live {
            Some(events) => events
                .send(TransportEvent::MessageReceived(raw.as_bytes().to_vec()))
                .await
                .is_ok(),
            None => false,
        }
    }

    /// Simulates an abnormal close (code 1006) of the live connection.
    pub async fn drop_connection(&self) -> bool {
        let live = self.lock().live.take();
        match live {
            Some(events) => events
                .send(TransportEvent::Closed {
                    code: Some(1006),
                    reason: "connection reset".to_string(),
                })
                .await
                .is_ok(),
            None => false,
        }
    }

    fn accept(&self) -> TransportLink {
        let (link, commands, events) = TransportLink::pair(64);
        self.lock().live = Some(events.clone());
        tokio::spawn(serve(self.clone(), commands, events));
        link
    }

    fn answer(&self, frame: &[u8]) -> Option<(TransactionId, Vec<u8>, bool)> {
        let mut state = self.lock();
        state.frames.push(frame.to_vec());
        let parsed = decode_frame(frame).ok()?;
        let id = parsed.transaction_id?;
        let StartLine::Request { method, path } = parsed.start_line else {
            return None;
        };
        let (status, body) = state.responses.get(&(method, path.clone()))?;
        let payload = body.to_string();
        let reason = match status {
            200..=299 => "OK",
            401 => "Unauthorized",
            403 => "Forbidden",
            _ => "Error",
        };
        let reply = format!(
            "HTTP/1.1 {status} {reason}\r\nServer: Tydom-mock\r\nUri-Origin: {path}\r\n\
             Content-Type: application/json\r\nContent-Length: {}\r\nTransac-Id: {id}\r\n\r\n{payload}",
            payload.len()
        );
        Some((id, reply.into_bytes(), state.reorder))
    }

    fn credential_valid(&self, credential: &str, password: &str) -> bool {
        let (Some(login), Some(uri), Some(cnonce)) = (
            directive(credential, "username"),
            directive(credential, "uri"),
            directive(credential, "cnonce"),
        ) else {
            return false;
        };
        let Ok(challenge) = AuthChallenge::parse(MOCK_CHALLENGE) else {
            return false;
        };
        compute_digest(&challenge, &login, password, UPGRADE_METHOD, &uri, &cnonce) == credential
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn upgrade(&self, request: &UpgradeRequest) -> Result<UpgradeResponse, ConnectError> {
        let (scripted, password) = {
            let mut state = self.lock();
            state.upgrades.push(request.clone());
            (state.script.pop_front(), state.password.clone())
        };

        match scripted {
            Some(MockOutcome::Reject(status)) => return Ok(UpgradeResponse::rejected(status)),
            Some(MockOutcome::Fail(reason)) => return Err(ConnectError::Transport(reason)),
            None => {}
        }

        let Some(password) = password else {
            return Ok(UpgradeResponse::open(self.accept()));
        };
        match request.authorization() {
            None => Ok(UpgradeResponse::challenged(MOCK_CHALLENGE)),
            Some(credential) if self.credential_valid(credential, &password) => {
                Ok(UpgradeResponse::open(self.accept()))
            }
            Some(_) => Ok(UpgradeResponse::rejected(UpgradeResponse::UNAUTHORIZED)),
        }
    }
}

/// Gateway side of one link.
async fn serve(
    gateway: MockConnector,
    mut commands: mpsc::Receiver<LinkCommand>,
    events: mpsc::Sender<TransportEvent>,
) {
    let _ = events.send(TransportEvent::Opened).await;
    while let Some(command) = commands.recv().await {
        match command {
            LinkCommand::Send(frame) => {
                let Some((id, reply, reorder)) = gateway.answer(&frame) else {
                    continue;
                };
                if reorder {
                    let events = events.clone();
                    let delay = Duration::from_millis(id.value() % 5 + 1);
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = events.send(TransportEvent::MessageReceived(reply)).await;
                    });
                } else {
                    let _ = events.send(TransportEvent::MessageReceived(reply)).await;
                }
            }
            LinkCommand::Close => {
                let _ = events
                    .send(TransportEvent::Closed {
                        code: Some(1000),
                        reason: "closed by client".to_string(),
                    })
                    .await;
                break;
            }
        }
    }
}

/// Extracts `name="value"` (or `name=value`) from a digest header.
fn directive(header: &str, name: &str) -> Option<String> {
    header
        .trim_start_matches("Digest")
        .split(", ")
        .filter_map(|part| part.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tydom_core::generate_cnonce;

    fn authorized_request(password: &str) -> UpgradeRequest {
        let request = UpgradeRequest::new("mock", 443, "001A25ABCDEF");
        let challenge = AuthChallenge::parse(MOCK_CHALLENGE).unwrap();
        let credential = compute_digest(
            &challenge,
            "001A25ABCDEF",
            password,
            UPGRADE_METHOD,
            &request.path,
            &generate_cnonce(),
        );
        request.with_authorization(credential)
    }

    #[tokio::test]
    async fn test_open_gateway_accepts_first_upgrade() {
        let gateway = MockConnector::open();

        let response = gateway
            .upgrade(&UpgradeRequest::new("mock", 443, "s"))
            .await
            .unwrap();

        assert!(response.is_switched());
        assert_eq!(response.challenge, None);
    }

    #[tokio::test]
    async fn test_secured_gateway_challenges_then_verifies_digest() {
        // Arrange
        let gateway = MockConnector::secured("secret");

        // Act
        let first = gateway
            .upgrade(&UpgradeRequest::new("mock", 443, "001A25ABCDEF"))
            .await
            .unwrap();
        let good = gateway.upgrade(&authorized_request("secret")).await.unwrap();
        let bad = gateway.upgrade(&authorized_request("wrong")).await.unwrap();

        // Assert
        assert_eq!(first.status, 401);
        assert_eq!(first.challenge.as_deref(), Some(MOCK_CHALLENGE));
        assert!(good.is_switched());
        assert_eq!(bad.status, 401);
        assert_eq!(bad.challenge, None);
        assert_eq!(gateway.authorized_upgrade_count(), 2);
    }

    #[tokio::test]
    async fn test_scripted_outcome_takes_precedence() {
        let gateway = MockConnector::open();
        gateway.script(MockOutcome::Fail("refused".to_string()));

        let result = gateway.upgrade(&UpgradeRequest::new("mock", 443, "s")).await;

        assert!(matches!(result, Err(ConnectError::Transport(_))));
        assert_eq!(gateway.upgrade_count(), 1);
    }

    #[test]
    fn test_directive_extraction() {
        let header = r#"Digest username="001A25", uri="/mediation/client?mac=001A25&appli=1", nc=00000001, cnonce="ab""#;
        assert_eq!(directive(header, "username").as_deref(), Some("001A25"));
        assert_eq!(
            directive(header, "uri").as_deref(),
            Some("/mediation/client?mac=001A25&appli=1")
        );
        assert_eq!(directive(header, "nc").as_deref(), Some("00000001"));
        assert_eq!(directive(header, "missing"), None);
    }
}
