//! Reconnect behaviour of `TydomClient` under a paused tokio clock.
//!
//! The clock only advances when every task is idle, so a 20 s cooldown runs
//! instantly while its ordering relative to the test's sleeps stays exact.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::sleep;
use tydom_client::infrastructure::{MockConnector, MockOutcome};
use tydom_client::{
    AuthError, AuthMode, Body, ClientConfig, ConnectionState, Method, StartMode, TydomClient,
};

const SERIAL: &str = "001A25ABCDEF";
const PASSWORD: &str = "secret";

fn client_with_password(gateway: &MockConnector, password: &str) -> TydomClient {
    let mut config = ClientConfig::new("mock-gateway", 443, SERIAL);
    config.gateway.password = Some(password.to_string());
    TydomClient::with_connector(config, Arc::new(gateway.clone())).expect("config must be valid")
}

fn secured_client(gateway: &MockConnector) -> TydomClient {
    client_with_password(gateway, PASSWORD)
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_after_cooldown_when_socket_drops() {
    // Arrange
    let gateway = MockConnector::secured(PASSWORD);
    let client = secured_client(&gateway);
    client.start(StartMode::Blocking).await.unwrap();
    assert_eq!(gateway.upgrade_count(), 2);

    // Act
    assert!(gateway.drop_connection().await);
    sleep(Duration::from_secs(19)).await;

    // Assert – still cooling down
    assert_eq!(gateway.upgrade_count(), 2);
    assert_eq!(client.state(), ConnectionState::Failed);

    sleep(Duration::from_secs(2)).await;

    // Assert – one full handshake (challenge + credential) after 20 s
    assert_eq!(gateway.upgrade_count(), 4);
    assert_eq!(gateway.authorized_upgrade_count(), 2);
    assert_eq!(client.state(), ConnectionState::Ready);
    assert_eq!(client.auth_mode(), AuthMode::Secured);
    client.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_requests_work_on_the_new_connection() {
    // Arrange
    let gateway = MockConnector::secured(PASSWORD);
    gateway.respond_to(Method::Get, "/ping", json!({"pong": true}));
    let client = secured_client(&gateway);
    client.start(StartMode::Blocking).await.unwrap();

    // Act
    gateway.drop_connection().await;
    assert!(client.wait_ready(Duration::from_secs(60)).await);
    let body = client.ping().await.unwrap();

    // Assert
    assert_eq!(body, Some(Body::Json(json!({"pong": true}))));
    client.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_cooldown_prevents_reconnect() {
    // Arrange
    let gateway = MockConnector::secured(PASSWORD);
    let client = secured_client(&gateway);
    client.start(StartMode::Blocking).await.unwrap();
    gateway.drop_connection().await;
    sleep(Duration::from_secs(5)).await;

    // Act
    client.stop().await;
    sleep(Duration::from_secs(60)).await;

    // Assert
    assert_eq!(gateway.upgrade_count(), 2);
    assert_eq!(client.state(), ConnectionState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_background_start_retries_until_gateway_answers() {
    // Arrange – the first two attempts fail below HTTP
    let gateway = MockConnector::secured(PASSWORD);
    gateway.script(MockOutcome::Fail("connection refused".to_string()));
    gateway.script(MockOutcome::Fail("connection refused".to_string()));
    let client = secured_client(&gateway);

    // Act
    client.start(StartMode::Background).await.unwrap();
    let ready = client.wait_ready(Duration::from_secs(120)).await;

    // Assert – two failures, then challenge + credential
    assert!(ready);
    assert_eq!(gateway.upgrade_count(), 4);
    assert_eq!(gateway.authorized_upgrade_count(), 1);
    client.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_rejected_upgrade_is_retried_after_cooldown() {
    // Arrange
    let gateway = MockConnector::open();
    gateway.script(MockOutcome::Reject(503));
    let client = TydomClient::with_connector(
        ClientConfig::new("mock-gateway", 443, SERIAL),
        Arc::new(gateway.clone()),
    )
    .unwrap();

    // Act
    client.start(StartMode::Background).await.unwrap();
    sleep(Duration::from_secs(10)).await;
    let state_during_cooldown = client.state();
    assert!(client.wait_ready(Duration::from_secs(30)).await);

    // Assert
    assert_eq!(state_during_cooldown, ConnectionState::Failed);
    assert_eq!(gateway.upgrade_count(), 2);
    assert_eq!(client.auth_mode(), AuthMode::Open);
    client.stop().await;
}

// ── Rejected credentials ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_rejected_password_is_not_retried() {
    // Arrange
    let gateway = MockConnector::secured(PASSWORD);
    let client = client_with_password(&gateway, "wrong");

    // Act – three cooldowns worth of time pass
    client.start(StartMode::Background).await.unwrap();
    let ready = client.wait_ready(Duration::from_secs(5)).await;
    sleep(Duration::from_secs(65)).await;

    // Assert – one challenge and one rejected credential, nothing more
    assert!(!ready);
    assert_eq!(gateway.upgrade_count(), 2);
    assert_eq!(client.state(), ConnectionState::Unauthorized);
    assert_eq!(
        client.last_auth_error(),
        Some(AuthError::Rejected { status: 401 })
    );
    client.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_authorize_resumes_after_rejected_password() {
    // Arrange
    let gateway = MockConnector::secured(PASSWORD);
    let client = client_with_password(&gateway, "wrong");
    client.start(StartMode::Background).await.unwrap();
    sleep(Duration::from_secs(30)).await;
    assert_eq!(client.state(), ConnectionState::Unauthorized);

    // Act
    client.authorize(SERIAL, Some(PASSWORD)).await.unwrap();
    let ready = client.wait_ready(Duration::from_secs(5)).await;

    // Assert – authorize handshake plus the supervisor's reconnect
    assert!(ready);
    assert_eq!(gateway.upgrade_count(), 6);
    assert_eq!(client.last_auth_error(), None);
    client.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_login_keeps_working_password_for_reconnect() {
    // Arrange
    let gateway = MockConnector::secured(PASSWORD);
    let client = secured_client(&gateway);
    client.start(StartMode::Blocking).await.unwrap();

    // Act
    assert!(!client.try_login(SERIAL, "wrong").await);
    gateway.drop_connection().await;
    sleep(Duration::from_secs(25)).await;

    // Assert
    assert_eq!(client.state(), ConnectionState::Ready);
    client.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_refused_password_change_keeps_old_password_for_reconnect() {
    // Arrange
    let gateway = MockConnector::secured(PASSWORD);
    gateway.respond_with_status(
        Method::Put,
        "/configs/gateway/password",
        403,
        json!({"error": "bad old password"}),
    );
    let client = secured_client(&gateway);
    client.start(StartMode::Blocking).await.unwrap();

    // Act
    let response = client.put_password("new-secret", "guess").await.unwrap();
    gateway.drop_connection().await;
    sleep(Duration::from_secs(25)).await;

    // Assert
    assert_eq!(response.and_then(|reply| reply.status), Some(403));
    assert_eq!(client.state(), ConnectionState::Ready);
    assert_eq!(client.last_auth_error(), None);
    client.stop().await;
}
