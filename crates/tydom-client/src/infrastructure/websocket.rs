//! Production `Connector`: WebSocket over TLS with tokio-tungstenite.
//!
//! # Socket pump
//!
//! After a successful upgrade the stream is split and one task owns both
//! halves.  It `select!`s over three sources:
//!
//! ```text
//!  LinkCommand::Send(bytes) ──► Message::Binary ──► gateway
//!  keepalive tick           ──► Message::Ping   ──► gateway
//!  gateway frames           ──► TransportEvent  ──► receive loop
//! ```
//!
//! The pump ends when the gateway closes, a command asks it to, the command
//! channel is dropped, or an I/O error occurs.  It always emits a final
//! `TransportEvent::Closed`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::http::Request as HttpRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{
    connect_async_tls_with_config, Connector as TlsConnector, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info};
use tydom_core::auth::upgrade::AUTHENTICATE_HEADER;
use tydom_core::UpgradeRequest;

use crate::application::transport::{
    Connector, LinkCommand, TransportEvent, TransportLink, UpgradeResponse,
};
use crate::domain::{ClientConfig, ConnectError};
use crate::infrastructure::tls::insecure_client_config;

/// Capacity of the command and event channels of one link.
const LINK_CHANNEL_CAPACITY: usize = 256;

type GatewayStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to the gateway's mediation endpoint.
pub struct WebSocketConnector {
    tls: Arc<rustls::ClientConfig>,
    keepalive: Duration,
}

impl WebSocketConnector {
    /// # Errors
    ///
    /// [`ConnectError::Transport`] if the TLS configuration cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, ConnectError> {
        Ok(Self {
            tls: insecure_client_config()?,
            keepalive: config.keepalive_interval(),
        })
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn upgrade(&self, request: &UpgradeRequest) -> Result<UpgradeResponse, ConnectError> {
        let http_request = build_http_request(request)?;
        let tls = TlsConnector::Rustls(Arc::clone(&self.tls));

        match connect_async_tls_with_config(http_request, None, false, Some(tls)).await {
            Ok((stream, response)) => {
                let challenge = response
                    .headers()
                    .get(AUTHENTICATE_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string);
                debug!("upgrade to {} switched protocols", request.url);

                let (link, commands, events) = TransportLink::pair(LINK_CHANNEL_CAPACITY);
                tokio::spawn(pump(stream, commands, events, self.keepalive));
                Ok(UpgradeResponse {
                    status: response.status().as_u16(),
                    challenge,
                    link: Some(link),
                })
            }
            Err(WsError::Http(response)) => {
                let status = response.status().as_u16();
                let challenge = response
                    .headers()
                    .get(AUTHENTICATE_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string);
                debug!("upgrade to {} answered HTTP {status}", request.url);
                Ok(UpgradeResponse {
                    status,
                    challenge,
                    link: None,
                })
            }
            Err(err) => Err(ConnectError::Transport(err.to_string())),
        }
    }
}

/// Turns the protocol-level upgrade description into an `http::Request`.
fn build_http_request(request: &UpgradeRequest) -> Result<HttpRequest<()>, ConnectError> {
    let mut builder = HttpRequest::builder().method("GET").uri(request.url.as_str());
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .body(())
        .map_err(|err| ConnectError::InvalidRequest(err.to_string()))
}

async fn pump(
    stream: GatewayStream,
    mut commands: mpsc::Receiver<LinkCommand>,
    events: mpsc::Sender<TransportEvent>,
    keepalive: Duration,
) {
    let (mut sink, mut source) = stream.split();
    let mut ticker = interval(keepalive.max(Duration::from_millis(100)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it.
    ticker.tick().await;

    let _ = events.send(TransportEvent::Opened).await;

    let (code, reason) = loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(LinkCommand::Send(frame)) => {
                    if let Err(err) = sink.send(WsMessage::Binary(frame)).await {
                        break (None, format!("send failed: {err}"));
                    }
                }
                Some(LinkCommand::Close) | None => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break (None, "closed by client".to_string());
                }
            },
            _ = ticker.tick() => {
                if let Err(err) = sink.send(WsMessage::Ping(Vec::new())).await {
                    break (None, format!("keepalive failed: {err}"));
                }
            }
            message = source.next() => match message {
                Some(Ok(WsMessage::Binary(bytes))) => {
                    let _ = events.send(TransportEvent::MessageReceived(bytes)).await;
                }
                Some(Ok(WsMessage::Text(text))) => {
                    let _ = events
                        .send(TransportEvent::MessageReceived(text.into_bytes()))
                        .await;
                }
                Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {}
                Some(Ok(WsMessage::Close(frame))) => {
                    break match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.to_string()),
                        None => (None, String::new()),
                    };
                }
                Some(Ok(WsMessage::Frame(_))) => {}
                Some(Err(err)) => {
                    let _ = events.send(TransportEvent::Error(err.to_string())).await;
                    break (None, err.to_string());
                }
                None => break (None, "stream ended".to_string()),
            },
        }
    };

    info!("gateway link closed: {reason}");
    let _ = events.send(TransportEvent::Closed { code, reason }).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_request_carries_upgrade_headers() {
        // Arrange
        let upgrade = UpgradeRequest::new("192.168.1.20", 443, "001A25ABCDEF")
            .with_authorization("Digest username=\"001A25ABCDEF\"");

        // Act
        let request = build_http_request(&upgrade).unwrap();

        // Assert
        assert_eq!(
            request.uri().to_string(),
            "wss://192.168.1.20:443/mediation/client?mac=001A25ABCDEF&appli=1"
        );
        let headers = request.headers();
        assert_eq!(headers["Upgrade"], "websocket");
        assert_eq!(headers["Sec-WebSocket-Version"], "13");
        assert_eq!(headers["Authorization"], "Digest username=\"001A25ABCDEF\"");
        assert!(headers.contains_key("Sec-WebSocket-Key"));
    }

    #[test]
    fn test_invalid_header_value_is_rejected() {
        let mut upgrade = UpgradeRequest::new("h", 443, "s");
        upgrade
            .headers
            .push(("X-Bad".to_string(), "line\nbreak".to_string()));

        assert!(matches!(
            build_http_request(&upgrade),
            Err(ConnectError::InvalidRequest(_))
        ));
    }
}
