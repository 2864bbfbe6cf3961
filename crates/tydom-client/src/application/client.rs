//! `TydomClient`: the public face of the crate.
//!
//! # What happens between `start()` and a callback firing (for beginners)
//!
//! 1. The supervisor (or `start(Blocking)`) runs the handshake through the
//!    [`AuthNegotiator`] and installs a fresh [`Transport`].
//! 2. A receive-loop task is spawned for that transport.  For every inbound
//!    message it decodes the frame, computes the routing key (the
//!    `Transac-Id`, or the state channel when absent) and hands the frame to
//!    the [`SubscriptionRouter`] or, failing that, to the [`Correlator`].
//! 3. Request methods such as [`TydomClient::get_devices_data`] encode a frame,
//!    send it on the current transport and await the correlated response.
//! 4. When the socket closes the receive loop marks the client `Failed` and
//!    the supervisor reconnects after the cooldown.  A rejected password
//!    instead marks it `Unauthorized` and nothing is retried until the
//!    caller calls [`TydomClient::authorize`] or [`TydomClient::start`].
//!
//! `TydomClient` is a cheap handle (`Arc` inside); clones share one
//! connection.  Call [`TydomClient::stop`] to shut everything down.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use tydom_core::{
    decode_frame, Body, Request, Response, StateEvent, SubscriptionId, TransactionId,
};

use crate::application::auth_negotiator::{AuthNegotiator, Credentials, Handshake};
use crate::application::correlator::Correlator;
use crate::application::router::{Dispatcher, StateCallback, SubscriptionRouter};
use crate::application::supervisor::{Supervised, Supervisor, SupervisorTiming};
use crate::application::transport::{Connector, LinkCommand, Transport, TransportEvent};
use crate::domain::{
    AuthError, AuthMode, ClientConfig, ClientError, ConfigError, ConnectError, ConnectionState,
    HandshakeError, RouterError, SendError, StartMode,
};

/// Number of bytes of a malformed frame quoted in the log.
const FRAME_PREVIEW_LEN: usize = 64;

struct ClientInner {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    credentials: Mutex<Credentials>,
    correlator: Correlator,
    router: SubscriptionRouter,
    dispatcher: Mutex<Option<Dispatcher>>,
    transport: RwLock<Option<Arc<Transport>>>,
    generation: AtomicU64,
    state: watch::Sender<ConnectionState>,
    auth_mode: watch::Sender<AuthMode>,
    /// Set when the gateway rejects the stored credential, cleared by the
    /// next successful handshake.
    auth_error: watch::Sender<Option<AuthError>>,
    started: AtomicBool,
    stopped: AtomicBool,
    /// Serializes handshakes so only one transport is ever being built.
    connect_lock: Mutex<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Client for one Tydom gateway.
#[derive(Clone)]
pub struct TydomClient {
    inner: Arc<ClientInner>,
}

impl TydomClient {
    /// Creates a client that opens connections through `connector`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is incomplete.
    pub fn with_connector(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (router, dispatcher) = SubscriptionRouter::new(config.client.dispatch_queue);
        let credentials = Credentials::new(
            config.gateway.serial.clone(),
            config.gateway.password.clone(),
        );
        let correlator = Correlator::new(config.client.user_agent.clone());
        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                connector,
                credentials: Mutex::new(credentials),
                correlator,
                router,
                dispatcher: Mutex::new(Some(dispatcher)),
                transport: RwLock::new(None),
                generation: AtomicU64::new(0),
                state: watch::channel(ConnectionState::Disconnected).0,
                auth_mode: watch::channel(AuthMode::Unknown).0,
                auth_error: watch::channel(None).0,
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                connect_lock: Mutex::new(()),
                tasks: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Connects to the gateway as `serial`/`password` and reports its auth mode.
    ///
    /// Accepted credentials replace the stored ones for later connections;
    /// rejected ones leave the stored ones untouched.  A client parked in
    /// [`ConnectionState::Unauthorized`] reconnects right away.  That
    /// socket is closed again; call [`TydomClient::start`] to stay connected.
    ///
    /// # Errors
    ///
    /// [`HandshakeError`] if the upgrade fails or the password is rejected.
    pub async fn authorize(
        &self,
        serial: &str,
        password: Option<&str>,
    ) -> Result<AuthMode, HandshakeError> {
        if self.is_stopped() {
            return Err(ConnectError::Stopped.into());
        }
        let credentials = Credentials::new(serial, password.map(str::to_string));

        let _guard = self.inner.connect_lock.lock().await;
        let Handshake { mode, link } = self.negotiate(&credentials, false).await?;
        let _ = link.commands.try_send(LinkCommand::Close);

        *self.inner.credentials.lock().await = credentials;
        self.inner.auth_mode.send_replace(mode);
        self.inner.auth_error.send_replace(None);
        if self.state().needs_credentials() {
            self.set_state(ConnectionState::Disconnected);
        }
        info!("gateway {} auth mode: {mode}", self.inner.config.gateway.host);
        Ok(mode)
    }

    /// Onboarding helper: returns whether `password` is accepted.
    ///
    /// Connection problems are logged and reported as `false`.
    pub async fn try_login(&self, serial: &str, password: &str) -> bool {
        match self.authorize(serial, Some(password)).await {
            Ok(mode) => {
                info!("login to gateway {serial} succeeded ({mode})");
                true
            }
            Err(HandshakeError::Auth(err)) => {
                warn!("login to gateway {serial} refused: {err}");
                false
            }
            Err(HandshakeError::Connect(err)) => {
                warn!("login to gateway {serial} failed: {err}");
                false
            }
        }
    }

    /// Starts the connection supervisor and the callback dispatcher.
    ///
    /// With [`StartMode::Blocking`] the first connection is made before this
    /// returns and its failure is reported; with [`StartMode::Background`] the
    /// supervisor connects and retries on its own.  Calling `start` on a
    /// running client is a no-op, except in [`ConnectionState::Unauthorized`]
    /// where it tries the stored credentials once more.
    ///
    /// # Errors
    ///
    /// [`ClientError::Stopped`] after `stop()`, or the handshake error of a
    /// blocking start.
    pub async fn start(&self, mode: StartMode) -> Result<(), ClientError> {
        if self.is_stopped() {
            return Err(ClientError::Stopped);
        }
        if self.inner.started.swap(true, Ordering::AcqRel) {
            if !self.state().needs_credentials() {
                debug!("start called on a running client");
                return Ok(());
            }
            info!("retrying stored credentials after rejection");
            return match mode {
                StartMode::Blocking => self.establish().await.map(|_| ()).map_err(Into::into),
                StartMode::Background => {
                    self.set_state(ConnectionState::Disconnected);
                    Ok(())
                }
            };
        }

        if mode == StartMode::Blocking {
            if let Err(err) = self.establish().await {
                self.inner.started.store(false, Ordering::Release);
                return Err(err.into());
            }
        }

        if let Some(dispatcher) = self.inner.dispatcher.lock().await.take() {
            self.track(tokio::spawn(dispatcher.run())).await;
        }
        let supervisor = Supervisor::new(
            self.clone(),
            SupervisorTiming::from_config(&self.inner.config),
        );
        self.track(tokio::spawn(supervisor.run())).await;
        info!(
            "client started for gateway {}:{}",
            self.inner.config.gateway.host, self.inner.config.gateway.port
        );
        Ok(())
    }

    /// Stops the client for good.
    ///
    /// Closes the transport, cancels the supervisor, receive loop and
    /// dispatcher, and guarantees no further frame is sent.  Safe to call
    /// concurrently with a reconnect and more than once.
    pub async fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.state.send_replace(ConnectionState::Stopped);
        if let Some(transport) = self.inner.transport.write().await.take() {
            transport.close();
        }
        let tasks: Vec<JoinHandle<()>> = self.inner.tasks.lock().await.drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        info!("client stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Receiver notified on every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Auth mode found by the last successful handshake.
    pub fn auth_mode(&self) -> AuthMode {
        *self.inner.auth_mode.borrow()
    }

    /// Why the gateway last rejected the stored credential, if it did since
    /// the last successful handshake.
    pub fn last_auth_error(&self) -> Option<AuthError> {
        self.inner.auth_error.borrow().clone()
    }

    /// Waits until the client is `Ready`.  Returns `false` on timeout, on
    /// stop, or when the credentials are rejected.
    pub async fn wait_ready(&self, within: Duration) -> bool {
        let mut changes = self.subscribe_state();
        let ready = timeout(
            within,
            changes.wait_for(|state| {
                state.is_ready() || state.is_terminal() || state.needs_credentials()
            }),
        )
        .await;
        matches!(ready, Ok(Ok(state)) if state.is_ready())
    }

    // ── Subscriptions ─────────────────────────────────────────────────────────

    /// Registers `callback` for push events on the state channel.
    ///
    /// `filter` lists event names such as `"devices_changed"`; `None` or an
    /// empty list receives every event.
    pub async fn register_state_callback<F>(&self, callback: F, filter: Option<Vec<String>>)
    where
        F: Fn(&StateEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let callback: StateCallback = Arc::new(callback);
        self.inner
            .router
            .register(SubscriptionId::STATE, callback, filter.unwrap_or_default())
            .await;
    }

    /// Registers `callback` on the push channel of one device or area.
    ///
    /// # Errors
    ///
    /// [`RouterError::ReservedId`] if `entity_id` lies in the request id space.
    pub async fn register_subscription<F>(
        &self,
        entity_id: u64,
        callback: F,
        filter: Option<Vec<String>>,
    ) -> Result<SubscriptionId, RouterError>
    where
        F: Fn(&StateEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let subscription =
            SubscriptionId::for_entity(entity_id).ok_or(RouterError::ReservedId(entity_id))?;
        self.inner
            .router
            .register(subscription, Arc::new(callback), filter.unwrap_or_default())
            .await;
        Ok(subscription)
    }

    // ── Requests ──────────────────────────────────────────────────────────────

    /// Sends `request` without waiting for the response.
    ///
    /// # Errors
    ///
    /// [`SendError::NotReady`] when no connection is open.
    pub async fn send_request(&self, request: &Request) -> Result<TransactionId, SendError> {
        if self.is_stopped() {
            return Err(SendError::NotReady);
        }
        let transport = self
            .inner
            .transport
            .read()
            .await
            .clone()
            .ok_or(SendError::NotReady)?;
        self.inner
            .correlator
            .send_request(transport.as_ref(), request)
            .await
    }

    /// Waits for the response to a request sent with [`TydomClient::send_request`].
    ///
    /// Returns `None` if nothing arrived within the request budget.
    pub async fn await_result(&self, id: TransactionId) -> Option<Body> {
        self.inner
            .correlator
            .await_result(id, self.inner.config.request_budget())
            .await
    }

    /// Like [`TydomClient::await_result`] with an explicit budget of
    /// `max_attempts` polls spaced `interval` apart.
    pub async fn await_result_within(
        &self,
        id: TransactionId,
        max_attempts: u32,
        interval: Duration,
    ) -> Option<Body> {
        self.inner
            .correlator
            .await_result(id, interval.saturating_mul(max_attempts))
            .await
    }

    /// Sends `request` and waits for its response.
    ///
    /// # Errors
    ///
    /// [`SendError`] if the frame could not be sent.  A timeout is `Ok(None)`.
    pub async fn request(&self, request: Request) -> Result<Option<Body>, SendError> {
        let id = self.send_request(&request).await?;
        Ok(self.await_result(id).await)
    }

    /// Like [`TydomClient::request`] but keeps the response status.
    pub async fn request_response(&self, request: Request) -> Result<Option<Response>, SendError> {
        let id = self.send_request(&request).await?;
        Ok(self
            .inner
            .correlator
            .await_response(id, self.inner.config.request_budget())
            .await)
    }

    pub async fn ping(&self) -> Result<Option<Body>, SendError> {
        self.request(Request::ping()).await
    }

    pub async fn info(&self) -> Result<Option<Body>, SendError> {
        self.request(Request::info()).await
    }

    pub async fn get_configs_file(&self) -> Result<Option<Body>, SendError> {
        self.request(Request::configs_file()).await
    }

    pub async fn get_geoloc(&self) -> Result<Option<Body>, SendError> {
        self.request(Request::gateway_geoloc()).await
    }

    pub async fn put_api_mode(&self) -> Result<Option<Body>, SendError> {
        self.request(Request::gateway_api_mode()).await
    }

    /// Changes the gateway password.
    ///
    /// The stored credentials switch to `new_password` only when the gateway
    /// answers with a 2xx status, so a refused change keeps reconnects on
    /// the old password.
    pub async fn put_password(
        &self,
        new_password: &str,
        old_password: &str,
    ) -> Result<Option<Response>, SendError> {
        let response = self
            .request_response(Request::gateway_password(new_password, old_password))
            .await?;
        match &response {
            Some(reply) if reply.is_success() => {
                self.inner.credentials.lock().await.password = Some(new_password.to_string());
                info!("gateway password changed");
            }
            Some(reply) => warn!("gateway refused password change (status {:?})", reply.status),
            None => warn!("no answer to password change, keeping the old password"),
        }
        Ok(response)
    }

    /// Asks the gateway to push the state of every device.
    pub async fn post_refresh_all(&self) -> Result<Option<Body>, SendError> {
        self.request(Request::refresh_all()).await
    }

    pub async fn get_areas_data(&self) -> Result<Option<Body>, SendError> {
        self.request(Request::areas_data()).await
    }

    pub async fn get_areas_cmeta(&self) -> Result<Option<Body>, SendError> {
        self.request(Request::areas_cmeta()).await
    }

    pub async fn get_areas_meta(&self) -> Result<Option<Body>, SendError> {
        self.request(Request::areas_meta()).await
    }

    pub async fn get_devices_cmeta(&self) -> Result<Option<Body>, SendError> {
        self.request(Request::devices_cmeta()).await
    }

    pub async fn get_devices_meta(&self) -> Result<Option<Body>, SendError> {
        self.request(Request::devices_meta()).await
    }

    pub async fn get_devices_data(&self) -> Result<Option<Body>, SendError> {
        self.request(Request::devices_data()).await
    }

    pub async fn get_device_data(
        &self,
        device_id: u64,
        endpoint_id: u64,
    ) -> Result<Option<Body>, SendError> {
        self.request(Request::device_data(device_id, endpoint_id))
            .await
    }

    pub async fn put_device_data(
        &self,
        device_id: u64,
        endpoint_id: u64,
        name: &str,
        value: Value,
    ) -> Result<Option<Body>, SendError> {
        self.request(Request::put_device_data(device_id, endpoint_id, name, value))
            .await
    }

    pub async fn get_scenarios_file(&self) -> Result<Option<Body>, SendError> {
        self.request(Request::scenarios_file()).await
    }

    /// Runs a scenario.
    pub async fn put_scenario(&self, scenario_id: u64) -> Result<Option<Body>, SendError> {
        self.request(Request::scenario(scenario_id)).await
    }

    pub async fn get_moments_file(&self) -> Result<Option<Body>, SendError> {
        self.request(Request::moments_file()).await
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    /// Runs the handshake under the connect timeout.  `publish_progress`
    /// reports `Authenticating` when a challenge arrives.
    async fn negotiate(
        &self,
        credentials: &Credentials,
        publish_progress: bool,
    ) -> Result<Handshake, HandshakeError> {
        let negotiator = AuthNegotiator::new(
            Arc::clone(&self.inner.connector),
            self.inner.config.gateway.host.clone(),
            self.inner.config.gateway.port,
        );
        let attempt = negotiator.negotiate(credentials, move || {
            if publish_progress {
                self.set_state(ConnectionState::Authenticating);
            }
        });
        match timeout(self.inner.config.connect_timeout(), attempt).await {
            Ok(result) => result,
            Err(_) => Err(ConnectError::Timeout.into()),
        }
    }

    /// Publishes `state` unless the client has been stopped.
    fn set_state(&self, state: ConnectionState) {
        if self.is_stopped() {
            return;
        }
        let previous = self.inner.state.send_replace(state);
        if previous != state {
            debug!("connection state {previous} -> {state}");
        }
    }

    async fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.inner.tasks.lock().await;
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    async fn install(&self, generation: u64, transport: Arc<Transport>) -> bool {
        let mut slot = self.inner.transport.write().await;
        // Re-checked under the lock so `stop()` cannot miss this transport.
        if self.is_stopped() {
            transport.close();
            return false;
        }
        if let Some(old) = slot.replace(transport) {
            old.close();
        }
        debug!("transport generation {generation} installed");
        true
    }

    async fn receive_loop(self, generation: u64, mut events: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Opened => debug!("transport generation {generation} opened"),
                TransportEvent::MessageReceived(bytes) => self.handle_frame(&bytes).await,
                TransportEvent::Error(info) => warn!("transport error: {info}"),
                TransportEvent::Closed { code, reason } => {
                    info!("gateway closed connection (code {code:?}): {reason}");
                    break;
                }
            }
        }
        self.on_transport_closed(generation).await;
    }

    async fn handle_frame(&self, bytes: &[u8]) {
        let frame = match decode_frame(bytes) {
            Ok(frame) => frame,
            Err(err) => {
                let preview = String::from_utf8_lossy(&bytes[..bytes.len().min(FRAME_PREVIEW_LEN)]);
                warn!("dropping malformed frame ({err}): {preview:?}");
                return;
            }
        };

        let key = SubscriptionId::routing_key(frame.transaction_id);
        if self.inner.router.route(key, &frame).await {
            return;
        }
        if self.inner.correlator.fulfil(key, frame.into_response()).await {
            return;
        }
        if key.is_request_id() {
            warn!("dropping response for unknown or expired transaction {key}");
        } else {
            debug!("no subscriber for push on channel {key}");
        }
    }

    async fn on_transport_closed(&self, generation: u64) {
        let mut slot = self.inner.transport.write().await;
        let is_current = slot
            .as_ref()
            .is_some_and(|transport| transport.generation() == generation);
        if !is_current {
            return;
        }
        if let Some(transport) = slot.take() {
            transport.mark_closed();
        }
        drop(slot);
        if !self.is_stopped() {
            warn!("transport generation {generation} lost");
            self.set_state(ConnectionState::Failed);
        }
    }
}

#[async_trait]
impl Supervised for TydomClient {
    fn is_stopped(&self) -> bool {
        TydomClient::is_stopped(self)
    }

    fn state(&self) -> ConnectionState {
        TydomClient::state(self)
    }

    fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        TydomClient::subscribe_state(self)
    }

    async fn establish(&self) -> Result<AuthMode, HandshakeError> {
        let _guard = self.inner.connect_lock.lock().await;
        if self.is_stopped() {
            return Err(ConnectError::Stopped.into());
        }
        if let Some(old) = self.inner.transport.write().await.take() {
            old.close();
        }
        self.set_state(ConnectionState::Connecting);

        let credentials = self.inner.credentials.lock().await.clone();
        let Handshake { mode, link } = match self.negotiate(&credentials, true).await {
            Ok(handshake) => handshake,
            Err(err) => {
                if let HandshakeError::Auth(rejection) = &err {
                    warn!("gateway rejected stored credentials: {rejection}");
                    self.inner.auth_error.send_replace(Some(rejection.clone()));
                    self.set_state(ConnectionState::Unauthorized);
                } else {
                    self.set_state(ConnectionState::Failed);
                }
                return Err(err);
            }
        };

        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let transport = Arc::new(Transport::new(generation, link.commands));
        if !self.install(generation, transport).await {
            return Err(ConnectError::Stopped.into());
        }
        self.inner.auth_mode.send_replace(mode);
        self.inner.auth_error.send_replace(None);
        self.set_state(ConnectionState::Ready);

        // Spawned after Ready so an immediate close still ends in Failed.
        let receiver = tokio::spawn(self.clone().receive_loop(generation, link.events));
        self.track(receiver).await;
        Ok(mode)
    }

    async fn purge_expired(&self) {
        self.inner
            .correlator
            .purge_expired(self.inner.config.result_expiry())
            .await;
    }
}
