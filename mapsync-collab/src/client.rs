//! Realtime client for the map notification channel.
//!
//! Provides:
//! - Connection lifecycle with bounded exponential backoff
//! - Map announcement on every (re)connect and on map switch
//! - Decoding of server notifications into [`SyncEvent`]s
//!
//! Notifications carry no item content. `Updated` asks the host to re-fetch
//! and merge; `Deleted` ids may be dropped from the confirmed store directly.

use std::sync::Arc;
use std::time::Duration;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use mapsync_core::{DataId, MapContext};

use crate::protocol::{MapAnnouncement, ProtocolError, ServerMessage};

/// Lower bound on the reconnect delay.
const MIN_RECONNECT_DELAY: Duration = Duration::from_millis(10);

type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type ClientSink = SplitSink<ClientStream, Message>;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Events emitted by the realtime client.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Connection established and the current map announced
    Connected,
    /// Connection lost; a reconnect follows unless stopped
    Disconnected,
    /// Something on the viewed map changed
    Updated,
    /// Items were deleted
    Deleted(Vec<DataId>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// WebSocket endpoint, e.g. `ws://127.0.0.1:9090`
    pub server_url: String,
    /// Session id sent in the cookie
    pub session_id: String,
    /// Cookie name the server reads the session id from
    pub session_cookie: String,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            session_id: session_id.into(),
            session_cookie: "mapsync_sid".to_string(),
            reconnect_initial: Duration::from_millis(250),
            reconnect_max: Duration::from_secs(10),
        }
    }
}

/// The realtime client.
///
/// `start` spawns a supervisor task that owns the socket and reconnects
/// until `stop` is called or the client is dropped.
pub struct RealtimeClient {
    config: ClientConfig,

    /// Connection state, written by the supervisor
    state: Arc<RwLock<ConnectionState>>,

    /// Map to announce; the supervisor re-announces on every change
    map_tx: watch::Sender<Option<MapContext>>,

    event_tx: mpsc::Sender<SyncEvent>,
    event_rx: Option<mpsc::Receiver<SyncEvent>>,

    task: Option<JoinHandle<()>>,
}

impl RealtimeClient {
    pub fn new(config: ClientConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (map_tx, _) = watch::channel(None);
        Self {
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            map_tx,
            event_tx,
            event_rx: Some(event_rx),
            task: None,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    /// Spawn the connection supervisor. No-op if already running.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        let supervisor = Supervisor {
            config: self.config.clone(),
            state: self.state.clone(),
            map_rx: self.map_tx.subscribe(),
            event_tx: self.event_tx.clone(),
        };
        self.task = Some(tokio::spawn(supervisor.run()));
    }

    /// Stop reconnecting and drop the socket.
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        *self.state.write().await = ConnectionState::Disconnected;
    }

    /// Switch the viewed map. Announced now if connected, and on every reconnect.
    pub fn set_map(&self, map: MapContext) {
        log::debug!("Viewing {map}");
        self.map_tx.send_replace(Some(map));
    }

    pub fn current_map(&self) -> Option<MapContext> {
        self.map_tx.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct Supervisor {
    config: ClientConfig,
    state: Arc<RwLock<ConnectionState>>,
    map_rx: watch::Receiver<Option<MapContext>>,
    event_tx: mpsc::Sender<SyncEvent>,
}

impl Supervisor {
    async fn run(mut self) {
        let initial = self.config.reconnect_initial.max(MIN_RECONNECT_DELAY);
        let mut backoff = initial;
        let mut first = true;

        loop {
            *self.state.write().await = if first {
                ConnectionState::Connecting
            } else {
                ConnectionState::Reconnecting
            };
            first = false;

            match self.open().await {
                Ok(ws_stream) => {
                    backoff = initial;
                    match self.serve(ws_stream).await {
                        Ok(true) => {}
                        Ok(false) => {
                            log::debug!("Client handle dropped; supervisor exiting");
                            return;
                        }
                        Err(e) => log::warn!("Realtime connection ended: {e}"),
                    }
                    *self.state.write().await = ConnectionState::Disconnected;
                    self.emit(SyncEvent::Disconnected);
                }
                Err(e) => {
                    log::warn!("Connect to {} failed: {e}", self.config.server_url);
                }
            }

            log::debug!("Reconnecting in {backoff:?}");
            tokio::time::sleep(backoff).await;
            backoff = next_backoff(backoff, self.config.reconnect_max);
        }
    }

    /// Forward an event without waiting. A full channel drops the event so the
    /// socket keeps being served and map switches keep being announced.
    fn emit(&self, event: SyncEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                log::warn!("Event channel full; dropping {event:?}");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    async fn open(&self) -> Result<ClientStream, ProtocolError> {
        let mut request = self
            .config
            .server_url
            .as_str()
            .into_client_request()
            .map_err(|e| ProtocolError::InvalidRequest(e.to_string()))?;

        let cookie = format!("{}={}", self.config.session_cookie, self.config.session_id);
        let value = HeaderValue::from_str(&cookie)
            .map_err(|e| ProtocolError::InvalidRequest(e.to_string()))?;
        request.headers_mut().insert(COOKIE, value);

        let (ws_stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| ProtocolError::Connect(e.to_string()))?;
        Ok(ws_stream)
    }

    /// Drive one connection. `Ok(false)` means the client handle is gone.
    async fn serve(&mut self, ws_stream: ClientStream) -> Result<bool, ProtocolError> {
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // The server forgets maps on restart; always announce first.
        let map = self.map_rx.borrow_and_update().clone();
        if let Some(map) = map {
            announce(&mut ws_writer, &map).await?;
        }

        *self.state.write().await = ConnectionState::Connected;
        self.emit(SyncEvent::Connected);
        log::info!("Connected to {}", self.config.server_url);

        loop {
            tokio::select! {
                msg = ws_reader.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let event = match ServerMessage::decode(text.as_str()) {
                                Ok(ServerMessage::Updated) => SyncEvent::Updated,
                                Ok(ServerMessage::Delete { item_id_list }) => SyncEvent::Deleted(item_id_list),
                                Err(e) => {
                                    log::warn!("Ignoring notification: {e}");
                                    continue;
                                }
                            };
                            self.emit(event);
                        }
                        Some(Ok(Message::Ping(data))) => {
                            ws_writer
                                .send(Message::Pong(data))
                                .await
                                .map_err(|_| ProtocolError::ConnectionClosed)?;
                        }
                        Some(Ok(Message::Close(_))) | None => return Ok(true),
                        Some(Err(e)) => return Err(ProtocolError::Connect(e.to_string())),
                        _ => {}
                    }
                }

                changed = self.map_rx.changed() => {
                    if changed.is_err() {
                        let _ = ws_writer.close().await;
                        return Ok(false);
                    }
                    let map = self.map_rx.borrow_and_update().clone();
                    if let Some(map) = map {
                        announce(&mut ws_writer, &map).await?;
                    }
                }
            }
        }
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max).max(MIN_RECONNECT_DELAY)
}

async fn announce(writer: &mut ClientSink, map: &MapContext) -> Result<(), ProtocolError> {
    let text = MapAnnouncement::from(map).encode()?;
    writer
        .send(Message::Text(text.into()))
        .await
        .map_err(|_| ProtocolError::ConnectionClosed)?;
    log::debug!("Announced {map}");
    Ok(())
}
