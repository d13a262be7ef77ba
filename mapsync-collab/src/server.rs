//! WebSocket realtime server and the handshake API used by request handlers.
//!
//! Architecture:
//! ```text
//! HTTP layer (host) ──connect/disconnect/deliver/commit──┐
//!                                                        ▼
//! Client A ──ws (cookie sid)──┐               ┌── SessionRegistry
//!                             ├── SyncServer ─┤     (map, dedup, socket)
//! Client B ──ws (cookie sid)──┘               └── BroadcastDispatcher
//!                                                        │
//!                                       ┌────────────────┼──────────┐
//!                                       ▼                ▼          ▼
//!                                   Client A         Client B    Client C
//! ```
//!
//! Each socket task owns the inbound half of its WebSocket and drains an
//! unbounded channel registered with the session for outbound notifications.
//! Inbound text frames are map announcements sent on every (re)connect; they
//! re-establish the session's map after a server restart.

use std::net::SocketAddr;
use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::http::HeaderMap;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use thiserror::Error;

use mapsync_core::{Item, MapContext};

use crate::broadcast::{BroadcastDispatcher, Mutation};
use crate::protocol::{MapAnnouncement, ProtocolError, ServerMessage};
use crate::session::{ConnectionId, SessionId, SessionRegistry};

const ENV_BIND_ADDR: &str = "MAPSYNC_BIND_ADDR";
const ENV_SESSION_COOKIE: &str = "MAPSYNC_SESSION_COOKIE";

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Cookie carrying the session id on the WebSocket upgrade request
    pub session_cookie: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            session_cookie: "mapsync_sid".to_string(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `MAPSYNC_BIND_ADDR` / `MAPSYNC_SESSION_COOKIE`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(addr) = lookup(ENV_BIND_ADDR) {
            if addr.parse::<SocketAddr>().is_ok() {
                config.bind_addr = addr;
            } else {
                log::warn!("{ENV_BIND_ADDR}={addr:?} is not a socket address; using {}", config.bind_addr);
            }
        }
        if let Some(cookie) = lookup(ENV_SESSION_COOKIE) {
            let cookie = cookie.trim();
            if cookie.is_empty() || cookie.contains(['=', ';', ' ']) {
                log::warn!("{ENV_SESSION_COOKIE}={cookie:?} is not a valid cookie name; using {}", config.session_cookie);
            } else {
                config.session_cookie = cookie.to_string();
            }
        }
        config
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub rejected_upgrades: u64,
    pub announcements: u64,
}

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// The realtime server.
pub struct SyncServer {
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    dispatcher: Arc<BroadcastDispatcher>,
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let dispatcher = Arc::new(BroadcastDispatcher::new(registry.clone()));
        Self {
            config,
            registry,
            dispatcher,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    // ── Handshake API (called by the host's request handlers) ──────────

    /// Establish (or re-use) the session for a cookie-derived key.
    pub async fn connect(&self, session_key: &str, map: Option<MapContext>) -> SessionId {
        let session_id = self.registry.add_session(session_key).await;
        if let Some(map) = map {
            self.registry.set_current_map(&session_id, map).await;
        }
        session_id
    }

    /// Explicit teardown.
    pub async fn disconnect(&self, session_id: &SessionId) -> bool {
        self.registry.remove_session(session_id).await
    }

    /// Filter a fetch result down to items the session does not hold yet and
    /// record them as delivered. Call right before sending the response.
    pub async fn deliver(&self, session_id: &SessionId, items: Vec<Item>) -> Vec<Item> {
        self.registry.take_undelivered(session_id, items).await
    }

    /// Report a committed write made by `session_id`.
    pub async fn commit(&self, session_id: &SessionId, mutation: &Mutation) -> usize {
        self.dispatcher.notify_committed(session_id, mutation).await
    }

    // ── Realtime socket handling ────────────────────────────────────────

    /// Bind the configured address and serve until an accept error.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.run_on(listener).await
    }

    /// Serve on an already-bound listener.
    pub async fn run_on(&self, listener: TcpListener) -> Result<(), ServerError> {
        log::info!("Realtime server listening on {}", listener.local_addr()?);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let registry = self.registry.clone();
            let stats = self.stats.clone();
            let cookie = self.config.session_cookie.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, registry, stats, cookie).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        registry: Arc<SessionRegistry>,
        stats: Arc<RwLock<ServerStats>>,
        cookie_name: String,
    ) -> Result<(), ServerError> {
        let mut session_key: Option<String> = None;
        let mut ws_stream = tokio_tungstenite::accept_hdr_async(
            stream,
            |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                session_key = cookie_value(req.headers(), &cookie_name);
                Ok(resp)
            },
        )
        .await?;

        let Some(session_key) = session_key else {
            log::warn!("Upgrade from {addr} without {cookie_name} cookie rejected");
            stats.write().await.rejected_upgrades += 1;
            ws_stream
                .close(Some(CloseFrame {
                    code: CloseCode::Policy,
                    reason: "missing session cookie".into(),
                }))
                .await?;
            return Ok(());
        };

        let session_id = SessionId::new(session_key);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let connection_id = registry.attach_socket(&session_id, out_tx).await;
        log::info!("Session {session_id} attached socket {connection_id} from {addr}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let result = Self::pump(ws_stream, out_rx, &session_id, connection_id, &registry, &stats).await;

        // Socket gone: keep the session, drop its dedup cache.
        registry.detach_socket(&session_id, connection_id).await;
        stats.write().await.active_connections -= 1;
        result
    }

    async fn pump(
        ws_stream: WebSocketStream<TcpStream>,
        mut out_rx: mpsc::UnboundedReceiver<ServerMessage>,
        session_id: &SessionId,
        connection_id: ConnectionId,
        registry: &SessionRegistry,
        stats: &RwLock<ServerStats>,
    ) -> Result<(), ServerError> {
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match MapAnnouncement::decode(text.as_str()) {
                                Ok(announcement) => {
                                    let map: MapContext = announcement.into();
                                    log::info!("Session {session_id} announced {map}");
                                    registry.set_current_map(session_id, map).await;
                                    stats.write().await.announcements += 1;
                                }
                                Err(e) => {
                                    log::warn!("Bad announcement from session {session_id}: {e}");
                                }
                            }
                        }

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Session {session_id} closed {connection_id}");
                            break;
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error on session {session_id}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                msg = out_rx.recv() => {
                    match msg {
                        Some(notification) => {
                            let text = notification.encode()?;
                            ws_sender.send(Message::Text(text.into())).await?;
                        }
                        // Sender dropped: the session got a newer socket or was removed.
                        None => {
                            log::debug!("Session {session_id} {connection_id} superseded");
                            let _ = ws_sender.close().await;
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<BroadcastDispatcher> {
        &self.dispatcher
    }
}

/// Extract cookie `name` from the request's `Cookie` headers.
fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|header| header.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}
