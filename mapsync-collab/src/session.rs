//! Server-side session registry.
//!
//! ```text
//! cookie session id ──► SessionState
//!                         ├── socket        (attached on realtime upgrade)
//!                         ├── current_map   (handshake / (re)connect announce)
//!                         └── delivered     (DeliveredItems dedup cache)
//! ```
//!
//! A session outlives its socket: a socket close only clears the dedup cache,
//! so a client that reconnects with the same cookie picks up where it was.
//! Entries are removed by an explicit disconnect. Operations addressed to a
//! session that is no longer in memory (e.g. after a restart) recreate it with
//! a warning instead of failing.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

use mapsync_core::{DataId, Item, MapContext, MapKind};

use crate::dedup::DeliveredItems;
use crate::protocol::ServerMessage;

/// Cookie-derived session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifies one physical socket attachment of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Outbound half of a session's realtime channel.
#[derive(Debug, Clone)]
pub struct SocketHandle {
    connection_id: ConnectionId,
    sender: mpsc::UnboundedSender<ServerMessage>,
}

impl SocketHandle {
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Queue a message. Returns false if the socket task has gone away.
    pub fn send(&self, msg: ServerMessage) -> bool {
        self.sender.send(msg).is_ok()
    }
}

/// Per-session record.
#[derive(Debug)]
pub struct SessionState {
    pub session_id: SessionId,
    socket: Option<SocketHandle>,
    current_map: Option<MapContext>,
    delivered: DeliveredItems,
}

impl SessionState {
    fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            socket: None,
            current_map: None,
            delivered: DeliveredItems::new(),
        }
    }

    pub fn current_map(&self) -> Option<&MapContext> {
        self.current_map.as_ref()
    }

    pub fn has_live_socket(&self) -> bool {
        self.socket.as_ref().is_some_and(SocketHandle::is_open)
    }

    pub fn delivered(&self) -> &DeliveredItems {
        &self.delivered
    }
}

/// Sockets selected by a broadcast.
#[derive(Debug, Default)]
pub struct Viewers {
    pub sockets: Vec<(SessionId, SocketHandle)>,
    /// Sessions on the map that currently have no live socket.
    pub without_socket: usize,
}

/// Registry of all sessions known to this process.
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<SessionId, SessionState>>>,
    next_connection: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            next_connection: AtomicU64::new(1),
        }
    }

    /// Create the session if it does not exist yet. Idempotent.
    pub async fn add_session(&self, key: impl Into<SessionId>) -> SessionId {
        let session_id = key.into();
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.clone())
            .or_insert_with(|| {
                log::debug!("Session {session_id} created");
                SessionState::new(session_id.clone())
            });
        session_id
    }

    /// Bind a realtime channel to the session, replacing any previous socket.
    pub async fn attach_socket(
        &self,
        session_id: &SessionId,
        sender: mpsc::UnboundedSender<ServerMessage>,
    ) -> ConnectionId {
        let connection_id = ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed));
        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(session_id.clone()).or_insert_with(|| {
            log::warn!("Socket attached to unknown session {session_id}; recreating it");
            SessionState::new(session_id.clone())
        });
        if session.socket.is_some() {
            log::debug!("Session {session_id} socket replaced by {connection_id}");
        }
        session.socket = Some(SocketHandle {
            connection_id,
            sender,
        });
        connection_id
    }

    /// Socket closed: drop it and clear the dedup cache, keep the session.
    ///
    /// Ignored when `connection_id` no longer owns the session's socket, so a
    /// late close of a superseded connection cannot detach its replacement.
    pub async fn detach_socket(&self, session_id: &SessionId, connection_id: ConnectionId) -> bool {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(session_id) else {
            return false;
        };
        let owns_socket = session
            .socket
            .as_ref()
            .is_some_and(|s| s.connection_id == connection_id);
        if !owns_socket {
            log::debug!("Stale close for session {session_id} ({connection_id}) ignored");
            return false;
        }
        session.socket = None;
        session.delivered.reset();
        log::info!("Session {session_id} socket closed ({connection_id}); dedup cache cleared");
        true
    }

    /// Set the viewed map and reset the dedup cache.
    pub async fn set_current_map(&self, session_id: &SessionId, map: MapContext) {
        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(session_id.clone()).or_insert_with(|| {
            log::warn!("Map set for unknown session {session_id}; recreating it");
            SessionState::new(session_id.clone())
        });
        log::debug!("Session {session_id} now viewing {map}");
        session.current_map = Some(map);
        session.delivered.reset();
    }

    /// Explicit teardown.
    pub async fn remove_session(&self, session_id: &SessionId) -> bool {
        let removed = self.sessions.write().await.remove(session_id).is_some();
        if removed {
            log::info!("Session {session_id} removed");
        }
        removed
    }

    pub async fn contains(&self, session_id: &SessionId) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    pub async fn current_map(&self, session_id: &SessionId) -> Option<MapContext> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .and_then(|s| s.current_map.clone())
    }

    pub async fn has_live_socket(&self, session_id: &SessionId) -> bool {
        self.sessions
            .read()
            .await
            .get(session_id)
            .is_some_and(SessionState::has_live_socket)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn live_socket_count(&self) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.has_live_socket())
            .count()
    }

    /// Unknown sessions have delivered nothing.
    pub async fn is_already_delivered(&self, session_id: &SessionId, id: &DataId) -> bool {
        self.sessions
            .read()
            .await
            .get(session_id)
            .is_some_and(|s| s.delivered.is_already_delivered(id))
    }

    pub async fn record_delivered<'a>(
        &self,
        session_id: &SessionId,
        ids: impl IntoIterator<Item = &'a DataId>,
    ) {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(session_id) {
            Some(session) => session.delivered.record_delivered(ids),
            None => log::debug!("record_delivered for unknown session {session_id} skipped"),
        }
    }

    /// Drop items the session already holds, preserving order.
    pub async fn filter_undelivered(&self, session_id: &SessionId, items: Vec<Item>) -> Vec<Item> {
        let sessions = self.sessions.read().await;
        match sessions.get(session_id) {
            Some(session) => items
                .into_iter()
                .filter(|item| !session.delivered.is_already_delivered(&item.id))
                .collect(),
            None => items,
        }
    }

    /// Filter out items the session already holds and record the rest as
    /// delivered, under one lock so no invalidation can land in between.
    /// Unknown sessions get everything and record nothing.
    pub async fn take_undelivered(&self, session_id: &SessionId, items: Vec<Item>) -> Vec<Item> {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(session_id) else {
            log::debug!("Delivery to unknown session {session_id} not recorded");
            return items;
        };
        let fresh: Vec<Item> = items
            .into_iter()
            .filter(|item| !session.delivered.is_already_delivered(&item.id))
            .collect();
        session.delivered.record_delivered(fresh.iter().map(|item| &item.id));
        fresh
    }

    /// Remove `ids` from every session's dedup cache. Returns total removals.
    pub async fn invalidate_everywhere(&self, ids: &[DataId]) -> usize {
        let mut sessions = self.sessions.write().await;
        sessions
            .values_mut()
            .map(|s| s.delivered.invalidate(ids))
            .sum()
    }

    /// Sessions viewing `map_page_id` (and `map_kind`, when given).
    pub async fn viewers(&self, map_page_id: &str, map_kind: Option<MapKind>) -> Viewers {
        let sessions = self.sessions.read().await;
        let mut viewers = Viewers::default();
        for session in sessions.values() {
            let on_map = session
                .current_map
                .as_ref()
                .is_some_and(|m| m.matches(map_page_id, map_kind));
            if !on_map {
                continue;
            }
            match &session.socket {
                Some(socket) if socket.is_open() => {
                    viewers.sockets.push((session.session_id.clone(), socket.clone()));
                }
                _ => viewers.without_socket += 1,
            }
        }
        viewers
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mapsync_core::Geometry;

    fn item(id: &str) -> Item {
        Item {
            id: DataId::new("ds1", id),
            geometry: Geometry::Point([0.0, 0.0]),
            geo_properties: Default::default(),
            name: None,
            last_edited_time: String::new(),
            content: None,
        }
    }

    #[tokio::test]
    async fn test_add_session_idempotent() {
        let registry = SessionRegistry::new();
        let a = registry.add_session("s1").await;
        registry.set_current_map(&a, MapContext::new("m1", MapKind::Real)).await;
        let b = registry.add_session("s1").await;

        assert_eq!(a, b);
        assert_eq!(registry.session_count().await, 1);
        // existing state survives the second add
        assert!(registry.current_map(&a).await.is_some());
    }

    #[tokio::test]
    async fn test_attach_socket_recreates_missing_session() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let sid = SessionId::from("lost");

        registry.attach_socket(&sid, tx).await;
        assert!(registry.contains(&sid).await);
        assert!(registry.has_live_socket(&sid).await);
    }

    #[tokio::test]
    async fn test_set_current_map_resets_dedup() {
        let registry = SessionRegistry::new();
        let sid = registry.add_session("s1").await;
        let id = DataId::new("ds1", "a");
        registry.record_delivered(&sid, [&id]).await;
        assert!(registry.is_already_delivered(&sid, &id).await);

        registry.set_current_map(&sid, MapContext::new("m1", MapKind::Virtual)).await;
        assert!(!registry.is_already_delivered(&sid, &id).await);
    }

    #[tokio::test]
    async fn test_detach_keeps_session_and_clears_cache() {
        let registry = SessionRegistry::new();
        let sid = registry.add_session("s1").await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = registry.attach_socket(&sid, tx).await;
        let id = DataId::new("ds1", "a");
        registry.record_delivered(&sid, [&id]).await;

        assert!(registry.detach_socket(&sid, conn).await);
        assert!(registry.contains(&sid).await);
        assert!(!registry.has_live_socket(&sid).await);
        assert!(!registry.is_already_delivered(&sid, &id).await);
    }

    #[tokio::test]
    async fn test_stale_detach_ignored() {
        let registry = SessionRegistry::new();
        let sid = registry.add_session("s1").await;
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        let old = registry.attach_socket(&sid, tx1).await;
        let _new = registry.attach_socket(&sid, tx2).await;

        assert!(!registry.detach_socket(&sid, old).await);
        assert!(registry.has_live_socket(&sid).await);
    }

    #[tokio::test]
    async fn test_remove_session() {
        let registry = SessionRegistry::new();
        let sid = registry.add_session("s1").await;
        assert!(registry.remove_session(&sid).await);
        assert!(!registry.remove_session(&sid).await);
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_filter_undelivered_preserves_order() {
        let registry = SessionRegistry::new();
        let sid = registry.add_session("s1").await;
        registry.record_delivered(&sid, [&DataId::new("ds1", "b")]).await;

        let out = registry
            .filter_undelivered(&sid, vec![item("a"), item("b"), item("c")])
            .await;
        let ids: Vec<&str> = out.iter().map(|i| i.id.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_take_undelivered_records_what_it_returns() {
        let registry = SessionRegistry::new();
        let sid = registry.add_session("s1").await;
        let x = DataId::new("ds1", "x");

        let first = registry.take_undelivered(&sid, vec![item("x"), item("y")]).await;
        assert_eq!(first.len(), 2);
        assert!(registry.is_already_delivered(&sid, &x).await);

        registry.invalidate_everywhere(std::slice::from_ref(&x)).await;
        let second = registry.take_undelivered(&sid, vec![item("x"), item("y")]).await;
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, x);
        assert!(registry.take_undelivered(&sid, vec![item("x")]).await.is_empty());
    }

    #[tokio::test]
    async fn test_take_undelivered_unknown_session() {
        let registry = SessionRegistry::new();
        let sid = SessionId::from("ghost");

        let out = registry.take_undelivered(&sid, vec![item("a")]).await;
        assert_eq!(out.len(), 1);
        assert!(!registry.contains(&sid).await);
    }

    #[tokio::test]
    async fn test_invalidate_everywhere() {
        let registry = SessionRegistry::new();
        let a = registry.add_session("a").await;
        let b = registry.add_session("b").await;
        let id = DataId::new("ds1", "x");
        registry.record_delivered(&a, [&id]).await;
        registry.record_delivered(&b, [&id]).await;

        assert_eq!(registry.invalidate_everywhere(std::slice::from_ref(&id)).await, 2);
        assert!(!registry.is_already_delivered(&a, &id).await);
        assert!(!registry.is_already_delivered(&b, &id).await);
    }

    #[tokio::test]
    async fn test_viewers_counts_sessions_without_socket() {
        let registry = SessionRegistry::new();
        let live = registry.add_session("live").await;
        let idle = registry.add_session("idle").await;
        let map = MapContext::new("m1", MapKind::Real);
        registry.set_current_map(&live, map.clone()).await;
        registry.set_current_map(&idle, map).await;
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.attach_socket(&live, tx).await;

        let viewers = registry.viewers("m1", None).await;
        assert_eq!(viewers.sockets.len(), 1);
        assert_eq!(viewers.sockets[0].0, live);
        assert_eq!(viewers.without_socket, 1);
    }
}
