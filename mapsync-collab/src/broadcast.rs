//! Selective fan-out of change notifications to sessions viewing a map.
//!
//! Delivery is fire-and-forget: each target socket gets the message queued on
//! its unbounded channel, which keeps commit order per socket. Sessions with
//! no live socket are skipped silently; they re-fetch when they reconnect.
//!
//! For updates and deletes the affected ids are scrubbed from every session's
//! dedup cache *before* anything is sent, so the fetch a client issues in
//! response to the notification is never filtered.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use mapsync_core::{DataId, MapContext, MapKind};

use crate::protocol::ServerMessage;
use crate::session::{SessionId, SessionRegistry};

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub deliveries: u64,
    pub skipped_without_socket: u64,
}

/// Lock-free counters behind [`BroadcastStats`].
struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    deliveries: AtomicU64,
    skipped_without_socket: AtomicU64,
}

impl AtomicBroadcastStats {
    fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            skipped_without_socket: AtomicU64::new(0),
        }
    }
}

/// A committed write, as reported by the host's request handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Registered(Vec<DataId>),
    Updated(Vec<DataId>),
    Deleted(Vec<DataId>),
}

impl Mutation {
    /// Ids whose cached delivery must be forgotten before notifying.
    pub fn ids(&self) -> &[DataId] {
        match self {
            Mutation::Registered(ids) | Mutation::Updated(ids) | Mutation::Deleted(ids) => ids,
        }
    }

    fn message(&self) -> ServerMessage {
        match self {
            Mutation::Registered(_) | Mutation::Updated(_) => ServerMessage::Updated,
            Mutation::Deleted(ids) => ServerMessage::delete(ids.clone()),
        }
    }
}

/// Fans notifications out through the session registry.
pub struct BroadcastDispatcher {
    registry: Arc<SessionRegistry>,
    stats: AtomicBroadcastStats,
}

impl BroadcastDispatcher {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            stats: AtomicBroadcastStats::new(),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Deliver `message` to every live session on `map_page_id`.
    ///
    /// With `map_kind == None` the kind is not compared. Returns the number of
    /// sockets the message was queued on.
    pub async fn broadcast(
        &self,
        map_page_id: &str,
        map_kind: Option<MapKind>,
        message: &ServerMessage,
    ) -> usize {
        let viewers = self.registry.viewers(map_page_id, map_kind).await;

        let mut delivered = 0;
        for (session_id, socket) in &viewers.sockets {
            if socket.send(message.clone()) {
                delivered += 1;
            } else {
                log::debug!("Session {session_id} socket gone before delivery");
            }
        }

        self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.stats
            .deliveries
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.stats
            .skipped_without_socket
            .fetch_add(viewers.without_socket as u64, Ordering::Relaxed);

        log::trace!(
            "Broadcast {message:?} on {map_page_id}: {delivered} delivered, {} without socket",
            viewers.without_socket
        );
        delivered
    }

    /// Broadcast to the map the requesting session is viewing.
    ///
    /// A requester that is unknown or has no current map is logged and
    /// skipped; that is not an error for the caller.
    pub async fn broadcast_to_same_map_as_request(
        &self,
        requester: &SessionId,
        message: &ServerMessage,
    ) -> usize {
        match self.registry.current_map(requester).await {
            Some(MapContext {
                map_page_id,
                map_kind,
            }) => self.broadcast(&map_page_id, Some(map_kind), message).await,
            None => {
                log::info!("No current map for session {requester}; broadcast skipped");
                0
            }
        }
    }

    /// Invalidate affected ids everywhere, then notify the requester's map.
    pub async fn notify_committed(&self, requester: &SessionId, mutation: &Mutation) -> usize {
        self.invalidate(mutation).await;
        self.broadcast_to_same_map_as_request(requester, &mutation.message())
            .await
    }

    /// Same as [`notify_committed`](Self::notify_committed) for writes that
    /// did not originate from a session request.
    pub async fn notify_committed_on_map(
        &self,
        map_page_id: &str,
        map_kind: Option<MapKind>,
        mutation: &Mutation,
    ) -> usize {
        self.invalidate(mutation).await;
        self.broadcast(map_page_id, map_kind, &mutation.message())
            .await
    }

    async fn invalidate(&self, mutation: &Mutation) {
        let ids = mutation.ids();
        if ids.is_empty() {
            return;
        }
        let removed = self.registry.invalidate_everywhere(ids).await;
        log::debug!("Invalidated {} ids ({removed} cached deliveries)", ids.len());
    }

    /// Lock-free snapshot of the counters.
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.stats.messages_sent.load(Ordering::Relaxed),
            deliveries: self.stats.deliveries.load(Ordering::Relaxed),
            skipped_without_socket: self.stats.skipped_without_socket.load(Ordering::Relaxed),
        }
    }
}
