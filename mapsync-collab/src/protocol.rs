//! Realtime wire messages.
//!
//! JSON text frames over the session WebSocket:
//! ```text
//! server → client   {"type":"updated"}
//!                   {"type":"delete","itemIdList":[{"dataSourceId":..,"id":..}, ..]}
//! client → server   {"mapId":"..","mapKind":"real"|"virtual"}
//! ```
//!
//! Notifications only say "something changed". Clients re-fetch and merge;
//! payload content is never trusted as an overwrite.

use mapsync_core::{DataId, MapContext, MapKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Server → client notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Items on the viewed map were registered or updated.
    Updated,
    /// Items were deleted.
    Delete {
        #[serde(rename = "itemIdList")]
        item_id_list: Vec<DataId>,
    },
}

impl ServerMessage {
    pub fn delete(item_id_list: Vec<DataId>) -> Self {
        Self::Delete { item_id_list }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

/// Client → server map announcement, sent on every (re)connect and map switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapAnnouncement {
    pub map_id: String,
    pub map_kind: MapKind,
}

impl MapAnnouncement {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

impl From<&MapContext> for MapAnnouncement {
    fn from(ctx: &MapContext) -> Self {
        Self {
            map_id: ctx.map_page_id.clone(),
            map_kind: ctx.map_kind,
        }
    }
}

impl From<MapAnnouncement> for MapContext {
    fn from(a: MapAnnouncement) -> Self {
        MapContext::new(a.map_id, a.map_kind)
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
    #[error("invalid connect request: {0}")]
    InvalidRequest(String),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("connection closed")]
    ConnectionClosed,
}
