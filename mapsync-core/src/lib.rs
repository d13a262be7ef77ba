//! # mapsync-core: shared data model for collaborative map editing
//!
//! Types shared by the realtime server and the client reconciliation engine:
//! item identity ([`DataId`]), geographic items ([`Item`]) and their write
//! payloads, and the map context a viewer is looking at.

pub mod ids;
pub mod item;
pub mod map;

use thiserror::Error;

pub use ids::DataId;
pub use item::{ContentRef, GeoProperties, Geometry, Item, ItemPatch, NewItem, Position};
pub use map::{MapContext, MapKind};

/// Validation errors for write payloads.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
    #[error("payload has no data source")]
    MissingDataSource,
    #[error("patch changes nothing")]
    EmptyPatch,
}
