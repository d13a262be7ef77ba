use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a map page shows real-world coordinates or a virtual (image) plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MapKind {
    Real,
    Virtual,
}

impl fmt::Display for MapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapKind::Real => f.write_str("real"),
            MapKind::Virtual => f.write_str("virtual"),
        }
    }
}

/// The map a session is currently viewing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapContext {
    pub map_page_id: String,
    pub map_kind: MapKind,
}

impl MapContext {
    pub fn new(map_page_id: impl Into<String>, map_kind: MapKind) -> Self {
        Self {
            map_page_id: map_page_id.into(),
            map_kind,
        }
    }

    /// Whether this context is targeted by a broadcast for `map_page_id`
    /// (and `map_kind`, when one is given).
    pub fn matches(&self, map_page_id: &str, map_kind: Option<MapKind>) -> bool {
        self.map_page_id == map_page_id && map_kind.map_or(true, |k| k == self.map_kind)
    }
}

impl fmt::Display for MapContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.map_page_id, self.map_kind)
    }
}
