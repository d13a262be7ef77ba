//! Geographic items and the payloads used to create and modify them.
//!
//! An [`Item`] is what the confirmed store holds and what the view renders.
//! [`NewItem`] and [`ItemPatch`] are write payloads: the former registers an
//! item, the latter shallow-merges onto an existing one.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::DataId;
use crate::ModelError;

/// Free-form geo properties attached to an item (JSON object).
pub type GeoProperties = Map<String, Value>;

/// `[longitude, latitude]`
pub type Position = [f64; 2];

/// Item geometry, tagged the way GeoJSON tags it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point(Position),
    LineString(Vec<Position>),
    Polygon(Vec<Vec<Position>>),
}

impl Geometry {
    /// Check the minimum shape constraints of each geometry kind.
    pub fn validate(&self) -> Result<(), ModelError> {
        match self {
            Geometry::Point(p) => check_position(p),
            Geometry::LineString(line) => {
                if line.len() < 2 {
                    return Err(ModelError::InvalidGeometry(format!(
                        "line needs at least 2 positions, got {}",
                        line.len()
                    )));
                }
                line.iter().try_for_each(check_position)
            }
            Geometry::Polygon(rings) => {
                if rings.is_empty() {
                    return Err(ModelError::InvalidGeometry("polygon has no rings".into()));
                }
                for ring in rings {
                    if ring.len() < 4 {
                        return Err(ModelError::InvalidGeometry(format!(
                            "polygon ring needs at least 4 positions, got {}",
                            ring.len()
                        )));
                    }
                    if ring.first() != ring.last() {
                        return Err(ModelError::InvalidGeometry("polygon ring is not closed".into()));
                    }
                    ring.iter().try_for_each(check_position)?;
                }
                Ok(())
            }
        }
    }
}

fn check_position(p: &Position) -> Result<(), ModelError> {
    let [lon, lat] = *p;
    if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
        return Err(ModelError::InvalidGeometry(format!(
            "position [{lon}, {lat}] out of range"
        )));
    }
    Ok(())
}

/// Pointer to content attached to an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRef {
    pub content_id: DataId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// A geolocated entity as confirmed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: DataId,
    pub geometry: Geometry,
    #[serde(default)]
    pub geo_properties: GeoProperties,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// RFC 3339 timestamp of the last edit; empty for placeholders.
    #[serde(default)]
    pub last_edited_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<ContentRef>,
}

impl Item {
    /// Synthesize the placeholder shown while `payload` is being registered.
    ///
    /// Server-derived fields (edit time) stay empty.
    pub fn placeholder(temp_id: DataId, payload: &NewItem) -> Self {
        Self {
            id: temp_id,
            geometry: payload.geometry.clone(),
            geo_properties: payload.geo_properties.clone(),
            name: payload.name.clone(),
            last_edited_time: String::new(),
            content: payload.content.clone(),
        }
    }

    /// Shallow-merge `patch` onto this item. Absent fields are untouched.
    pub fn apply_patch(&mut self, patch: &ItemPatch) {
        if let Some(geometry) = &patch.geometry {
            self.geometry = geometry.clone();
        }
        if let Some(props) = &patch.geo_properties {
            self.geo_properties = props.clone();
        }
        if let Some(name) = &patch.name {
            self.name = Some(name.clone());
        }
        if let Some(content) = &patch.content {
            self.content = Some(content.clone());
        }
    }
}

/// Register payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewItem {
    pub data_source_id: String,
    pub geometry: Geometry,
    #[serde(default)]
    pub geo_properties: GeoProperties,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<ContentRef>,
}

impl NewItem {
    pub fn new(data_source_id: impl Into<String>, geometry: Geometry) -> Self {
        Self {
            data_source_id: data_source_id.into(),
            geometry,
            geo_properties: GeoProperties::new(),
            name: None,
            content: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.data_source_id.is_empty() {
            return Err(ModelError::MissingDataSource);
        }
        self.geometry.validate()
    }
}

/// Update payload: every field optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo_properties: Option<GeoProperties>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<ContentRef>,
}

impl ItemPatch {
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn geometry(geometry: Geometry) -> Self {
        Self {
            geometry: Some(geometry),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.geometry.is_none()
            && self.geo_properties.is_none()
            && self.name.is_none()
            && self.content.is_none()
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.is_empty() {
            return Err(ModelError::EmptyPatch);
        }
        match &self.geometry {
            Some(g) => g.validate(),
            None => Ok(()),
        }
    }
}
