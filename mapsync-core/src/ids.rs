use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Prefix marking ids allocated locally for items the server has not seen yet.
const TEMPORARY_PREFIX: &str = "tmp-";

/// Composite identifier of an item or content: unique within its data source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataId {
    pub data_source_id: String,
    pub id: String,
}

impl DataId {
    pub fn new(data_source_id: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            data_source_id: data_source_id.into(),
            id: id.into(),
        }
    }

    /// Allocate a fresh temporary id inside `data_source_id`.
    pub fn temporary(data_source_id: impl Into<String>) -> Self {
        Self {
            data_source_id: data_source_id.into(),
            id: format!("{TEMPORARY_PREFIX}{}", Uuid::new_v4()),
        }
    }

    pub fn is_temporary(&self) -> bool {
        self.id.starts_with(TEMPORARY_PREFIX)
    }
}

impl fmt::Display for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.data_source_id, self.id)
    }
}
