//! Per-session record of items already delivered by a fetch.
//!
//! A fetch response skips items the session already holds. The set grows as
//! responses are sent, shrinks when those items change elsewhere, and is
//! cleared whenever the session switches map or loses its socket.

use std::collections::HashSet;

use mapsync_core::DataId;

#[derive(Debug, Clone, Default)]
pub struct DeliveredItems {
    ids: HashSet<DataId>,
}

impl DeliveredItems {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_already_delivered(&self, id: &DataId) -> bool {
        self.ids.contains(id)
    }

    /// Record ids about to be sent in a fetch response.
    pub fn record_delivered<'a>(&mut self, ids: impl IntoIterator<Item = &'a DataId>) {
        self.ids.extend(ids.into_iter().cloned());
    }

    /// Forget ids so the next fetch returns them again. Unknown ids are ignored.
    ///
    /// Returns how many ids were actually removed.
    pub fn invalidate<'a>(&mut self, ids: impl IntoIterator<Item = &'a DataId>) -> usize {
        ids.into_iter().filter(|id| self.ids.remove(*id)).count()
    }

    pub fn reset(&mut self) {
        self.ids.clear();
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
