//! Server-confirmed items, as last fetched or pushed.

use std::collections::BTreeMap;

use mapsync_core::{DataId, Item};

use crate::protocol::ServerMessage;

/// What the host should do after a realtime notification was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationEffect {
    /// Something changed on the map; fetch and merge.
    Refetch,
    /// Deleted items were dropped from the store.
    Removed(usize),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfirmedItems {
    items: BTreeMap<DataId, Item>,
}

impl ConfirmedItems {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert fetched items. Returns how many entries were new or changed.
    pub fn apply_fetch(&mut self, items: impl IntoIterator<Item = Item>) -> usize {
        let mut changed = 0;
        for item in items {
            if self.items.get(&item.id) != Some(&item) {
                changed += 1;
                self.items.insert(item.id.clone(), item);
            }
        }
        changed
    }

    pub fn remove<'a>(&mut self, ids: impl IntoIterator<Item = &'a DataId>) -> usize {
        ids.into_iter()
            .filter(|id| self.items.remove(*id).is_some())
            .count()
    }

    /// Drop everything loaded from `data_source_id`.
    pub fn unload_data_source(&mut self, data_source_id: &str) -> usize {
        let before = self.items.len();
        self.items.retain(|id, _| id.data_source_id != data_source_id);
        before - self.items.len()
    }

    /// Map unload.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Apply a realtime notification. Updates are never applied from the
    /// payload; they only ask for a re-fetch.
    pub fn apply_notification(&mut self, msg: &ServerMessage) -> NotificationEffect {
        match msg {
            ServerMessage::Updated => NotificationEffect::Refetch,
            ServerMessage::Delete { item_id_list } => {
                NotificationEffect::Removed(self.remove(item_id_list))
            }
        }
    }

    pub fn get(&self, id: &DataId) -> Option<&Item> {
        self.items.get(id)
    }

    pub fn contains(&self, id: &DataId) -> bool {
        self.items.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    pub fn as_map(&self) -> &BTreeMap<DataId, Item> {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
