//! Host-injected overrides applied on top of everything else in the view.
//!
//! The host owns these entries outright: nothing here expires or reacts to
//! network state.

use mapsync_core::{DataId, Item, ItemPatch};

#[derive(Debug, Clone, PartialEq)]
pub enum OverrideItem {
    /// Show an item that does not exist on the server. Keyed by `item.id`,
    /// normally a temporary id.
    New(Item),
    Update { target: DataId, patch: ItemPatch },
    Delete { target: DataId },
}

impl OverrideItem {
    pub fn key(&self) -> &DataId {
        match self {
            OverrideItem::New(item) => &item.id,
            OverrideItem::Update { target, .. } | OverrideItem::Delete { target } => target,
        }
    }
}

/// Ordered override list; later entries apply after earlier ones.
#[derive(Debug, Clone, Default)]
pub struct OverrideStore {
    entries: Vec<OverrideItem>,
}

impl OverrideStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: OverrideItem) {
        self.entries.push(entry);
    }

    pub fn replace_all(&mut self, entries: Vec<OverrideItem>) {
        self.entries = entries;
    }

    /// Remove every entry keyed by `key`. Returns how many were removed.
    pub fn remove(&mut self, key: &DataId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.key() != key);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn as_slice(&self) -> &[OverrideItem] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &OverrideItem> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_by_key_keeps_order_of_others() {
        let a = DataId::new("ds1", "a");
        let b = DataId::new("ds1", "b");
        let mut store = OverrideStore::new();
        store.push(OverrideItem::Delete { target: a.clone() });
        store.push(OverrideItem::Update {
            target: b.clone(),
            patch: ItemPatch::name("B"),
        });
        store.push(OverrideItem::Update {
            target: a.clone(),
            patch: ItemPatch::name("A"),
        });

        assert_eq!(store.remove(&a), 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.as_slice()[0].key(), &b);
    }

    #[test]
    fn test_replace_and_clear() {
        let mut store = OverrideStore::new();
        store.replace_all(vec![OverrideItem::Delete {
            target: DataId::new("ds1", "x"),
        }]);
        assert_eq!(store.len(), 1);
        store.clear();
        assert!(store.is_empty());
    }
}
