//! Derive the renderable item set from confirmed, pending and override state.
//!
//! Layers apply in a fixed order, later ones winning on conflicting fields:
//!
//! ```text
//! ConfirmedItems ──► ItemProcess overlay ──► OverrideItem overlay ──► ComposedView
//!  (server truth)     (this client's writes)   (host, authoritative)
//! ```
//!
//! `compose` is pure: it copies the confirmed items and never touches its
//! inputs, so the same inputs always produce the same view.

use std::collections::BTreeMap;

use mapsync_core::{DataId, Item};

use crate::confirmed::ConfirmedItems;
use crate::overrides::OverrideItem;
use crate::pending::{ItemProcess, ProcessId, ProcessStatus};

/// Why an item looks the way it does in the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    Confirmed,
    /// Placeholder for an item being created.
    Registering { process_id: ProcessId, error: bool },
    Updating { process_id: ProcessId, error: bool },
    /// A delete that failed; kept visible until retried or cancelled.
    Deleting { process_id: ProcessId },
    Overridden,
}

impl ViewState {
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            ViewState::Registering { .. } | ViewState::Updating { .. } | ViewState::Deleting { .. }
        )
    }

    pub fn has_error(&self) -> bool {
        match self {
            ViewState::Registering { error, .. } | ViewState::Updating { error, .. } => *error,
            ViewState::Deleting { .. } => true,
            ViewState::Confirmed | ViewState::Overridden => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewItem {
    pub item: Item,
    pub state: ViewState,
}

/// Renderable items ordered by [`DataId`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComposedView {
    items: BTreeMap<DataId, ViewItem>,
}

impl ComposedView {
    pub fn get(&self, id: &DataId) -> Option<&ViewItem> {
        self.items.get(id)
    }

    pub fn contains(&self, id: &DataId) -> bool {
        self.items.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ViewItem> {
        self.items.values()
    }

    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.items.values().map(|v| &v.item)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Compose the view. `pending` is applied in slice order, as is `overrides`.
pub fn compose(
    confirmed: &ConfirmedItems,
    pending: &[ItemProcess],
    overrides: &[OverrideItem],
) -> ComposedView {
    let mut items: BTreeMap<DataId, ViewItem> = confirmed
        .iter()
        .map(|item| {
            (
                item.id.clone(),
                ViewItem {
                    item: item.clone(),
                    state: ViewState::Confirmed,
                },
            )
        })
        .collect();

    for process in pending {
        apply_process(&mut items, process);
    }
    for entry in overrides {
        apply_override(&mut items, entry);
    }

    ComposedView { items }
}

fn apply_process(items: &mut BTreeMap<DataId, ViewItem>, process: &ItemProcess) {
    let process_id = process.process_id;
    let error = process.error;
    match &process.status {
        ProcessStatus::Registering { temp_id, payload } => {
            items.insert(
                temp_id.clone(),
                ViewItem {
                    item: Item::placeholder(temp_id.clone(), payload),
                    state: ViewState::Registering { process_id, error },
                },
            );
        }
        ProcessStatus::Updating { target, patch } => match items.get_mut(target) {
            Some(view) => {
                view.item.apply_patch(patch);
                view.state = ViewState::Updating { process_id, error };
            }
            None => log::debug!("Update {process_id} targets {target}, which is not loaded"),
        },
        ProcessStatus::Deleting { target } => {
            if error {
                if let Some(view) = items.get_mut(target) {
                    view.state = ViewState::Deleting { process_id };
                }
            } else {
                items.remove(target);
            }
        }
    }
}

fn apply_override(items: &mut BTreeMap<DataId, ViewItem>, entry: &OverrideItem) {
    match entry {
        OverrideItem::New(item) => {
            items.insert(
                item.id.clone(),
                ViewItem {
                    item: item.clone(),
                    state: ViewState::Overridden,
                },
            );
        }
        OverrideItem::Update { target, patch } => match items.get_mut(target) {
            Some(view) => {
                view.item.apply_patch(patch);
                view.state = ViewState::Overridden;
            }
            None => log::warn!("Override update targets missing item {target}"),
        },
        OverrideItem::Delete { target } => {
            items.remove(target);
        }
    }
}
