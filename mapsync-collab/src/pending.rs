//! In-flight optimistic writes.
//!
//! Every register/update/delete issued by this client lives here as an
//! [`ItemProcess`] from the moment it starts until it is confirmed or the user
//! cancels it:
//!
//! ```text
//! issue ──► InFlight ──success──► removed
//!              │
//!              └─error──► Flagged ──retry──► InFlight
//!                            │
//!                            └─cancel──► removed
//! ```
//!
//! The store only records state. Driving the network call and the retry gate
//! is the editor's job.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

use mapsync_core::{DataId, ItemPatch, NewItem};

/// Process-local, monotonically allocated operation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(u64);

impl ProcessId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessStatus {
    /// Creating an item; rendered under `temp_id` until the server confirms.
    Registering { temp_id: DataId, payload: NewItem },
    Updating { target: DataId, patch: ItemPatch },
    Deleting { target: DataId },
}

/// A write this client has started but not finished.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemProcess {
    pub process_id: ProcessId,
    pub status: ProcessStatus,
    /// Set when the last attempt failed and a retry/cancel decision is pending.
    pub error: bool,
}

impl ItemProcess {
    pub fn new(process_id: ProcessId, status: ProcessStatus) -> Self {
        Self {
            process_id,
            status,
            error: false,
        }
    }

    /// The item this process renders over.
    pub fn target(&self) -> &DataId {
        match &self.status {
            ProcessStatus::Registering { temp_id, .. } => temp_id,
            ProcessStatus::Updating { target, .. } | ProcessStatus::Deleting { target } => target,
        }
    }
}

/// Ordered table of in-flight processes with a change revision.
pub struct PendingOperations {
    next_id: AtomicU64,
    processes: Mutex<BTreeMap<ProcessId, ItemProcess>>,
    revision: watch::Sender<u64>,
}

impl PendingOperations {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            next_id: AtomicU64::new(1),
            processes: Mutex::new(BTreeMap::new()),
            revision,
        }
    }

    pub fn allocate_id(&self) -> ProcessId {
        ProcessId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn insert(&self, process: ItemProcess) {
        log::debug!("Process {} started on {}", process.process_id, process.target());
        self.lock().insert(process.process_id, process);
        self.bump();
    }

    pub fn remove(&self, process_id: ProcessId) -> Option<ItemProcess> {
        let removed = self.lock().remove(&process_id);
        if removed.is_some() {
            self.bump();
        }
        removed
    }

    /// Flag or clear the error on a process. Returns false if it is gone.
    pub fn set_error(&self, process_id: ProcessId, error: bool) -> bool {
        let changed = match self.lock().get_mut(&process_id) {
            Some(process) => {
                process.error = error;
                true
            }
            None => false,
        };
        if changed {
            self.bump();
        }
        changed
    }

    pub fn get(&self, process_id: ProcessId) -> Option<ItemProcess> {
        self.lock().get(&process_id).cloned()
    }

    /// All processes in id (start) order.
    pub fn snapshot(&self) -> Vec<ItemProcess> {
        self.lock().values().cloned().collect()
    }

    /// Processes currently waiting on a retry/cancel decision.
    pub fn failed(&self) -> Vec<ProcessId> {
        self.lock()
            .values()
            .filter(|p| p.error)
            .map(|p| p.process_id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Receiver that observes a new revision on every change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<ProcessId, ItemProcess>> {
        self.processes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for PendingOperations {
    fn default() -> Self {
        Self::new()
    }
}
