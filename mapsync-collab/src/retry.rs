//! One-shot retry/cancel gates for failed writes.
//!
//! A failed write parks on [`RetryCoordinator::wait_for_decision`] until the
//! host calls [`RetryCoordinator::resolve_decision`] with the user's choice.
//! There is no timeout here: an unresolved gate waits until it is resolved or
//! explicitly abandoned.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

use crate::pending::ProcessId;

#[derive(Default)]
pub struct RetryCoordinator {
    gates: Mutex<HashMap<ProcessId, oneshot::Sender<bool>>>,
}

impl RetryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suspend until a decision for `process_id` arrives. `true` means retry.
    ///
    /// A gate that is dropped without a decision resolves as cancel.
    pub async fn wait_for_decision(&self, process_id: ProcessId) -> bool {
        let (tx, rx) = oneshot::channel();
        let displaced = self.lock().insert(process_id, tx);
        if let Some(previous) = displaced {
            log::warn!("Second retry gate opened for {process_id}; cancelling the first");
            let _ = previous.send(false);
        }

        match rx.await {
            Ok(retry) => retry,
            Err(_) => {
                log::debug!("Retry gate for {process_id} dropped without a decision");
                false
            }
        }
    }

    /// Fire and remove the gate. Returns false if no gate was open.
    pub fn resolve_decision(&self, process_id: ProcessId, retry: bool) -> bool {
        let Some(gate) = self.lock().remove(&process_id) else {
            log::warn!("No retry gate open for {process_id}");
            return false;
        };
        if gate.send(retry).is_err() {
            log::debug!("Waiter for {process_id} already gone");
        }
        true
    }

    pub fn is_waiting(&self, process_id: ProcessId) -> bool {
        self.lock().contains_key(&process_id)
    }

    /// Open gates, sorted.
    pub fn open_gates(&self) -> Vec<ProcessId> {
        let mut ids: Vec<ProcessId> = self.lock().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Cancel every open gate. Returns how many were open.
    pub fn abandon_all(&self) -> usize {
        let gates: Vec<_> = self.lock().drain().collect();
        let count = gates.len();
        for (process_id, gate) in gates {
            log::debug!("Abandoning retry gate for {process_id}");
            let _ = gate.send(false);
        }
        count
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ProcessId, oneshot::Sender<bool>>> {
        self.gates.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pending::PendingOperations;
    use std::sync::Arc;
    use std::time::Duration;

    async fn wait_until_open(coord: &RetryCoordinator, pid: ProcessId) {
        for _ in 0..200 {
            if coord.is_waiting(pid) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("gate for {pid} never opened");
    }

    #[tokio::test]
    async fn test_resolve_retry() {
        let coord = Arc::new(RetryCoordinator::new());
        let pid = PendingOperations::new().allocate_id();

        let waiter = tokio::spawn({
            let coord = coord.clone();
            async move { coord.wait_for_decision(pid).await }
        });
        wait_until_open(&coord, pid).await;

        assert!(coord.resolve_decision(pid, true));
        assert!(waiter.await.unwrap());
        assert!(!coord.is_waiting(pid));
    }

    #[tokio::test]
    async fn test_resolve_cancel() {
        let coord = Arc::new(RetryCoordinator::new());
        let pid = PendingOperations::new().allocate_id();

        let waiter = tokio::spawn({
            let coord = coord.clone();
            async move { coord.wait_for_decision(pid).await }
        });
        wait_until_open(&coord, pid).await;

        coord.resolve_decision(pid, false);
        assert!(!waiter.await.unwrap());
    }

    #[test]
    fn test_resolve_without_gate() {
        let coord = RetryCoordinator::new();
        let pid = PendingOperations::new().allocate_id();
        assert!(!coord.resolve_decision(pid, true));
    }

    #[tokio::test]
    async fn test_second_gate_displaces_first() {
        let coord = Arc::new(RetryCoordinator::new());
        let pid = PendingOperations::new().allocate_id();

        let first = tokio::spawn({
            let coord = coord.clone();
            async move { coord.wait_for_decision(pid).await }
        });
        wait_until_open(&coord, pid).await;

        let second = tokio::spawn({
            let coord = coord.clone();
            async move { coord.wait_for_decision(pid).await }
        });

        // The displaced waiter resolves as cancel once the second gate opens.
        assert!(!first.await.unwrap());
        assert!(coord.is_waiting(pid));
        assert_eq!(coord.open_gates(), vec![pid]);

        assert!(coord.resolve_decision(pid, true));
        assert!(second.await.unwrap());
        assert!(!coord.is_waiting(pid));
    }

    #[tokio::test]
    async fn test_abandon_all_cancels_waiters() {
        let coord = Arc::new(RetryCoordinator::new());
        let ids = PendingOperations::new();
        let (p1, p2) = (ids.allocate_id(), ids.allocate_id());

        let w1 = tokio::spawn({
            let coord = coord.clone();
            async move { coord.wait_for_decision(p1).await }
        });
        let w2 = tokio::spawn({
            let coord = coord.clone();
            async move { coord.wait_for_decision(p2).await }
        });
        wait_until_open(&coord, p1).await;
        wait_until_open(&coord, p2).await;
        assert_eq!(coord.open_gates(), vec![p1, p2]);

        assert_eq!(coord.abandon_all(), 2);
        assert!(!w1.await.unwrap());
        assert!(!w2.await.unwrap());
        assert!(coord.open_gates().is_empty());
    }
}
