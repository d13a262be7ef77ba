//! Optimistic item writes with user-driven retry.
//!
//! Each write is recorded as an [`ItemProcess`] before the network call, so
//! the view shows it immediately. Success removes the process; the confirmed
//! store catches up through the next fetch. Failure flags the process and
//! parks the write on the retry gate until the host calls
//! [`ItemEditor::continue_process`].
//!
//! Once issued, a write runs to a decision. Dropping the UI that started it
//! does not cancel it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use mapsync_core::{DataId, ItemPatch, ModelError, NewItem};

use crate::pending::{ItemProcess, PendingOperations, ProcessId, ProcessStatus};
use crate::retry::RetryCoordinator;

/// Failure of a single write attempt.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("rejected by server: {0}")]
    Rejected(String),
    #[error("no response within {0:?}")]
    Timeout(Duration),
}

/// Errors returned before a write is issued.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EditorError {
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] ModelError),
}

/// Request/response calls for item writes, provided by the host.
pub trait ItemTransport: Send + Sync {
    /// Create an item; resolves to its server-assigned id.
    fn register_item(
        &self,
        payload: &NewItem,
    ) -> impl Future<Output = Result<DataId, TransportError>> + Send;

    fn update_item(
        &self,
        target: &DataId,
        patch: &ItemPatch,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn delete_item(&self, target: &DataId) -> impl Future<Output = Result<(), TransportError>> + Send;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditorConfig {
    /// Fail an attempt that has not answered within this long.
    /// `None` waits indefinitely.
    pub write_timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome<T> {
    Committed(T),
    /// The user chose not to retry after a failure.
    Cancelled,
}

impl<T> WriteOutcome<T> {
    pub fn is_committed(&self) -> bool {
        matches!(self, WriteOutcome::Committed(_))
    }
}

pub struct ItemEditor<T> {
    transport: T,
    pending: Arc<PendingOperations>,
    retry: Arc<RetryCoordinator>,
    config: EditorConfig,
}

impl<T: ItemTransport> ItemEditor<T> {
    pub fn new(transport: T, config: EditorConfig) -> Self {
        Self {
            transport,
            pending: Arc::new(PendingOperations::new()),
            retry: Arc::new(RetryCoordinator::new()),
            config,
        }
    }

    pub fn pending(&self) -> &Arc<PendingOperations> {
        &self.pending
    }

    pub fn retry(&self) -> &Arc<RetryCoordinator> {
        &self.retry
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Deliver the user's decision for a failed process.
    pub fn continue_process(&self, process_id: ProcessId, retry: bool) -> bool {
        self.retry.resolve_decision(process_id, retry)
    }

    pub async fn register_item(&self, payload: NewItem) -> Result<WriteOutcome<DataId>, EditorError> {
        payload.validate()?;
        let process_id = self.pending.allocate_id();
        let temp_id = DataId::temporary(payload.data_source_id.clone());
        self.pending.insert(ItemProcess::new(
            process_id,
            ProcessStatus::Registering {
                temp_id,
                payload: payload.clone(),
            },
        ));

        let payload = &payload;
        Ok(self
            .drive(process_id, move || self.transport.register_item(payload))
            .await)
    }

    pub async fn update_item(
        &self,
        target: DataId,
        patch: ItemPatch,
    ) -> Result<WriteOutcome<()>, EditorError> {
        patch.validate()?;
        let process_id = self.pending.allocate_id();
        self.pending.insert(ItemProcess::new(
            process_id,
            ProcessStatus::Updating {
                target: target.clone(),
                patch: patch.clone(),
            },
        ));

        let (target, patch) = (&target, &patch);
        Ok(self
            .drive(process_id, move || self.transport.update_item(target, patch))
            .await)
    }

    pub async fn delete_item(&self, target: DataId) -> Result<WriteOutcome<()>, EditorError> {
        let process_id = self.pending.allocate_id();
        self.pending.insert(ItemProcess::new(
            process_id,
            ProcessStatus::Deleting {
                target: target.clone(),
            },
        ));

        let target = &target;
        Ok(self
            .drive(process_id, move || self.transport.delete_item(target))
            .await)
    }

    /// Issue, and on failure park on the retry gate until a decision.
    async fn drive<R, F, Fut>(&self, process_id: ProcessId, mut issue: F) -> WriteOutcome<R>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, TransportError>>,
    {
        loop {
            match self.attempt(issue()).await {
                Ok(value) => {
                    self.pending.remove(process_id);
                    log::debug!("Process {process_id} committed");
                    return WriteOutcome::Committed(value);
                }
                Err(e) => {
                    log::warn!("Process {process_id} failed: {e}");
                    self.pending.set_error(process_id, true);

                    if !self.retry.wait_for_decision(process_id).await {
                        self.pending.remove(process_id);
                        log::info!("Process {process_id} cancelled");
                        return WriteOutcome::Cancelled;
                    }

                    log::info!("Retrying process {process_id}");
                    self.pending.set_error(process_id, false);
                }
            }
        }
    }

    async fn attempt<R>(
        &self,
        call: impl Future<Output = Result<R, TransportError>>,
    ) -> Result<R, TransportError> {
        match self.config.write_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or(Err(TransportError::Timeout(limit))),
            None => call.await,
        }
    }
}
