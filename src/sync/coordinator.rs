use log::{debug, info, warn};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::operations::{DeletionOperation, SyncContext, UploadOperation};
use super::{DrainReport, PendingOperationQueue, QueuedOperation};
use crate::connectivity::ConnectivityEvent;
use crate::error::SyncError;
use crate::events::Event;
use crate::models::{Track, TrackId, TrackMetadata};
use crate::storage::KeyValueStore;

/// Result of one pass over both queues
#[derive(Debug, Default)]
pub struct SyncReport {
    pub deletions: DrainReport,
    pub uploads: DrainReport,
}

/// How a deletion was routed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionPlan {
    /// The track never reached the catalog; its pending upload was dropped
    UploadCancelled,
    /// Queued for the catalog
    Queued(Uuid),
    /// The upload is running right now; the catalog copy is deleted once it
    /// finishes
    AfterUpload,
}

/// Owns the upload and deletion queues
///
/// Conflicting operations on one track resolve last-writer-wins: deleting a
/// track whose upload is still pending cancels the upload, so nothing about
/// the track is sent to the catalog.
pub struct SyncCoordinator {
    ctx: Arc<SyncContext>,
    uploads: PendingOperationQueue<UploadOperation>,
    deletions: PendingOperationQueue<DeletionOperation>,
    /// Temporary ids deleted while their upload was in flight
    tombstones: Mutex<HashSet<TrackId>>,
}

impl SyncCoordinator {
    pub fn open(store: Arc<dyn KeyValueStore>, ctx: Arc<SyncContext>) -> Result<Self, SyncError> {
        Ok(Self {
            uploads: PendingOperationQueue::open(store.clone(), ctx.clone())?,
            deletions: PendingOperationQueue::open(store, ctx.clone())?,
            ctx,
            tombstones: Mutex::new(HashSet::new()),
        })
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.ctx
    }

    pub fn pending_uploads(&self) -> Vec<QueuedOperation<UploadOperation>> {
        self.uploads.snapshot()
    }

    pub fn pending_deletions(&self) -> Vec<QueuedOperation<DeletionOperation>> {
        self.deletions.snapshot()
    }

    pub fn pending_count(&self) -> usize {
        self.uploads.len() + self.deletions.len()
    }

    /// Queue an upload of a local track keyed by a temporary id
    pub async fn enqueue_upload(
        &self,
        track: Track,
        path: PathBuf,
        metadata: TrackMetadata,
    ) -> Result<Uuid, SyncError> {
        self.uploads
            .enqueue(UploadOperation::new(track, path, metadata))
            .await
    }

    /// Queue the catalog side of a deletion
    ///
    /// `local_path` is a cache-owned file to remove once the catalog agrees.
    pub async fn enqueue_deletion(
        &self,
        id: &TrackId,
        local_path: Option<PathBuf>,
    ) -> Result<DeletionPlan, SyncError> {
        if !id.is_temporary() {
            let queued = self
                .deletions
                .enqueue(DeletionOperation::new(id.clone(), local_path))
                .await?;
            return Ok(DeletionPlan::Queued(queued));
        }

        let cancelled = self
            .uploads
            .cancel_where(|upload| upload.temp_id() == Some(id))?;
        if !cancelled.is_empty() {
            DeletionOperation::new(id.clone(), local_path).remove_local_file();
            info!("Deleted {} before it was uploaded", id);
            return Ok(DeletionPlan::UploadCancelled);
        }

        if let Some(remote_id) = self.ctx.reconciled_id(id) {
            debug!("{} was already uploaded as {}", id, remote_id);
            let queued = self
                .deletions
                .enqueue(DeletionOperation::new(remote_id, local_path))
                .await?;
            return Ok(DeletionPlan::Queued(queued));
        }

        self.tombstones
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone());
        Ok(DeletionPlan::AfterUpload)
    }

    /// Handle a finished upload whose track was deleted meanwhile
    async fn on_reconciled(&self, from: &TrackId, to: &TrackId) {
        let tombstoned = self
            .tombstones
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(from);
        if !tombstoned {
            return;
        }

        info!("{} was deleted during its upload, deleting {}", from, to);
        self.ctx.cache.remove(to);
        if let Err(err) = self
            .deletions
            .enqueue(DeletionOperation::new(to.clone(), None))
            .await
        {
            warn!("Failed to queue deletion of {}: {}", to, err);
        }
    }

    /// Drain deletions, then uploads
    pub async fn sync_now(&self) -> SyncReport {
        let deletions = self.deletions.drain().await;
        let uploads = self.uploads.drain().await;
        SyncReport { deletions, uploads }
    }

    /// Drain on every transition to online and follow finished uploads
    pub fn spawn_worker(self: Arc<Self>) -> JoinHandle<()> {
        let mut connectivity = self.ctx.connectivity.subscribe();
        let mut events = self.ctx.events.subscribe();

        tokio::spawn(async move {
            if self.ctx.connectivity.mode().is_online() {
                self.sync_now().await;
            }

            loop {
                tokio::select! {
                    event = connectivity.recv() => match event {
                        Ok(ConnectivityEvent::ModeChanged(mode)) if mode.is_online() => {
                            info!("Back online, syncing {} pending operations", self.pending_count());
                            self.sync_now().await;
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(_)) => {
                            if self.ctx.connectivity.mode().is_online() {
                                self.sync_now().await;
                            }
                        }
                        Err(RecvError::Closed) => break,
                    },
                    event = events.recv() => match event {
                        Ok(Event::TrackReconciled { from, to }) => self.on_reconciled(&from, &to).await,
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Sync worker missed {} events", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            debug!("Sync worker stopped");
        })
    }
}
