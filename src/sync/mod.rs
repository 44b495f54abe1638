//! Durable retry queues that replay local mutations against the catalog.

pub mod coordinator;
pub mod operations;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::error::{CatalogError, SyncError};
use crate::storage::{self, KeyValueStore};

pub use coordinator::{DeletionPlan, SyncCoordinator, SyncReport};
pub use operations::{DeletionOperation, PendingOperation, SyncContext, UploadOperation};

/// An operation with its identity and enqueue time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation<O> {
    pub id: Uuid,
    pub enqueued_at: DateTime<Utc>,
    pub operation: O,
}

/// What one drain pass did
#[derive(Debug, Default)]
pub struct DrainReport {
    pub completed: Vec<Uuid>,
    /// Dropped after a domain failure; retrying would not help
    pub failed: Vec<(Uuid, CatalogError)>,
    /// Moved to the tail after a transient failure, which ended the pass
    pub requeued: Option<Uuid>,
    /// Another drain was already running
    pub skipped: bool,
    /// Stopped because the effective mode is offline
    pub deferred: bool,
}

impl DrainReport {
    pub fn attempted(&self) -> usize {
        self.completed.len() + self.failed.len() + usize::from(self.requeued.is_some())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Empty,
    Failure,
    Offline,
}

/// Resets the drain flag when a drain ends, even if its future is dropped
struct DrainGuard<'a>(&'a AtomicBool);

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// FIFO of pending operations persisted on every mutation
///
/// An operation leaves the queue only after its remote call succeeded or
/// failed in a way retrying cannot fix. A transient failure moves it to the
/// tail and ends the pass, so one failing item cannot starve the rest.
pub struct PendingOperationQueue<O: PendingOperation> {
    items: Mutex<VecDeque<QueuedOperation<O>>>,
    store: Arc<dyn KeyValueStore>,
    ctx: Arc<SyncContext>,
    draining: AtomicBool,
    /// Operation whose remote call is running; it cannot be cancelled
    in_flight: Mutex<Option<Uuid>>,
}

impl<O: PendingOperation> PendingOperationQueue<O> {
    /// Open the queue, restoring whatever was persisted
    pub fn open(store: Arc<dyn KeyValueStore>, ctx: Arc<SyncContext>) -> Result<Self, SyncError> {
        let items: VecDeque<QueuedOperation<O>> =
            storage::load_json(store.as_ref(), O::STORAGE_KEY)?.unwrap_or_default();
        if !items.is_empty() {
            info!("Restored {} pending {} operations", items.len(), O::KIND);
        }

        Ok(Self {
            items: Mutex::new(items),
            store,
            ctx,
            draining: AtomicBool::new(false),
            in_flight: Mutex::new(None),
        })
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<QueuedOperation<O>>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn in_flight(&self) -> MutexGuard<'_, Option<Uuid>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, items: &VecDeque<QueuedOperation<O>>) -> Result<(), SyncError> {
        storage::save_json(self.store.as_ref(), O::STORAGE_KEY, items)?;
        Ok(())
    }

    /// Persist after a drain step; the in-memory queue stays authoritative
    fn persist_logged(&self, items: &VecDeque<QueuedOperation<O>>) {
        if let Err(err) = self.persist(items) {
            warn!("Failed to persist pending {} queue: {}", O::KIND, err);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<QueuedOperation<O>> {
        self.lock().iter().cloned().collect()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Append without attempting delivery
    pub fn push(&self, operation: O) -> Result<Uuid, SyncError> {
        let queued = QueuedOperation {
            id: Uuid::new_v4(),
            enqueued_at: Utc::now(),
            operation,
        };
        let id = queued.id;

        let mut items = self.lock();
        debug!("Queued {} ({})", queued.operation.describe(), id);
        items.push_back(queued);
        self.persist(&items)?;
        Ok(id)
    }

    /// Append and, when online, deliver right away
    pub async fn enqueue(&self, operation: O) -> Result<Uuid, SyncError> {
        let id = self.push(operation)?;
        if self.ctx.connectivity.mode().is_online() {
            let report = self.drain().await;
            debug!("Inline {} drain attempted {} operations", O::KIND, report.attempted());
        }
        Ok(id)
    }

    /// Remove queued operations matching `predicate`, returning them
    ///
    /// The operation currently being delivered is never cancelled.
    pub fn cancel_where<P>(&self, mut predicate: P) -> Result<Vec<QueuedOperation<O>>, SyncError>
    where
        P: FnMut(&O) -> bool,
    {
        let mut items = self.lock();
        let in_flight = *self.in_flight();
        let mut cancelled = Vec::new();
        let mut kept = VecDeque::with_capacity(items.len());
        for item in items.drain(..) {
            if Some(item.id) != in_flight && predicate(&item.operation) {
                cancelled.push(item);
            } else {
                kept.push_back(item);
            }
        }
        *items = kept;

        if !cancelled.is_empty() {
            info!("Cancelled {} pending {} operations", cancelled.len(), O::KIND);
            self.persist(&items)?;
        }
        Ok(cancelled)
    }

    /// Deliver queued operations in order
    ///
    /// Only one drain runs at a time; a concurrent call returns immediately
    /// with `skipped` set.
    pub async fn drain(&self) -> DrainReport {
        let mut report = DrainReport::default();

        loop {
            let Some(guard) = DrainGuard::acquire(&self.draining) else {
                report.skipped = report.attempted() == 0;
                return report;
            };
            let stop = self.drain_pass(&mut report).await;
            drop(guard);

            // Items pushed while the pass was finishing saw the flag still set
            if stop != Stop::Empty || self.is_empty() {
                break;
            }
        }

        if report.attempted() > 0 {
            info!(
                "Pending {} drain: {} completed, {} failed, {} requeued",
                O::KIND,
                report.completed.len(),
                report.failed.len(),
                usize::from(report.requeued.is_some())
            );
        }
        report
    }

    async fn drain_pass(&self, report: &mut DrainReport) -> Stop {
        loop {
            if !self.ctx.connectivity.mode().is_online() {
                report.deferred = true;
                return Stop::Offline;
            }

            let head = {
                let items = self.lock();
                let Some(head) = items.front().cloned() else {
                    *self.in_flight() = None;
                    return Stop::Empty;
                };
                *self.in_flight() = Some(head.id);
                head
            };

            let result = head.operation.perform(&self.ctx).await;

            let mut items = self.lock();
            *self.in_flight() = None;
            let position = items.iter().position(|item| item.id == head.id);
            match result {
                Ok(()) => {
                    debug!("Completed {}", head.operation.describe());
                    if let Some(position) = position {
                        items.remove(position);
                    }
                    self.persist_logged(&items);
                    report.completed.push(head.id);
                }
                Err(err) if err.is_transient() => {
                    warn!("Will retry {}: {}", head.operation.describe(), err);
                    if let Some(item) = position.and_then(|p| items.remove(p)) {
                        items.push_back(item);
                    }
                    self.persist_logged(&items);
                    report.requeued = Some(head.id);
                    return Stop::Failure;
                }
                Err(err) => {
                    warn!("Dropping {}: {}", head.operation.describe(), err);
                    if let Some(position) = position {
                        items.remove(position);
                    }
                    self.persist_logged(&items);
                    report.failed.push((head.id, err));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TrackCache;
    use crate::connectivity::ConnectivityMonitor;
    use crate::events::EventBus;
    use crate::models::TrackId;
    use crate::storage::MemoryStore;
    use crate::testing::MockCatalog;

    struct Fixture {
        catalog: Arc<MockCatalog>,
        connectivity: Arc<ConnectivityMonitor>,
        store: Arc<MemoryStore>,
        ctx: Arc<SyncContext>,
    }

    fn fixture(connected: bool) -> Fixture {
        let catalog = Arc::new(MockCatalog::new());
        let connectivity = Arc::new(ConnectivityMonitor::new(connected, false));
        let store = Arc::new(MemoryStore::new());
        let ctx = Arc::new(SyncContext::new(
            catalog.clone(),
            Arc::new(TrackCache::new(10)),
            EventBus::new(16),
            connectivity.clone(),
        ));
        Fixture {
            catalog,
            connectivity,
            store,
            ctx,
        }
    }

    fn deletion(id: &str) -> DeletionOperation {
        DeletionOperation::new(TrackId::new(id), None)
    }

    fn open_queue(f: &Fixture) -> PendingOperationQueue<DeletionOperation> {
        PendingOperationQueue::open(f.store.clone(), f.ctx.clone()).unwrap()
    }

    #[tokio::test]
    async fn test_enqueue_while_disconnected_makes_no_remote_call() {
        let f = fixture(false);
        let queue = open_queue(&f);

        queue.enqueue(deletion("1")).await.unwrap();
        queue.enqueue(deletion("2")).await.unwrap();

        assert_eq!(queue.len(), 2);
        assert!(f.catalog.calls().is_empty());
    }

    #[tokio::test]
    async fn test_restored_connectivity_drains_in_order() {
        let f = fixture(false);
        let queue = open_queue(&f);
        for id in ["1", "2", "3"] {
            queue.enqueue(deletion(id)).await.unwrap();
        }

        f.connectivity.set_connected(true);
        let report = queue.drain().await;

        assert_eq!(report.completed.len(), 3);
        assert!(queue.is_empty());
        assert_eq!(f.catalog.calls(), vec!["delete:1", "delete:2", "delete:3"]);
    }

    #[tokio::test]
    async fn test_transient_failure_moves_head_to_tail_and_stops() {
        let f = fixture(false);
        let queue = open_queue(&f);
        for id in ["1", "2", "3"] {
            queue.enqueue(deletion(id)).await.unwrap();
        }
        f.catalog.fail_next("delete:1", CatalogError::Network("reset".to_string()));
        f.connectivity.set_connected(true);

        let first = queue.drain().await;
        assert!(first.requeued.is_some());
        assert!(first.completed.is_empty());
        assert_eq!(f.catalog.calls(), vec!["delete:1"]);

        let order: Vec<String> = queue
            .snapshot()
            .into_iter()
            .map(|item| item.operation.id.to_string())
            .collect();
        assert_eq!(order, vec!["2", "3", "1"]);

        // Items behind the failing one get their turn on the next pass
        let second = queue.drain().await;
        assert_eq!(second.completed.len(), 3);
        assert_eq!(
            f.catalog.calls(),
            vec!["delete:1", "delete:2", "delete:3", "delete:1"]
        );
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_domain_failure_is_dropped_and_reported() {
        let f = fixture(true);
        let queue = open_queue(&f);
        f.catalog.fail_next("delete:1", CatalogError::Conflict("1".to_string()));

        queue.push(deletion("1")).unwrap();
        queue.push(deletion("2")).unwrap();
        let report = queue.drain().await;

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.completed.len(), 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_queue_survives_restart() {
        let f = fixture(false);
        {
            let queue = open_queue(&f);
            queue.enqueue(deletion("1")).await.unwrap();
            queue.enqueue(deletion("2")).await.unwrap();
        }

        let reopened = open_queue(&f);
        let ids: Vec<String> = reopened
            .snapshot()
            .into_iter()
            .map(|item| item.operation.id.to_string())
            .collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_second_drain_is_a_no_op_while_running() {
        let f = fixture(true);
        f.catalog.set_delay(std::time::Duration::from_millis(50));
        let queue = Arc::new(open_queue(&f));
        queue.push(deletion("1")).unwrap();

        let running = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.drain().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(queue.is_draining());

        let concurrent = queue.drain().await;
        assert!(concurrent.skipped);

        let report = running.await.unwrap();
        assert_eq!(report.completed.len(), 1);
        assert_eq!(f.catalog.calls(), vec!["delete:1"]);
        assert!(!queue.is_draining());
    }

    #[tokio::test]
    async fn test_cancel_where() {
        let f = fixture(false);
        let queue = open_queue(&f);
        queue.push(deletion("1")).unwrap();
        queue.push(deletion("2")).unwrap();

        let cancelled = queue.cancel_where(|op| op.id == TrackId::new("1")).unwrap();
        assert_eq!(cancelled.len(), 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(open_queue(&f).len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_skips_operation_in_flight() {
        let f = fixture(true);
        f.catalog.set_delay(std::time::Duration::from_millis(50));
        let queue = Arc::new(open_queue(&f));
        queue.push(deletion("1")).unwrap();

        let running = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.drain().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let cancelled = queue.cancel_where(|_| true).unwrap();
        assert!(cancelled.is_empty());

        let report = running.await.unwrap();
        assert_eq!(report.completed.len(), 1);
        assert!(queue.is_empty());
    }
}
