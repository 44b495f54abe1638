use async_trait::async_trait;
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::cache::TrackCache;
use crate::catalog::RemoteCatalogClient;
use crate::connectivity::ConnectivityMonitor;
use crate::error::CatalogError;
use crate::events::{Event, EventBus};
use crate::models::{CacheEntry, Track, TrackId, TrackMetadata};
use crate::storage::{PENDING_DELETIONS_KEY, PENDING_UPLOADS_KEY};

/// Collaborators a pending operation needs when it runs
pub struct SyncContext {
    pub catalog: Arc<dyn RemoteCatalogClient>,
    pub cache: Arc<TrackCache>,
    pub events: EventBus,
    pub connectivity: Arc<ConnectivityMonitor>,
    /// Temporary ids mapped to the ids the catalog assigned
    reconciled: Mutex<HashMap<TrackId, TrackId>>,
}

impl SyncContext {
    pub fn new(
        catalog: Arc<dyn RemoteCatalogClient>,
        cache: Arc<TrackCache>,
        events: EventBus,
        connectivity: Arc<ConnectivityMonitor>,
    ) -> Self {
        Self {
            catalog,
            cache,
            events,
            connectivity,
            reconciled: Mutex::new(HashMap::new()),
        }
    }

    /// The catalog id a temporary id was reconciled to, if any
    pub fn reconciled_id(&self, temp_id: &TrackId) -> Option<TrackId> {
        self.reconciled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(temp_id)
            .cloned()
    }

    /// Swap a temporary id for its catalog id everywhere local state keeps it
    pub fn reconcile(&self, local: &Track, remote_id: TrackId) -> Track {
        let remote = local.with_id(remote_id.clone());

        if let Some(temp_id) = local.id.as_ref() {
            self.reconciled
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(temp_id.clone(), remote_id.clone());

            if !self.cache.rekey(temp_id, remote.clone()) {
                let mut entry = CacheEntry::new(remote.clone());
                entry.local_path = local.source.local_path().cloned();
                self.cache.insert(entry);
            }

            self.events.emit(Event::TrackReconciled {
                from: temp_id.clone(),
                to: remote_id,
            });
        } else {
            let mut entry = CacheEntry::new(remote.clone());
            entry.local_path = local.source.local_path().cloned();
            self.cache.insert(entry);
        }

        remote
    }
}

/// A local mutation waiting to be confirmed by the catalog
#[async_trait]
pub trait PendingOperation:
    Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static
{
    /// Short name used in logs
    const KIND: &'static str;

    /// Key of the persisted queue
    const STORAGE_KEY: &'static str;

    fn describe(&self) -> String;

    /// Run the remote call and its local side effect
    async fn perform(&self, ctx: &SyncContext) -> Result<(), CatalogError>;
}

/// Upload of a locally added file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadOperation {
    /// The local track, keyed by a temporary id until reconciled
    pub track: Track,
    pub path: PathBuf,
    pub metadata: TrackMetadata,
}

impl UploadOperation {
    pub fn new(track: Track, path: PathBuf, metadata: TrackMetadata) -> Self {
        Self {
            track,
            path,
            metadata,
        }
    }

    pub fn temp_id(&self) -> Option<&TrackId> {
        self.track.id.as_ref()
    }
}

/// Read a file and upload it, returning the id the catalog assigned
pub async fn upload_file(
    catalog: &dyn RemoteCatalogClient,
    path: &std::path::Path,
    metadata: &TrackMetadata,
) -> Result<TrackId, CatalogError> {
    // An unreadable file will not become readable by retrying
    let audio = tokio::fs::read(path)
        .await
        .map_err(|e| CatalogError::InvalidPayload(format!("{}: {}", path.display(), e)))?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("upload");

    catalog.upload_track(file_name, audio, metadata).await
}

#[async_trait]
impl PendingOperation for UploadOperation {
    const KIND: &'static str = "upload";
    const STORAGE_KEY: &'static str = PENDING_UPLOADS_KEY;

    fn describe(&self) -> String {
        format!("upload of '{}'", self.path.display())
    }

    async fn perform(&self, ctx: &SyncContext) -> Result<(), CatalogError> {
        let remote_id = upload_file(ctx.catalog.as_ref(), &self.path, &self.metadata).await?;
        info!("Uploaded '{}' as {}", self.track.title, remote_id);
        ctx.reconcile(&self.track, remote_id);
        Ok(())
    }
}

/// Removal of a catalog track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletionOperation {
    pub id: TrackId,
    /// Cache-owned audio file to delete once the catalog confirms
    pub local_path: Option<PathBuf>,
}

impl DeletionOperation {
    pub fn new(id: TrackId, local_path: Option<PathBuf>) -> Self {
        Self { id, local_path }
    }

    pub(crate) fn remove_local_file(&self) {
        let Some(path) = self.local_path.as_deref() else {
            return;
        };
        match std::fs::remove_file(path) {
            Ok(()) => debug!("Deleted {}", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!("Failed to delete {}: {}", path.display(), err),
        }
    }
}

#[async_trait]
impl PendingOperation for DeletionOperation {
    const KIND: &'static str = "deletion";
    const STORAGE_KEY: &'static str = PENDING_DELETIONS_KEY;

    fn describe(&self) -> String {
        format!("deletion of {}", self.id)
    }

    async fn perform(&self, ctx: &SyncContext) -> Result<(), CatalogError> {
        if !self.id.is_temporary() {
            match ctx.catalog.delete_track(&self.id).await {
                Ok(()) => {}
                Err(CatalogError::NotFound(_)) => {
                    debug!("{} was already gone from the catalog", self.id);
                }
                Err(err) => return Err(err),
            }
        }

        self.remove_local_file();
        ctx.cache.remove(&self.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TrackSource;
    use crate::testing::MockCatalog;
    use tempfile::TempDir;

    fn context(catalog: Arc<MockCatalog>) -> SyncContext {
        SyncContext::new(
            catalog,
            Arc::new(TrackCache::new(10)),
            EventBus::new(16),
            Arc::new(ConnectivityMonitor::new(true, false)),
        )
    }

    #[tokio::test]
    async fn test_upload_reconciles_cache_and_emits() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("song.flac");
        std::fs::write(&path, b"audio").unwrap();

        let catalog = Arc::new(MockCatalog::new());
        let ctx = context(catalog.clone());
        let mut events = ctx.events.subscribe();

        let temp_id = TrackId::temporary();
        let track = Track::new(Some(temp_id.clone()), "Song", "Me", TrackSource::File(path.clone()));
        ctx.cache.insert(CacheEntry::new(track.clone()).with_local_path(path.clone()));

        let op = UploadOperation::new(track, path.clone(), TrackMetadata::new("Song", "Me"));
        tokio_test::assert_ok!(op.perform(&ctx).await);

        let remote_id = ctx.reconciled_id(&temp_id).unwrap();
        assert_eq!(ctx.cache.len(), 1);
        assert!(!ctx.cache.contains(&temp_id));
        assert_eq!(ctx.cache.get(&remote_id).unwrap().local_path, Some(path));
        assert_eq!(
            events.try_recv().unwrap(),
            Event::TrackReconciled { from: temp_id, to: remote_id }
        );
    }

    #[tokio::test]
    async fn test_upload_of_missing_file_is_not_transient() {
        let catalog = Arc::new(MockCatalog::new());
        let ctx = context(catalog.clone());

        let op = UploadOperation::new(
            Track::new(Some(TrackId::temporary()), "Gone", "", TrackSource::File("/nope.flac".into())),
            "/nope.flac".into(),
            TrackMetadata::default(),
        );

        let err = op.perform(&ctx).await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(catalog.calls_to("upload"), 0);
    }

    #[tokio::test]
    async fn test_deletion_treats_not_found_as_done() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("cached.flac");
        std::fs::write(&file, b"x").unwrap();

        let catalog = Arc::new(MockCatalog::new());
        catalog.fail_next("delete:7", CatalogError::NotFound("7".to_string()));
        let ctx = context(catalog.clone());

        let op = DeletionOperation::new(TrackId::new("7"), Some(file.clone()));
        tokio_test::assert_ok!(op.perform(&ctx).await);
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn test_deletion_keeps_file_on_transient_failure() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("cached.flac");
        std::fs::write(&file, b"x").unwrap();

        let catalog = Arc::new(MockCatalog::new());
        catalog.set_reachable(false);
        let ctx = context(catalog.clone());

        let op = DeletionOperation::new(TrackId::new("7"), Some(file.clone()));
        tokio_test::assert_err!(op.perform(&ctx).await);
        assert!(file.exists());
    }
}
