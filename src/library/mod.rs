//! User-facing reads and mutations, routed by the effective playback mode.
//!
//! Online, reads go to the catalog and fall back to the cache when the
//! network fails. Offline, reads are answered from the cache only and
//! mutations are applied locally and deferred to the sync queues.

use log::{debug, info, warn};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::audio::track_from_file;
use crate::cache::TrackCache;
use crate::catalog::RemoteCatalogClient;
use crate::connectivity::ConnectivityMonitor;
use crate::engine::{EngineHandle, SourceResolver};
use crate::error::{CatalogError, PlaybackError, PlayerError};
use crate::models::{Artwork, CacheEntry, Playlist, PlaylistId, Track, TrackId, TrackMetadata};
use crate::sync::operations::upload_file;
use crate::sync::{DeletionPlan, SyncCoordinator};

/// Result of adding a track from a local file
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    /// The catalog accepted it right away
    Uploaded(Track),
    /// Kept under a temporary id until the upload goes through
    Queued(Track),
}

impl UploadOutcome {
    pub fn track(&self) -> &Track {
        match self {
            UploadOutcome::Uploaded(track) | UploadOutcome::Queued(track) => track,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeleteOutcome {
    Deleted,
    /// Removed locally, the catalog follows later
    Deferred(DeletionPlan),
}

pub struct MusicLibrary {
    catalog: Arc<dyn RemoteCatalogClient>,
    cache: Arc<TrackCache>,
    connectivity: Arc<ConnectivityMonitor>,
    sync: Arc<SyncCoordinator>,
    resolver: SourceResolver,
    engine: Option<EngineHandle>,
}

impl MusicLibrary {
    pub fn new(sync: Arc<SyncCoordinator>, resolver: SourceResolver) -> Self {
        let ctx = sync.context();
        Self {
            catalog: ctx.catalog.clone(),
            cache: ctx.cache.clone(),
            connectivity: ctx.connectivity.clone(),
            sync,
            resolver,
            engine: None,
        }
    }

    /// Keep the playback queue in step with deletions
    pub fn with_engine(mut self, engine: EngineHandle) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn sync(&self) -> &Arc<SyncCoordinator> {
        &self.sync
    }

    pub fn cache(&self) -> &Arc<TrackCache> {
        &self.cache
    }

    fn is_online(&self) -> bool {
        self.connectivity.mode().is_online()
    }

    fn require_online(&self) -> Result<(), CatalogError> {
        if self.is_online() {
            Ok(())
        } else {
            Err(CatalogError::Offline)
        }
    }

    async fn read<F, Fut, L>(&self, what: &str, remote: F, local: L) -> Result<Vec<Track>, CatalogError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Track>, CatalogError>>,
        L: FnOnce(&TrackCache) -> Vec<Track>,
    {
        if !self.is_online() {
            debug!("Offline, answering {} from the cache", what);
            return Ok(local(self.cache.as_ref()));
        }

        match remote().await {
            Ok(tracks) => Ok(tracks),
            Err(err) if err.is_transient() => {
                warn!("{} failed ({}), answering from the cache", what, err);
                Ok(local(self.cache.as_ref()))
            }
            Err(err) => Err(err),
        }
    }

    pub async fn fetch_tracks(&self) -> Result<Vec<Track>, CatalogError> {
        self.read("Track listing", || self.catalog.fetch_tracks(), |cache| cache.tracks())
            .await
    }

    pub async fn tracks_by_artist(&self, artist: &str) -> Result<Vec<Track>, CatalogError> {
        self.read(
            "Artist listing",
            || self.catalog.fetch_tracks_by_artist(artist),
            |cache| {
                cache
                    .tracks()
                    .into_iter()
                    .filter(|track| track.artists().iter().any(|name| name.eq_ignore_ascii_case(artist)))
                    .collect()
            },
        )
        .await
    }

    /// Title or artist substring search
    pub async fn search(&self, query: &str) -> Result<Vec<Track>, CatalogError> {
        self.read("Search", || self.catalog.search_tracks(query), |cache| cache.search(query))
            .await
    }

    /// Artwork for a track, fetched once and cached
    pub async fn artwork(&self, track: &Track) -> Result<Artwork, CatalogError> {
        let id = track
            .id
            .as_ref()
            .ok_or_else(|| CatalogError::NotFound(track.title.clone()))?;

        if !self.is_online() {
            return self
                .cache
                .get(id)
                .and_then(|entry| entry.artwork)
                .ok_or(CatalogError::Offline);
        }

        let entry = self
            .cache
            .artwork_or_fetch(id, || async {
                let artwork = self.catalog.fetch_track_image(id).await?;
                Ok(CacheEntry::new(track.clone()).with_artwork(artwork))
            })
            .await?;
        entry
            .artwork
            .ok_or_else(|| CatalogError::InvalidResponse(format!("no artwork for {}", id)))
    }

    /// Make a track playable offline, downloading it if needed
    pub async fn save_for_offline(&self, track: &Track) -> Result<PathBuf, PlaybackError> {
        let path = self.resolver.resolve(track).await?;
        if let Some(id) = track.id.as_ref() {
            if !self.cache.attach_local_file(id, path.clone()) {
                self.cache
                    .insert(CacheEntry::new(track.clone()).with_local_path(path.clone()));
            }
        }
        Ok(path)
    }

    /// Add a track from a local audio file
    ///
    /// Network trouble or offline mode queue the upload and return the track
    /// under a temporary id. Domain failures are returned.
    pub async fn upload_track(
        &self,
        path: &Path,
        metadata: Option<TrackMetadata>,
    ) -> Result<UploadOutcome, PlayerError> {
        let mut track = track_from_file(path)?;
        if let Some(metadata) = metadata {
            if !metadata.title.is_empty() {
                track.title = metadata.title;
            }
            if !metadata.artist.is_empty() {
                track.artist = metadata.artist;
            }
        }
        let metadata = TrackMetadata::new(track.title.clone(), track.artist.clone());

        if self.is_online() {
            match upload_file(self.catalog.as_ref(), path, &metadata).await {
                Ok(remote_id) => {
                    let uploaded = track.with_id(remote_id);
                    self.cache
                        .insert(CacheEntry::new(uploaded.clone()).with_local_path(path.to_path_buf()));
                    info!("Uploaded '{}'", uploaded.title);
                    return Ok(UploadOutcome::Uploaded(uploaded));
                }
                Err(err) if err.is_transient() => {
                    warn!("Upload of '{}' failed ({}), queueing it", track.title, err);
                }
                Err(err) => return Err(err.into()),
            }
        }

        let local = track.with_id(TrackId::temporary());
        self.cache
            .insert(CacheEntry::new(local.clone()).with_local_path(path.to_path_buf()));
        self.sync
            .enqueue_upload(local.clone(), path.to_path_buf(), metadata)
            .await?;
        Ok(UploadOutcome::Queued(local))
    }

    /// Delete a track from the catalog, the cache and the playback queue
    ///
    /// Network trouble or offline mode defer the catalog side. Domain
    /// failures are returned and leave local state untouched.
    pub async fn delete_track(&self, track: &Track) -> Result<DeleteOutcome, PlayerError> {
        let Some(id) = track.id.clone() else {
            self.forget_in_engine(track).await;
            return Ok(DeleteOutcome::Deleted);
        };

        if self.is_online() && !id.is_temporary() {
            match self.catalog.delete_track(&id).await {
                Ok(()) => {}
                Err(CatalogError::NotFound(_)) => {
                    debug!("{} was already gone from the catalog", id);
                }
                Err(err) if err.is_transient() => {
                    warn!("Deleting {} failed ({}), queueing it", id, err);
                    return self.defer_deletion(track, id).await;
                }
                Err(err) => return Err(err.into()),
            }

            self.cache.remove(&id);
            self.forget_in_engine(track).await;
            info!("Deleted '{}'", track.title);
            return Ok(DeleteOutcome::Deleted);
        }

        self.defer_deletion(track, id).await
    }

    async fn defer_deletion(&self, track: &Track, id: TrackId) -> Result<DeleteOutcome, PlayerError> {
        // The file stays until the catalog confirms
        let owned_file = self
            .cache
            .detach(&id)
            .and_then(|entry| entry.local_path)
            .filter(|path| self.cache.owns_file(path));
        self.forget_in_engine(track).await;

        let plan = self.sync.enqueue_deletion(&id, owned_file).await?;
        Ok(DeleteOutcome::Deferred(plan))
    }

    async fn forget_in_engine(&self, track: &Track) {
        if let Some(engine) = self.engine.as_ref() {
            if let Err(err) = engine.delete_track(track.clone()).await {
                warn!("Could not remove '{}' from the queue: {}", track.title, err);
            }
        }
    }

    pub async fn playlists(&self) -> Result<Vec<Playlist>, CatalogError> {
        self.require_online()?;
        self.catalog.fetch_playlists().await
    }

    pub async fn create_playlist(&self, name: &str, track_ids: &[TrackId]) -> Result<Playlist, CatalogError> {
        self.require_online()?;
        self.catalog.create_playlist(name, track_ids).await
    }

    pub async fn update_playlist(&self, playlist: &Playlist) -> Result<Playlist, CatalogError> {
        self.require_online()?;
        self.catalog.update_playlist(playlist).await
    }

    pub async fn delete_playlist(&self, id: &PlaylistId) -> Result<(), CatalogError> {
        self.require_online()?;
        self.catalog.delete_playlist(id).await
    }

    /// Whether every track of the playlist is cached
    pub fn is_available_offline(&self, playlist: &Playlist) -> bool {
        self.cache.contains_all(&playlist.track_ids)
    }
}
