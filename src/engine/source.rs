use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::TrackCache;
use crate::catalog::RemoteCatalogClient;
use crate::connectivity::ConnectivityMonitor;
use crate::error::PlaybackError;
use crate::models::{CacheEntry, Track, TrackSource};

/// Finds or downloads a local file for a track
///
/// Downloads go to the cache-owned directory and are attached to the track's
/// cache entry, so they serve later offline playback.
#[derive(Clone)]
pub struct SourceResolver {
    catalog: Arc<dyn RemoteCatalogClient>,
    cache: Arc<TrackCache>,
    connectivity: Arc<ConnectivityMonitor>,
    download_dir: PathBuf,
}

impl SourceResolver {
    pub fn new(
        catalog: Arc<dyn RemoteCatalogClient>,
        cache: Arc<TrackCache>,
        connectivity: Arc<ConnectivityMonitor>,
        download_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            catalog,
            cache,
            connectivity,
            download_dir: download_dir.into(),
        }
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    fn cached_file(&self, track: &Track) -> Option<PathBuf> {
        let id = track.id.as_ref()?;
        self.cache
            .get(id)
            .and_then(|entry| entry.local_path)
            .filter(|path| path.exists())
    }

    /// File name for a downloaded track, keeping the remote extension
    fn download_path(&self, track: &Track) -> PathBuf {
        let stem: String = track
            .id
            .as_ref()
            .map(|id| id.as_str())
            .unwrap_or(track.title.as_str())
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();

        let extension = match &track.source {
            TrackSource::Remote(url) => Path::new(url.path())
                .extension()
                .and_then(|ext| ext.to_str())
                .map(str::to_string),
            TrackSource::File(_) => None,
        };

        match extension {
            Some(ext) => self.download_dir.join(format!("{}.{}", stem, ext)),
            None => self.download_dir.join(stem),
        }
    }

    pub async fn resolve(&self, track: &Track) -> Result<PathBuf, PlaybackError> {
        if let TrackSource::File(path) = &track.source {
            return Ok(path.clone());
        }
        if let Some(path) = self.cached_file(track) {
            return Ok(path);
        }
        if !self.connectivity.mode().is_online() {
            return Err(PlaybackError::SourceUnavailable {
                title: track.title.clone(),
            });
        }

        debug!("Downloading '{}'", track.title);
        let audio = self.catalog.fetch_track_audio(track).await?;
        let path = self.download_path(track);

        let written = async {
            tokio::fs::create_dir_all(&self.download_dir).await?;
            tokio::fs::write(&path, &audio).await
        };
        if let Err(err) = written.await {
            warn!("Failed to store download of '{}': {}", track.title, err);
            return Err(PlaybackError::SourceUnavailable {
                title: track.title.clone(),
            });
        }
        info!("Downloaded '{}' ({} bytes)", track.title, audio.len());

        if let Some(id) = track.id.as_ref() {
            if !self.cache.attach_local_file(id, path.clone()) {
                self.cache
                    .insert(CacheEntry::new(track.clone()).with_local_path(path.clone()));
            }
        }
        Ok(path)
    }
}
