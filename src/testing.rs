//! In-memory doubles for the catalog and the playback primitive.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use url::Url;

use crate::audio::{AudioBackend, AudioPlayback};
use crate::catalog::RemoteCatalogClient;
use crate::error::{AudioError, CatalogError};
use crate::models::{Artwork, Playlist, PlaylistId, Track, TrackId, TrackMetadata, TrackSource};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
struct CatalogState {
    tracks: Vec<Track>,
    playlists: Vec<Playlist>,
    calls: Vec<String>,
    failures: HashMap<String, CatalogError>,
    unreachable: bool,
    delay: Duration,
    next_id: usize,
}

/// Catalog that records every call as `"<op>:<arg>"`
#[derive(Default)]
pub struct MockCatalog {
    state: Mutex<CatalogState>,
}

impl MockCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tracks(tracks: Vec<Track>) -> Self {
        let catalog = Self::new();
        lock(&catalog.state).tracks = tracks;
        catalog
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).calls.clone()
    }

    pub fn calls_to(&self, op: &str) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|call| call.split(':').next() == Some(op))
            .count()
    }

    /// Fail the next call recorded as `key` with `error`
    pub fn fail_next(&self, key: &str, error: CatalogError) {
        lock(&self.state).failures.insert(key.to_string(), error);
    }

    pub fn set_reachable(&self, reachable: bool) {
        lock(&self.state).unreachable = !reachable;
    }

    /// Delay every call after it is recorded
    pub fn set_delay(&self, delay: Duration) {
        lock(&self.state).delay = delay;
    }

    async fn call(&self, key: String) -> Result<(), CatalogError> {
        let (delay, outcome) = {
            let mut state = lock(&self.state);
            state.calls.push(key.clone());
            let outcome = if state.unreachable {
                Err(CatalogError::Network("unreachable".to_string()))
            } else {
                state.failures.remove(&key).map_or(Ok(()), Err)
            };
            (state.delay, outcome)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        outcome
    }

    fn remote_source(id: &str) -> TrackSource {
        let url = Url::parse(&format!("http://catalog.test/tracks/{}/audio", id)).unwrap();
        TrackSource::Remote(url)
    }

    pub fn remote_track(id: &str, title: &str, artist: &str) -> Track {
        Track::new(Some(TrackId::new(id)), title, artist, Self::remote_source(id))
    }
}

#[async_trait]
impl RemoteCatalogClient for MockCatalog {
    async fn fetch_tracks(&self) -> Result<Vec<Track>, CatalogError> {
        self.call("fetch_tracks".to_string()).await?;
        Ok(lock(&self.state).tracks.clone())
    }

    async fn fetch_tracks_by_artist(&self, artist: &str) -> Result<Vec<Track>, CatalogError> {
        self.call(format!("by_artist:{}", artist)).await?;
        Ok(lock(&self.state)
            .tracks
            .iter()
            .filter(|track| track.artists().iter().any(|name| name.eq_ignore_ascii_case(artist)))
            .cloned()
            .collect())
    }

    async fn search_tracks(&self, query: &str) -> Result<Vec<Track>, CatalogError> {
        self.call(format!("search:{}", query)).await?;
        Ok(lock(&self.state)
            .tracks
            .iter()
            .filter(|track| track.matches(query))
            .cloned()
            .collect())
    }

    async fn upload_track(
        &self,
        file_name: &str,
        _audio: Vec<u8>,
        metadata: &TrackMetadata,
    ) -> Result<TrackId, CatalogError> {
        self.call(format!("upload:{}", file_name)).await?;
        let mut state = lock(&self.state);
        state.next_id += 1;
        let id = format!("remote-{}", state.next_id);
        let track = Self::remote_track(&id, &metadata.title, &metadata.artist);
        state.tracks.push(track);
        Ok(TrackId::new(id))
    }

    async fn delete_track(&self, id: &TrackId) -> Result<(), CatalogError> {
        self.call(format!("delete:{}", id)).await?;
        lock(&self.state)
            .tracks
            .retain(|track| track.id.as_ref() != Some(id));
        Ok(())
    }

    async fn fetch_track_image(&self, id: &TrackId) -> Result<Artwork, CatalogError> {
        self.call(format!("image:{}", id)).await?;
        Ok(Artwork(id.as_str().as_bytes().to_vec()))
    }

    async fn fetch_track_audio(&self, track: &Track) -> Result<Vec<u8>, CatalogError> {
        let id = track.id.as_ref().map(TrackId::as_str).unwrap_or_default();
        self.call(format!("audio:{}", id)).await?;
        Ok(b"remote audio".to_vec())
    }

    async fn fetch_playlists(&self) -> Result<Vec<Playlist>, CatalogError> {
        self.call("fetch_playlists".to_string()).await?;
        Ok(lock(&self.state).playlists.clone())
    }

    async fn create_playlist(&self, name: &str, track_ids: &[TrackId]) -> Result<Playlist, CatalogError> {
        self.call(format!("create_playlist:{}", name)).await?;
        let mut state = lock(&self.state);
        let playlist = Playlist {
            id: PlaylistId(format!("playlist-{}", state.playlists.len() + 1)),
            name: name.to_string(),
            track_ids: track_ids.to_vec(),
        };
        state.playlists.push(playlist.clone());
        Ok(playlist)
    }

    async fn update_playlist(&self, playlist: &Playlist) -> Result<Playlist, CatalogError> {
        self.call(format!("update_playlist:{}", playlist.id)).await?;
        let mut state = lock(&self.state);
        match state.playlists.iter_mut().find(|p| p.id == playlist.id) {
            Some(existing) => {
                *existing = playlist.clone();
                Ok(playlist.clone())
            }
            None => Err(CatalogError::NotFound(playlist.id.to_string())),
        }
    }

    async fn delete_playlist(&self, id: &PlaylistId) -> Result<(), CatalogError> {
        self.call(format!("delete_playlist:{}", id)).await?;
        lock(&self.state).playlists.retain(|p| &p.id != id);
        Ok(())
    }
}

/// Observable state of the most recently opened [`MockPlayback`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackProbe {
    pub playing: bool,
    pub position: Duration,
    pub finished: bool,
    pub stopped: bool,
}

struct MockPlayback {
    state: Arc<Mutex<PlaybackProbe>>,
    duration: Duration,
}

impl AudioPlayback for MockPlayback {
    fn play(&mut self) -> Result<(), AudioError> {
        let mut state = lock(&self.state);
        state.playing = true;
        state.stopped = false;
        Ok(())
    }

    fn pause(&mut self) {
        lock(&self.state).playing = false;
    }

    fn stop(&mut self) {
        let mut state = lock(&self.state);
        state.playing = false;
        state.stopped = true;
        state.position = Duration::ZERO;
    }

    fn seek(&mut self, position: Duration) -> Result<(), AudioError> {
        if position > self.duration {
            return Err(AudioError::InvalidSeekPosition {
                position: position.as_secs_f64(),
                duration: self.duration.as_secs_f64(),
            });
        }
        let mut state = lock(&self.state);
        state.position = position;
        state.finished = false;
        Ok(())
    }

    fn position(&self) -> Duration {
        lock(&self.state).position
    }

    fn duration(&self) -> Duration {
        self.duration
    }

    fn is_finished(&self) -> bool {
        lock(&self.state).finished
    }
}

impl Drop for MockPlayback {
    fn drop(&mut self) {
        lock(&self.state).stopped = true;
    }
}

#[derive(Default)]
struct BackendState {
    failing: HashSet<PathBuf>,
    opened: Vec<PathBuf>,
    current: Option<Arc<Mutex<PlaybackProbe>>>,
}

/// Backend that opens any path not marked as failing
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<BackendState>,
}

pub const MOCK_DURATION: Duration = Duration::from_secs(100);

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_path(&self, path: impl Into<PathBuf>) {
        lock(&self.state).failing.insert(path.into());
    }

    pub fn opened(&self) -> Vec<PathBuf> {
        lock(&self.state).opened.clone()
    }

    /// Mark the most recently opened playback as finished
    pub fn finish_current(&self) {
        if let Some(current) = lock(&self.state).current.as_ref() {
            let mut state = lock(current);
            state.finished = true;
            state.position = MOCK_DURATION;
        }
    }

    pub fn last_state(&self) -> Option<PlaybackProbe> {
        lock(&self.state).current.as_ref().map(|current| lock(current).clone())
    }
}

impl AudioBackend for MockBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn AudioPlayback>, AudioError> {
        let mut backend = lock(&self.state);
        if backend.failing.contains(path) {
            return Err(AudioError::DecodeFailed(format!("corrupt file {}", path.display())));
        }
        backend.opened.push(path.to_path_buf());

        let state = Arc::new(Mutex::new(PlaybackProbe::default()));
        backend.current = Some(state.clone());
        Ok(Box::new(MockPlayback {
            state,
            duration: MOCK_DURATION,
        }))
    }
}

/// Track backed by a (possibly nonexistent) local file
pub fn local_track(id: &str) -> Track {
    Track::new(
        Some(TrackId::new(id)),
        id.to_uppercase(),
        "Artist",
        TrackSource::File(PathBuf::from(format!("/music/{}.flac", id))),
    )
}
