use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Prefix marking identifiers minted locally before the catalog assigns one
const TEMPORARY_PREFIX: &str = "local:";

/// Stable identifier of a track in the remote catalog
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a placeholder id for a track that has not been uploaded yet
    pub fn temporary() -> Self {
        Self(format!("{}{}", TEMPORARY_PREFIX, uuid::Uuid::new_v4()))
    }

    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMPORARY_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Where the audio for a track lives
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackSource {
    File(PathBuf),
    Remote(Url),
}

impl TrackSource {
    pub fn local_path(&self) -> Option<&PathBuf> {
        match self {
            TrackSource::File(path) => Some(path),
            TrackSource::Remote(_) => None,
        }
    }
}

impl fmt::Display for TrackSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackSource::File(path) => write!(f, "{}", path.display()),
            TrackSource::Remote(url) => write!(f, "{}", url),
        }
    }
}

/// An immutable track value
///
/// Two tracks are equal when both carry an id and the ids match, or when
/// neither carries an id and the sources match. Edits produce new values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: Option<TrackId>,
    pub title: String,
    /// May list several artists separated by `,` or `;`
    pub artist: String,
    pub artwork: Option<String>,
    pub source: TrackSource,
}

impl Track {
    pub fn new(
        id: Option<TrackId>,
        title: impl Into<String>,
        artist: impl Into<String>,
        source: TrackSource,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            artist: artist.into(),
            artwork: None,
            source,
        }
    }

    /// Copy of this track under a different id
    pub fn with_id(&self, id: TrackId) -> Self {
        Self {
            id: Some(id),
            ..self.clone()
        }
    }

    pub fn with_artwork(mut self, artwork: impl Into<String>) -> Self {
        self.artwork = Some(artwork.into());
        self
    }

    /// Individual artist names
    pub fn artists(&self) -> Vec<&str> {
        self.artist
            .split([',', ';'])
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .collect()
    }

    /// Case-insensitive substring match against title or artist
    pub fn matches(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return true;
        }
        self.title.to_lowercase().contains(&query) || self.artist.to_lowercase().contains(&query)
    }

    /// Get the display name for this track
    pub fn display_name(&self) -> String {
        if self.artist.is_empty() {
            self.title.clone()
        } else {
            format!("{} - {}", self.artist, self.title)
        }
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        match (&self.id, &other.id) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.source == other.source,
            _ => false,
        }
    }
}

impl Eq for Track {}

/// Encoded artwork image bytes
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Artwork(pub Vec<u8>);

impl Artwork {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Cached artifacts for one track
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub track: Track,
    pub artwork: Option<Artwork>,
    /// Local audio file usable for offline playback
    pub local_path: Option<PathBuf>,
}

impl CacheEntry {
    pub fn new(track: Track) -> Self {
        Self {
            track,
            artwork: None,
            local_path: None,
        }
    }

    pub fn with_artwork(mut self, artwork: Artwork) -> Self {
        self.artwork = Some(artwork);
        self
    }

    pub fn with_local_path(mut self, path: PathBuf) -> Self {
        self.local_path = Some(path);
        self
    }

    pub fn is_playable_offline(&self) -> bool {
        self.local_path.as_ref().map(|p| p.exists()).unwrap_or(false)
            || self
                .track
                .source
                .local_path()
                .map(|p| p.exists())
                .unwrap_or(false)
    }
}

/// Identifier of a remote playlist
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlaylistId(pub String);

impl fmt::Display for PlaylistId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: PlaylistId,
    pub name: String,
    #[serde(default)]
    pub track_ids: Vec<TrackId>,
}

/// Metadata sent along with an upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TrackMetadata {
    pub title: String,
    pub artist: String,
}

impl TrackMetadata {
    pub fn new(title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
        }
    }
}

/// Playback state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PlaybackState {
    /// No current track
    #[default]
    Idle,
    /// Current track selected, not playing
    Loaded,
    Playing,
    Paused,
}

impl PlaybackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Loaded => "loaded",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RepeatMode {
    #[default]
    Off,
    One,
}

impl RepeatMode {
    /// Next mode in the off -> one -> off cycle
    pub fn next(self) -> Self {
        match self {
            RepeatMode::Off => RepeatMode::One,
            RepeatMode::One => RepeatMode::Off,
        }
    }
}

/// Effective process-wide mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PlaybackMode {
    #[default]
    Online,
    /// All reads from the cache, all mutations deferred
    Offline,
}

impl PlaybackMode {
    pub fn is_online(&self) -> bool {
        matches!(self, PlaybackMode::Online)
    }
}

/// Cheap snapshot of the engine published after every command
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineStatus {
    pub state: PlaybackState,
    pub current: Option<Track>,
    pub current_index: Option<usize>,
    pub queue_len: usize,
    pub position: Duration,
    pub duration: Duration,
    pub repeat: RepeatMode,
    pub shuffled: bool,
}

impl EngineStatus {
    /// Playback progress in the range 0.0..=1.0
    pub fn progress(&self) -> f64 {
        if self.duration.is_zero() {
            return 0.0;
        }
        (self.position.as_secs_f64() / self.duration.as_secs_f64()).clamp(0.0, 1.0)
    }
}
