use thiserror::Error;

/// Main player error type
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("File error: {0}")]
    File(#[from] std::io::Error),
}

impl PlayerError {
    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            PlayerError::Playback(err) => err.user_message(),
            PlayerError::Audio(err) => err.user_message(),
            PlayerError::Catalog(err) => err.user_message(),
            PlayerError::Sync(err) => format!("Pending changes could not be saved: {}", err),
            PlayerError::Storage(err) => format!("Local storage is unavailable: {}", err),
            PlayerError::Config(err) => err.user_message(),
            PlayerError::File(err) => format!("File system error: {}", err),
        }
    }

    /// Check if this error allows for automatic recovery
    pub fn is_recoverable(&self) -> bool {
        match self {
            PlayerError::Playback(err) => err.is_recoverable(),
            PlayerError::Audio(_) => false,
            PlayerError::Catalog(err) => err.is_transient(),
            PlayerError::Sync(_) => true,
            PlayerError::Storage(_) => true,
            PlayerError::Config(_) => true,
            PlayerError::File(_) => false,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            PlayerError::Playback(err) => err.severity(),
            PlayerError::Audio(_) => ErrorSeverity::Error,
            PlayerError::Catalog(err) if err.is_transient() => ErrorSeverity::Warning,
            PlayerError::Catalog(_) => ErrorSeverity::Error,
            PlayerError::Sync(_) | PlayerError::Storage(_) => ErrorSeverity::Error,
            PlayerError::Config(_) => ErrorSeverity::Warning,
            PlayerError::File(_) => ErrorSeverity::Error,
        }
    }
}

/// Error severity levels for logging and user feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Info => "INFO",
            ErrorSeverity::Warning => "WARNING",
            ErrorSeverity::Error => "ERROR",
            ErrorSeverity::Critical => "CRITICAL",
        }
    }

    pub fn log_level(&self) -> log::Level {
        match self {
            ErrorSeverity::Info => log::Level::Info,
            ErrorSeverity::Warning => log::Level::Warn,
            ErrorSeverity::Error => log::Level::Error,
            ErrorSeverity::Critical => log::Level::Error,
        }
    }
}

/// Errors raised by the playback primitive
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Unsupported format: {path}")]
    UnsupportedFormat { path: String },

    #[error("Decode failed: {0}")]
    DecodeFailed(String),

    #[error("Invalid seek position: {position:.2}s exceeds track duration {duration:.2}s")]
    InvalidSeekPosition { position: f64, duration: f64 },

    #[error("Playback failed: {0}")]
    PlaybackFailed(String),
}

impl AudioError {
    pub fn user_message(&self) -> String {
        match self {
            AudioError::FileNotFound { path } => {
                format!("Cannot find audio file: {}", path)
            }
            AudioError::UnsupportedFormat { path } => {
                format!("File '{}' is not a supported audio format", path)
            }
            AudioError::DecodeFailed(msg) => {
                format!("Audio file appears to be corrupted or damaged: {}", msg)
            }
            AudioError::InvalidSeekPosition { position, duration } => {
                format!("Cannot seek to {:.1}s - track is only {:.1}s long", position, duration)
            }
            AudioError::PlaybackFailed(msg) => {
                format!("Audio playback interrupted: {}", msg)
            }
        }
    }
}

/// Errors reported by the playback engine
///
/// These are absorbed at the engine boundary: the engine logs them and stays
/// in a consistent state, the caller decides whether to show them.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("Index out of range: {index} (queue length {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Track not in queue: {title}")]
    TrackNotInQueue { title: String },

    #[error("Playback primitive failure: {0}")]
    PrimitiveFailure(#[from] AudioError),

    #[error("No current track")]
    NoCurrentTrack,

    #[error("Queue is empty")]
    EmptyQueue,

    #[error("No playable source for '{title}'")]
    SourceUnavailable { title: String },

    #[error("Fetching track failed: {0}")]
    Fetch(#[from] CatalogError),

    #[error("Playback engine is not running")]
    EngineStopped,
}

impl PlaybackError {
    pub fn user_message(&self) -> String {
        match self {
            PlaybackError::IndexOutOfRange { index, .. } => {
                format!("Track number {} is not valid for current queue", index + 1)
            }
            PlaybackError::TrackNotInQueue { title } => {
                format!("'{}' is not in the current queue", title)
            }
            PlaybackError::PrimitiveFailure(err) => err.user_message(),
            PlaybackError::NoCurrentTrack => "Nothing is playing".to_string(),
            PlaybackError::EmptyQueue => "No tracks in queue - add some tracks first".to_string(),
            PlaybackError::SourceUnavailable { title } => {
                format!("'{}' is not available offline", title)
            }
            PlaybackError::Fetch(err) => err.user_message(),
            PlaybackError::EngineStopped => "The player has shut down".to_string(),
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            PlaybackError::IndexOutOfRange { .. }
            | PlaybackError::TrackNotInQueue { .. }
            | PlaybackError::NoCurrentTrack
            | PlaybackError::EmptyQueue => ErrorSeverity::Info,
            PlaybackError::EngineStopped => ErrorSeverity::Critical,
            _ => ErrorSeverity::Warning,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        match self {
            PlaybackError::IndexOutOfRange { .. } => false, // Requires valid index
            PlaybackError::TrackNotInQueue { .. } => false,
            PlaybackError::PrimitiveFailure(_) => false, // Requires a different file
            PlaybackError::NoCurrentTrack => true,
            PlaybackError::EmptyQueue => true, // Can add tracks
            PlaybackError::SourceUnavailable { .. } => true, // Available once online
            PlaybackError::Fetch(err) => err.is_transient(),
            PlaybackError::EngineStopped => false,
        }
    }
}

/// Remote catalog failures
///
/// Transient failures are eligible for the pending-operation queues, domain
/// failures are surfaced to the caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Catalog is offline")]
    Offline,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

impl CatalogError {
    /// Whether retrying the same request later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, CatalogError::Network(_) | CatalogError::Offline)
    }

    pub fn user_message(&self) -> String {
        match self {
            CatalogError::Network(_) | CatalogError::Offline => {
                "The music server is unreachable - changes will sync later".to_string()
            }
            CatalogError::NotFound(what) => format!("'{}' no longer exists on the server", what),
            CatalogError::Conflict(what) => format!("'{}' conflicts with an existing item", what),
            CatalogError::Rejected { status, .. } => {
                format!("The server rejected the request (status {})", status)
            }
            CatalogError::InvalidResponse(_) => "The server sent an unexpected response".to_string(),
            CatalogError::InvalidPayload(msg) => format!("The request could not be built: {}", msg),
        }
    }
}

/// Transport errors are transient, decoding errors are not.
impl From<reqwest::Error> for CatalogError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return CatalogError::InvalidResponse(err.to_string());
        }

        if err.is_builder() {
            return CatalogError::InvalidPayload(err.to_string());
        }

        if let Some(status) = err.status() {
            return CatalogError::Rejected {
                status: status.as_u16(),
                message: err.to_string(),
            };
        }

        CatalogError::Network(err.to_string())
    }
}

/// Durable storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Pending-operation queue errors
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Persisting queue failed: {0}")]
    Storage(#[from] StorageError),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found")]
    ConfigDirNotFound,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    DeserializationError(#[from] toml::de::Error),

    #[error("Invalid server URL '{url}': {reason}")]
    InvalidServerUrl { url: String, reason: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            ConfigError::ConfigDirNotFound => {
                "Cannot find or create configuration directory".to_string()
            }
            ConfigError::IoError(err) => {
                format!("Cannot access configuration file: {}", err)
            }
            ConfigError::SerializationError(_) => {
                "Failed to save configuration settings".to_string()
            }
            ConfigError::DeserializationError(_) => {
                "Configuration file is corrupted or has invalid format".to_string()
            }
            ConfigError::InvalidServerUrl { url, .. } => {
                format!("'{}' is not a valid server address", url)
            }
            ConfigError::InvalidValue { field, reason } => {
                format!("Setting '{}' is invalid: {}", field, reason)
            }
        }
    }
}
