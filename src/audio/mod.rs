pub mod clock;
pub mod probe;

use std::path::Path;
use std::time::Duration;

use crate::error::AudioError;

pub use clock::{ClockBackend, ClockPlayback};
pub use probe::{probe_file, track_from_file, ProbedAudio};

/// Constructor for playback primitives
///
/// Opening validates the resource; a bad or missing file fails here rather
/// than later during playback.
pub trait AudioBackend: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn AudioPlayback>, AudioError>;
}

/// A single loaded local audio resource
pub trait AudioPlayback: Send {
    /// Start or resume playback
    fn play(&mut self) -> Result<(), AudioError>;

    fn pause(&mut self);

    /// Stop playback and rewind
    fn stop(&mut self);

    /// Seek to an absolute position within the track
    fn seek(&mut self, position: Duration) -> Result<(), AudioError>;

    fn position(&self) -> Duration;

    fn duration(&self) -> Duration;

    /// Whether playback reached the end since the last play or seek
    fn is_finished(&self) -> bool;
}
