use log::{debug, warn};
use std::path::Path;
use std::time::{Duration, Instant};

use super::probe::probe_file;
use super::{AudioBackend, AudioPlayback};
use crate::error::AudioError;

/// Playback primitive that validates files and follows a wall clock
///
/// Nothing is rendered; position advances in real time while playing so the
/// engine sees the same completion behaviour as with an output device.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClockBackend;

impl ClockBackend {
    pub fn new() -> Self {
        Self
    }
}

impl AudioBackend for ClockBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn AudioPlayback>, AudioError> {
        let probed = probe_file(path)?;
        if probed.duration.is_zero() {
            warn!("Unknown duration for {}, completion will not be detected", path.display());
        }
        debug!("Opened {} ({:.2}s)", path.display(), probed.duration.as_secs_f64());
        Ok(Box::new(ClockPlayback::new(probed.duration)))
    }
}

#[derive(Debug)]
pub struct ClockPlayback {
    duration: Duration,
    /// Position at the last play, pause or seek
    offset: Duration,
    /// Set while playing
    started: Option<Instant>,
}

impl ClockPlayback {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            offset: Duration::ZERO,
            started: None,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.started.is_some()
    }
}

impl AudioPlayback for ClockPlayback {
    fn play(&mut self) -> Result<(), AudioError> {
        if self.started.is_none() {
            if self.is_finished() {
                self.offset = Duration::ZERO;
            }
            self.started = Some(Instant::now());
        }
        Ok(())
    }

    fn pause(&mut self) {
        self.offset = self.position();
        self.started = None;
    }

    fn stop(&mut self) {
        self.offset = Duration::ZERO;
        self.started = None;
    }

    fn seek(&mut self, position: Duration) -> Result<(), AudioError> {
        if !self.duration.is_zero() && position > self.duration {
            return Err(AudioError::InvalidSeekPosition {
                position: position.as_secs_f64(),
                duration: self.duration.as_secs_f64(),
            });
        }

        self.offset = position;
        if self.started.is_some() {
            self.started = Some(Instant::now());
        }
        Ok(())
    }

    fn position(&self) -> Duration {
        let position = match self.started {
            Some(started) => self.offset.saturating_add(started.elapsed()),
            None => self.offset,
        };

        if self.duration.is_zero() {
            position
        } else {
            position.min(self.duration)
        }
    }

    fn duration(&self) -> Duration {
        self.duration
    }

    fn is_finished(&self) -> bool {
        !self.duration.is_zero() && self.position() >= self.duration
    }
}
