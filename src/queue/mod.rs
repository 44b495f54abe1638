pub mod history;

use serde::{Deserialize, Serialize};

use crate::error::PlaybackError;
use crate::models::{RepeatMode, Track};

pub use history::History;

/// Ordered tracks with a play order and an optional current position
///
/// `tracks` keeps the order the queue was built in. `order` is the play
/// order, a permutation of the indices of `tracks`. Positions exposed by the
/// queue (`current_index`, `get`, `position_of`) are positions in play order.
#[derive(Debug, Clone, Default)]
pub struct PlaybackQueue {
    tracks: Vec<Track>,
    order: Vec<usize>,
    current: Option<usize>,
    shuffled: bool,
}

/// Effect of removing a track from the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    NotFound,
    /// Removed, the current track is unaffected
    Removed,
    /// The current track was removed; `next` is the position of the track
    /// that followed it, if any
    CurrentRemoved { next: Option<usize> },
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all tracks, resetting play order to identity
    pub fn replace(&mut self, tracks: Vec<Track>) {
        self.order = (0..tracks.len()).collect();
        self.tracks = tracks;
        self.current = None;
        self.shuffled = false;
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Track at a play-order position
    pub fn get(&self, index: usize) -> Option<&Track> {
        self.order.get(index).map(|&i| &self.tracks[i])
    }

    /// Tracks in play order
    pub fn tracks(&self) -> Vec<Track> {
        self.order.iter().map(|&i| self.tracks[i].clone()).collect()
    }

    /// Tracks in the order the queue was built in
    pub fn original_tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.and_then(|index| self.get(index))
    }

    pub fn set_current(&mut self, index: Option<usize>) -> Result<(), PlaybackError> {
        if let Some(index) = index {
            self.check_index(index)?;
        }
        self.current = index;
        Ok(())
    }

    pub fn clear_current(&mut self) {
        self.current = None;
    }

    pub fn check_index(&self, index: usize) -> Result<(), PlaybackError> {
        if index >= self.len() {
            return Err(PlaybackError::IndexOutOfRange {
                index,
                len: self.len(),
            });
        }
        Ok(())
    }

    /// First play-order position holding `track`
    pub fn position_of(&self, track: &Track) -> Option<usize> {
        self.order.iter().position(|&i| &self.tracks[i] == track)
    }

    /// Play-order position of the given track, preferring `hint` when the
    /// track appears more than once
    pub fn locate(&self, track: &Track, hint: usize) -> Option<usize> {
        match self.get(hint) {
            Some(candidate) if candidate == track => Some(hint),
            _ => self.position_of(track),
        }
    }

    pub fn is_shuffled(&self) -> bool {
        self.shuffled
    }

    /// Shuffle the tracks after the current one
    ///
    /// Everything up to and including the current position keeps its place,
    /// so the current track and what was already played stay put. With no
    /// current track the whole queue is shuffled.
    pub fn shuffle_remaining(&mut self, rng: &mut fastrand::Rng) {
        let start = self.current.map(|index| index + 1).unwrap_or(0);
        if start < self.order.len() {
            rng.shuffle(&mut self.order[start..]);
        }
        self.shuffled = true;
    }

    /// Return to the original order, keeping the same current track
    pub fn restore_original(&mut self) {
        let current_track_index = self.current.map(|index| self.order[index]);
        self.order = (0..self.tracks.len()).collect();
        self.current = current_track_index;
        self.shuffled = false;
    }

    /// Remove every occurrence of `track`
    pub fn remove_all(&mut self, track: &Track) -> Removal {
        if !self.tracks.iter().any(|t| t == track) {
            return Removal::NotFound;
        }

        let mut remap = vec![None; self.tracks.len()];
        let mut next_slot = 0;
        for (i, candidate) in self.tracks.iter().enumerate() {
            if candidate != track {
                remap[i] = Some(next_slot);
                next_slot += 1;
            }
        }

        let surviving_before =
            |pos: usize, order: &[usize]| order[..pos].iter().filter(|&&i| remap[i].is_some()).count();

        let outcome = match self.current {
            Some(pos) if remap[self.order[pos]].is_none() => {
                let candidate = surviving_before(pos, &self.order);
                let next = (candidate < next_slot).then_some(candidate);
                self.current = None;
                Removal::CurrentRemoved { next }
            }
            Some(pos) => {
                self.current = Some(surviving_before(pos, &self.order));
                Removal::Removed
            }
            None => Removal::Removed,
        };

        self.order = self.order.iter().filter_map(|&i| remap[i]).collect();
        self.tracks.retain(|candidate| candidate != track);
        outcome
    }

    /// Swap every occurrence of `old` for `new`, returning how many changed
    pub fn replace_track(&mut self, old: &Track, new: &Track) -> usize {
        let mut replaced = 0;
        for entry in self.tracks.iter_mut().filter(|entry| *entry == old) {
            *entry = new.clone();
            replaced += 1;
        }
        replaced
    }

    pub fn snapshot(&self, history: &History, repeat: RepeatMode) -> QueueSnapshot {
        QueueSnapshot {
            tracks: self.tracks.clone(),
            order: self.order.clone(),
            current: self.current,
            shuffled: self.shuffled,
            history: history.to_vec(),
            repeat,
        }
    }

    /// Rebuild a queue from a snapshot, repairing inconsistent fields
    pub fn from_snapshot(snapshot: &QueueSnapshot) -> Self {
        let len = snapshot.tracks.len();

        let mut seen = vec![false; len];
        let order_is_permutation = snapshot.order.len() == len
            && snapshot
                .order
                .iter()
                .all(|&i| i < len && !std::mem::replace(&mut seen[i], true));

        let (order, shuffled) = if order_is_permutation {
            (snapshot.order.clone(), snapshot.shuffled)
        } else {
            ((0..len).collect(), false)
        };

        Self {
            tracks: snapshot.tracks.clone(),
            order,
            current: snapshot.current.filter(|&index| index < len),
            shuffled,
        }
    }
}

/// Persisted queue and history state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct QueueSnapshot {
    pub tracks: Vec<Track>,
    pub order: Vec<usize>,
    pub current: Option<usize>,
    #[serde(default)]
    pub shuffled: bool,
    #[serde(default)]
    pub history: Vec<Track>,
    #[serde(default)]
    pub repeat: RepeatMode,
}
