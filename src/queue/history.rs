use std::collections::VecDeque;

use crate::models::Track;

/// Recently played tracks, most recent first
///
/// A track equal to the current head is not pushed again, but the same track
/// may reappear once something else was played in between.
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<Track>,
    limit: usize,
}

impl History {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            limit,
        }
    }

    /// Rebuild from a most-recent-first list, trimming to the limit
    pub fn from_tracks(tracks: Vec<Track>, limit: usize) -> Self {
        let mut entries: VecDeque<Track> = tracks.into_iter().collect();
        entries.truncate(limit);
        Self { entries, limit }
    }

    /// Record a play; returns false when the head already is this track
    pub fn push(&mut self, track: Track) -> bool {
        if self.limit == 0 || self.entries.front() == Some(&track) {
            return false;
        }
        self.entries.push_front(track);
        self.entries.truncate(self.limit);
        true
    }

    /// Drop every occurrence, returning how many were removed
    pub fn remove_all(&mut self, track: &Track) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| entry != track);
        before - self.entries.len()
    }

    /// Swap every occurrence of `old` for `new`
    pub fn replace(&mut self, old: &Track, new: &Track) -> usize {
        let mut replaced = 0;
        for entry in self.entries.iter_mut().filter(|entry| *entry == old) {
            *entry = new.clone();
            replaced += 1;
        }
        replaced
    }

    pub fn most_recent(&self) -> Option<&Track> {
        self.entries.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<Track> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

}
