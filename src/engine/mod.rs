//! Playback state machine over the queue, history and playback primitive.

pub mod handle;
pub mod source;

use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::audio::{AudioBackend, AudioPlayback};
use crate::cache::TrackCache;
use crate::error::{PlaybackError, StorageError};
use crate::events::{Event, EventBus};
use crate::logging;
use crate::models::{EngineStatus, PlaybackState, RepeatMode, Track, TrackId, TrackSource};
use crate::queue::{History, PlaybackQueue, QueueSnapshot, Removal};
use crate::storage::{self, KeyValueStore, QUEUE_STATE_KEY};

pub use handle::EngineHandle;
pub use source::SourceResolver;

/// A load request, valid until a newer one is issued
#[derive(Debug, Clone, PartialEq)]
pub struct LoadTicket {
    pub generation: u64,
    /// Play-order position the track had when the load began
    pub index: usize,
    pub track: Track,
}

/// What a playback command led to
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Playing,
    Paused,
    /// The audio has to be fetched; finish with [`PlaybackEngine::complete_load`]
    Pending(LoadTicket),
    /// A skip ran past the end of the queue
    Boundary,
    /// Superseded by a newer request and discarded
    Stale,
    Unchanged,
}

/// Single-writer playback state machine
///
/// Not thread-safe; [`EngineHandle`] serializes access on its own task.
/// Failures of the playback primitive are logged and leave the engine in its
/// previous state, or `Idle` when nothing was playing.
pub struct PlaybackEngine {
    queue: PlaybackQueue,
    history: History,
    history_limit: usize,
    state: PlaybackState,
    repeat: RepeatMode,
    player: Option<Box<dyn AudioPlayback>>,
    /// Last track that started successfully, the fallback at queue edges
    last_played: Option<Track>,
    generation: u64,
    /// Load waiting for its audio to be fetched
    pending: Option<LoadTicket>,
    backend: Arc<dyn AudioBackend>,
    cache: Arc<TrackCache>,
    events: EventBus,
    rng: fastrand::Rng,
}

impl PlaybackEngine {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        cache: Arc<TrackCache>,
        events: EventBus,
        history_limit: usize,
    ) -> Self {
        Self {
            queue: PlaybackQueue::new(),
            history: History::new(history_limit),
            history_limit,
            state: PlaybackState::Idle,
            repeat: RepeatMode::Off,
            player: None,
            last_played: None,
            generation: 0,
            pending: None,
            backend,
            cache,
            events,
            rng: fastrand::Rng::new(),
        }
    }

    /// Use a fixed shuffle seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = fastrand::Rng::with_seed(seed);
        self
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.repeat
    }

    pub fn queue(&self) -> &PlaybackQueue {
        &self.queue
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.queue.current()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            state: self.state,
            current: self.queue.current().cloned(),
            current_index: self.queue.current_index(),
            queue_len: self.queue.len(),
            position: self.player.as_ref().map(|p| p.position()).unwrap_or_default(),
            duration: self.player.as_ref().map(|p| p.duration()).unwrap_or_default(),
            repeat: self.repeat,
            shuffled: self.queue.is_shuffled(),
        }
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state != state {
            self.state = state;
            self.events.emit(Event::PlaybackStateChanged(state));
        }
    }

    fn emit_queue_changed(&self) {
        self.events.emit(Event::QueueChanged {
            tracks: self.queue.tracks(),
            current_index: self.queue.current_index(),
        });
    }

    /// Stop and drop the primitive, invalidating pending loads
    fn release_player(&mut self) {
        if let Some(mut player) = self.player.take() {
            player.stop();
        }
        self.generation += 1;
    }

    /// Replace the queue and start playing at `start`
    pub fn set_queue(&mut self, tracks: Vec<Track>, start: usize) -> Result<LoadOutcome, PlaybackError> {
        if tracks.is_empty() {
            return Err(PlaybackError::EmptyQueue);
        }
        if start >= tracks.len() {
            return Err(PlaybackError::IndexOutOfRange {
                index: start,
                len: tracks.len(),
            });
        }

        self.release_player();
        self.last_played = None;
        self.queue.replace(tracks);
        self.queue.set_current(Some(start))?;
        self.emit_queue_changed();
        self.set_state(PlaybackState::Loaded);

        self.play_track_at(start)
    }

    pub fn play_track_at(&mut self, index: usize) -> Result<LoadOutcome, PlaybackError> {
        let ticket = self.begin_load(index)?;
        match self.local_source(&ticket.track) {
            Some(path) => self.complete_load(ticket, Ok(path)),
            None => {
                debug!("'{}' needs to be fetched before playing", ticket.track.title);
                self.pending = Some(ticket.clone());
                Ok(LoadOutcome::Pending(ticket))
            }
        }
    }

    /// Take the load that still needs its audio fetched, if it is current
    pub fn take_pending_load(&mut self) -> Option<LoadTicket> {
        self.pending
            .take()
            .filter(|ticket| ticket.generation == self.generation)
    }

    /// Start a load, superseding any load still in flight
    pub fn begin_load(&mut self, index: usize) -> Result<LoadTicket, PlaybackError> {
        let track = self
            .queue
            .get(index)
            .cloned()
            .ok_or(PlaybackError::IndexOutOfRange {
                index,
                len: self.queue.len(),
            })?;

        self.generation += 1;
        Ok(LoadTicket {
            generation: self.generation,
            index,
            track,
        })
    }

    /// Local file for a track, either its own or one the cache holds
    fn local_source(&self, track: &Track) -> Option<PathBuf> {
        match &track.source {
            TrackSource::File(path) => Some(path.clone()),
            TrackSource::Remote(_) => track
                .id
                .as_ref()
                .and_then(|id| self.cache.get(id))
                .and_then(|entry| entry.local_path)
                .filter(|path| path.exists()),
        }
    }

    /// Apply the result of a load unless a newer request superseded it
    pub fn complete_load(
        &mut self,
        ticket: LoadTicket,
        source: Result<PathBuf, PlaybackError>,
    ) -> Result<LoadOutcome, PlaybackError> {
        if ticket.generation != self.generation {
            debug!("Discarding stale load of '{}'", ticket.track.title);
            return Ok(LoadOutcome::Stale);
        }
        let Some(index) = self.queue.locate(&ticket.track, ticket.index) else {
            debug!("'{}' left the queue while loading", ticket.track.title);
            return Ok(LoadOutcome::Stale);
        };

        let backend = self.backend.clone();
        let opened = source.and_then(|path| {
            let mut player = backend.open(&path)?;
            player.play()?;
            Ok(player)
        });
        let player = match opened {
            Ok(player) => player,
            Err(err) => {
                self.load_failed(&ticket.track, &err);
                return Err(err);
            }
        };

        if let Some(mut previous) = self.player.replace(player) {
            previous.stop();
        }
        self.queue.set_current(Some(index))?;
        self.last_played = Some(ticket.track.clone());
        self.history.push(ticket.track.clone());
        if let Some(id) = ticket.track.id.as_ref() {
            self.cache.touch(id);
        }

        info!("Playing {}", ticket.track.display_name());
        self.events.emit(Event::TrackChanged {
            track: Some(ticket.track),
            index: Some(index),
        });
        self.set_state(PlaybackState::Playing);
        Ok(LoadOutcome::Playing)
    }

    fn load_failed(&mut self, track: &Track, err: &PlaybackError) {
        logging::log_absorbed(&format!("Loading '{}'", track.title), err.severity(), err);

        if self.player.is_none() {
            self.queue.clear_current();
            self.last_played = None;
            self.events.emit(Event::TrackChanged {
                track: None,
                index: None,
            });
            self.set_state(PlaybackState::Idle);
        }
    }

    /// Toggle the current track, or play `track` from its queue position
    pub fn play_or_pause(&mut self, track: &Track) -> Result<LoadOutcome, PlaybackError> {
        if self.player.is_some() && self.queue.current() == Some(track) {
            return match self.state {
                PlaybackState::Playing => Ok(self.pause()),
                _ => self.resume(),
            };
        }

        let index = self
            .queue
            .position_of(track)
            .ok_or_else(|| PlaybackError::TrackNotInQueue {
                title: track.title.clone(),
            })?;
        self.play_track_at(index)
    }

    pub fn pause(&mut self) -> LoadOutcome {
        match (self.state, self.player.as_mut()) {
            (PlaybackState::Playing, Some(player)) => {
                player.pause();
                self.set_state(PlaybackState::Paused);
                LoadOutcome::Paused
            }
            _ => LoadOutcome::Unchanged,
        }
    }

    pub fn resume(&mut self) -> Result<LoadOutcome, PlaybackError> {
        if self.state == PlaybackState::Playing {
            return Ok(LoadOutcome::Unchanged);
        }
        match self.player.as_mut() {
            Some(player) => {
                player.play()?;
                self.set_state(PlaybackState::Playing);
                Ok(LoadOutcome::Playing)
            }
            // Restored queue state has no primitive yet
            None => {
                let index = self.queue.current_index().ok_or(PlaybackError::NoCurrentTrack)?;
                self.play_track_at(index)
            }
        }
    }

    pub fn play_next(&mut self) -> Result<LoadOutcome, PlaybackError> {
        if self.queue.is_empty() {
            return Err(PlaybackError::EmptyQueue);
        }
        let current = self.queue.current_index().ok_or(PlaybackError::NoCurrentTrack)?;
        if current + 1 < self.queue.len() {
            self.play_track_at(current + 1)
        } else {
            Ok(self.reach_boundary())
        }
    }

    pub fn play_previous(&mut self) -> Result<LoadOutcome, PlaybackError> {
        if self.queue.is_empty() {
            return Err(PlaybackError::EmptyQueue);
        }
        match self.queue.current_index().ok_or(PlaybackError::NoCurrentTrack)? {
            0 => Ok(self.reach_boundary()),
            current => self.play_track_at(current - 1),
        }
    }

    /// Stop at a queue edge, keeping the last played track paused at its
    /// start when there is one
    fn reach_boundary(&mut self) -> LoadOutcome {
        self.generation += 1;
        let fallback = self.last_played.as_ref().and_then(|track| self.queue.position_of(track));

        let rewound = match (fallback, self.player.as_mut()) {
            (Some(index), Some(player)) => {
                player.pause();
                if let Err(err) = player.seek(Duration::ZERO) {
                    warn!("Failed to rewind at end of queue: {}", err);
                }
                Some(index)
            }
            _ => None,
        };

        match rewound {
            Some(index) => {
                if let Err(err) = self.queue.set_current(Some(index)) {
                    warn!("Fallback track moved: {}", err);
                }
                self.set_state(PlaybackState::Paused);
            }
            None => {
                self.release_player();
                self.queue.clear_current();
                self.last_played = None;
                self.events.emit(Event::TrackChanged {
                    track: None,
                    index: None,
                });
                self.set_state(PlaybackState::Idle);
            }
        }

        self.events.emit(Event::QueueBoundary);
        LoadOutcome::Boundary
    }

    /// End of the current track as reported by the primitive
    pub fn on_primitive_finished(&mut self) -> Result<LoadOutcome, PlaybackError> {
        if self.repeat == RepeatMode::One {
            if let Some(player) = self.player.as_mut() {
                player.seek(Duration::ZERO)?;
                player.play()?;
                debug!("Repeating current track");
                self.set_state(PlaybackState::Playing);
                return Ok(LoadOutcome::Playing);
            }
        }
        self.play_next()
    }

    /// Check the primitive for completion
    pub fn poll_finished(&mut self) -> Option<Result<LoadOutcome, PlaybackError>> {
        let finished = self.state == PlaybackState::Playing
            && self.player.as_ref().map(|p| p.is_finished()).unwrap_or(false);
        finished.then(|| self.on_primitive_finished())
    }

    /// Seek to a fraction of the current track, clamped to `0.0..=1.0`
    pub fn seek(&mut self, fraction: f64) -> Result<Duration, PlaybackError> {
        let player = self.player.as_mut().ok_or(PlaybackError::NoCurrentTrack)?;
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        let position = player.duration().mul_f64(fraction);
        player.seek(position)?;
        Ok(position)
    }

    pub fn toggle_repeat_mode(&mut self) -> RepeatMode {
        self.repeat = self.repeat.next();
        self.events.emit(Event::RepeatModeChanged(self.repeat));
        self.repeat
    }

    /// Shuffle the tracks after the current one
    pub fn shuffle_queue(&mut self) {
        self.queue.shuffle_remaining(&mut self.rng);
        self.emit_queue_changed();
    }

    pub fn restore_original_queue(&mut self) {
        self.queue.restore_original();
        self.emit_queue_changed();
    }

    /// Remove every occurrence of `track` from the queue and history
    ///
    /// Playback continues unless the track was current, in which case the
    /// next track plays or the queue edge is reached.
    pub fn delete_track(&mut self, track: &Track) -> LoadOutcome {
        let removal = self.queue.remove_all(track);
        let purged = self.history.remove_all(track);
        if self.last_played.as_ref() == Some(track) {
            self.last_played = None;
        }
        debug!(
            "Deleted '{}' from queue ({:?}) and {} history entries",
            track.title, removal, purged
        );

        self.events.emit(Event::TrackDeleted(track.clone()));
        if removal != Removal::NotFound {
            self.emit_queue_changed();
        }

        match removal {
            Removal::CurrentRemoved { next } => {
                self.release_player();
                match next {
                    // A failed load was already logged and left the engine idle
                    Some(index) => self.play_track_at(index).unwrap_or(LoadOutcome::Unchanged),
                    None => self.reach_boundary(),
                }
            }
            Removal::Removed | Removal::NotFound => LoadOutcome::Unchanged,
        }
    }

    /// Swap a temporarily keyed track for its catalog counterpart
    pub fn reconcile_track(&mut self, from: &TrackId, to: &TrackId) -> bool {
        let Some(old) = self
            .queue
            .original_tracks()
            .iter()
            .chain(self.history.iter())
            .find(|track| track.id.as_ref() == Some(from))
            .cloned()
        else {
            return false;
        };

        let new = old.with_id(to.clone());
        let replaced = self.queue.replace_track(&old, &new) + self.history.replace(&old, &new);
        if self.last_played.as_ref() == Some(&old) {
            self.last_played = Some(new);
        }
        if replaced > 0 {
            self.emit_queue_changed();
        }
        replaced > 0
    }

    pub fn save_state(&self, store: &dyn KeyValueStore) -> Result<(), StorageError> {
        let snapshot = self.queue.snapshot(&self.history, self.repeat);
        storage::save_json(store, QUEUE_STATE_KEY, &snapshot)
    }

    /// Load the persisted queue without starting playback
    pub fn restore_state(&mut self, store: &dyn KeyValueStore) -> Result<bool, StorageError> {
        let Some(snapshot) = storage::load_json::<QueueSnapshot>(store, QUEUE_STATE_KEY)? else {
            return Ok(false);
        };

        self.release_player();
        self.queue = PlaybackQueue::from_snapshot(&snapshot);
        self.history = History::from_tracks(snapshot.history, self.history_limit);
        self.repeat = snapshot.repeat;
        self.last_played = None;

        info!(
            "Restored queue of {} tracks ({} in history)",
            self.queue.len(),
            self.history.len()
        );
        self.emit_queue_changed();
        let state = if self.queue.current_index().is_some() {
            PlaybackState::Loaded
        } else {
            PlaybackState::Idle
        };
        self.set_state(state);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::testing::{local_track, MockBackend, MockCatalog, MOCK_DURATION};
    use tokio::sync::broadcast::Receiver;

    fn engine_with(backend: Arc<MockBackend>) -> (PlaybackEngine, Receiver<Event>) {
        let events = EventBus::new(256);
        let receiver = events.subscribe();
        let engine = PlaybackEngine::new(backend, Arc::new(TrackCache::new(10)), events, 50).with_seed(11);
        (engine, receiver)
    }

    fn engine() -> (PlaybackEngine, Receiver<Event>) {
        engine_with(Arc::new(MockBackend::new()))
    }

    fn tracks(ids: &[&str]) -> Vec<Track> {
        ids.iter().map(|id| local_track(id)).collect()
    }

    fn drain(receiver: &mut Receiver<Event>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        events
    }

    fn path_of(track: &Track) -> PathBuf {
        track.source.local_path().cloned().unwrap()
    }

    #[test]
    fn test_set_queue_plays_start_index() {
        for start in 0..3 {
            let (mut engine, mut events) = engine();
            let queue = tracks(&["a", "b", "c"]);

            assert_eq!(engine.set_queue(queue.clone(), start).unwrap(), LoadOutcome::Playing);
            assert_eq!(engine.state(), PlaybackState::Playing);
            assert_eq!(engine.queue().current_index(), Some(start));
            assert_eq!(engine.history().most_recent(), Some(&queue[start]));

            let events = drain(&mut events);
            let changed = events
                .iter()
                .position(|e| matches!(e, Event::TrackChanged { .. }))
                .unwrap();
            let playing = events
                .iter()
                .position(|e| *e == Event::PlaybackStateChanged(PlaybackState::Playing))
                .unwrap();
            assert!(changed < playing);
        }
    }

    #[test]
    fn test_set_queue_rejects_bad_start() {
        let (mut engine, _events) = engine();
        match engine.set_queue(tracks(&["a", "b"]), 2) {
            Err(PlaybackError::IndexOutOfRange { index: 2, len: 2 }) => {}
            other => panic!("Expected IndexOutOfRange, got {:?}", other),
        }
        assert_eq!(engine.state(), PlaybackState::Idle);
        assert!(engine.queue().is_empty());

        assert!(matches!(engine.set_queue(Vec::new(), 0), Err(PlaybackError::EmptyQueue)));
    }

    #[test]
    fn test_set_queue_with_bad_file_goes_idle() {
        let backend = Arc::new(MockBackend::new());
        let queue = tracks(&["a", "b"]);
        backend.fail_path(path_of(&queue[0]));
        let (mut engine, _events) = engine_with(backend);

        let err = engine.set_queue(queue, 0).unwrap_err();
        assert!(matches!(err, PlaybackError::PrimitiveFailure(_)));
        assert_eq!(engine.state(), PlaybackState::Idle);
        assert_eq!(engine.queue().current_index(), None);
    }

    #[test]
    fn test_failed_load_keeps_previous_playback() {
        let backend = Arc::new(MockBackend::new());
        let queue = tracks(&["a", "b"]);
        backend.fail_path(path_of(&queue[1]));
        let (mut engine, _events) = engine_with(backend.clone());

        engine.set_queue(queue.clone(), 0).unwrap();
        tokio_test::assert_err!(engine.play_track_at(1));

        assert_eq!(engine.state(), PlaybackState::Playing);
        assert_eq!(engine.current_track(), Some(&queue[0]));
        assert!(backend.last_state().unwrap().playing);
    }

    #[test]
    fn test_play_track_at_out_of_range_is_no_op() {
        let (mut engine, _events) = engine();
        engine.set_queue(tracks(&["a", "b"]), 1).unwrap();

        assert!(matches!(
            engine.play_track_at(5),
            Err(PlaybackError::IndexOutOfRange { index: 5, len: 2 })
        ));
        assert_eq!(engine.queue().current_index(), Some(1));
        assert_eq!(engine.state(), PlaybackState::Playing);
    }

    #[test]
    fn test_play_next_reaches_boundary_once_without_wrapping() {
        let (mut engine, mut events) = engine();
        let queue = tracks(&["a", "b", "c", "d"]);
        engine.set_queue(queue.clone(), 0).unwrap();
        drain(&mut events);

        let outcomes: Vec<LoadOutcome> = (0..queue.len())
            .map(|_| engine.play_next().unwrap())
            .collect();

        assert_eq!(outcomes.iter().filter(|o| **o == LoadOutcome::Boundary).count(), 1);
        assert_eq!(outcomes.last(), Some(&LoadOutcome::Boundary));
        let boundaries = drain(&mut events)
            .into_iter()
            .filter(|e| *e == Event::QueueBoundary)
            .count();
        assert_eq!(boundaries, 1);

        // Falls back to the last played track, paused
        assert_eq!(engine.state(), PlaybackState::Paused);
        assert_eq!(engine.queue().current_index(), Some(3));
        assert_eq!(engine.current_track(), Some(&queue[3]));
    }

    #[test]
    fn test_play_previous_at_start_pauses_first_track() {
        let backend = Arc::new(MockBackend::new());
        let (mut engine, _events) = engine_with(backend.clone());
        engine.set_queue(tracks(&["a", "b"]), 0).unwrap();

        assert_eq!(engine.play_previous().unwrap(), LoadOutcome::Boundary);
        assert_eq!(engine.state(), PlaybackState::Paused);
        assert_eq!(engine.queue().current_index(), Some(0));

        let probe = backend.last_state().unwrap();
        assert!(!probe.playing);
        assert_eq!(probe.position, Duration::ZERO);
    }

    #[test]
    fn test_delete_other_track_keeps_current() {
        let (mut engine, mut events) = engine();
        let queue = tracks(&["a", "b", "c"]);
        engine.set_queue(queue.clone(), 0).unwrap();
        drain(&mut events);

        assert_eq!(engine.delete_track(&queue[1]), LoadOutcome::Unchanged);

        let titles: Vec<String> = engine.queue().tracks().into_iter().map(|t| t.title).collect();
        assert_eq!(titles, vec!["A", "C"]);
        assert_eq!(engine.current_track(), Some(&queue[0]));
        assert_eq!(engine.history().to_vec(), vec![queue[0].clone()]);
        assert_eq!(engine.state(), PlaybackState::Playing);
        assert!(drain(&mut events).contains(&Event::TrackDeleted(queue[1].clone())));
    }

    #[test]
    fn test_delete_purges_history() {
        let (mut engine, _events) = engine();
        let queue = tracks(&["a", "b", "c"]);
        engine.set_queue(queue.clone(), 0).unwrap();
        engine.play_next().unwrap();
        engine.play_next().unwrap();

        engine.delete_track(&queue[1]);
        assert_eq!(engine.history().to_vec(), vec![queue[2].clone(), queue[0].clone()]);
    }

    #[test]
    fn test_delete_keeps_repeated_plays_of_other_tracks() {
        let store = MemoryStore::new();
        let (mut player, _events) = engine();
        let queue = tracks(&["a", "b", "c"]);
        player.set_queue(queue.clone(), 0).unwrap();
        player.play_next().unwrap();
        player.play_track_at(0).unwrap();

        player.delete_track(&queue[1]);
        assert_eq!(player.history().to_vec(), vec![queue[0].clone(), queue[0].clone()]);

        player.save_state(&store).unwrap();
        let (mut restored, _restored_events) = engine();
        assert!(restored.restore_state(&store).unwrap());
        assert_eq!(restored.history().len(), 2);
    }

    #[test]
    fn test_delete_current_track_advances() {
        let (mut engine, _events) = engine();
        let queue = tracks(&["a", "b", "c"]);
        engine.set_queue(queue.clone(), 1).unwrap();

        assert_eq!(engine.delete_track(&queue[1]), LoadOutcome::Playing);
        assert_eq!(engine.current_track(), Some(&queue[2]));
        assert_eq!(engine.queue().current_index(), Some(1));
    }

    #[test]
    fn test_delete_last_current_track_goes_idle() {
        let (mut engine, mut events) = engine();
        let queue = tracks(&["a", "b"]);
        engine.set_queue(queue.clone(), 1).unwrap();
        drain(&mut events);

        assert_eq!(engine.delete_track(&queue[1]), LoadOutcome::Boundary);
        assert_eq!(engine.state(), PlaybackState::Idle);
        assert_eq!(engine.current_track(), None);
        assert!(drain(&mut events).contains(&Event::TrackChanged {
            track: None,
            index: None
        }));
    }

    #[test]
    fn test_shuffle_then_restore_keeps_current_track() {
        for len in 1..8 {
            let ids: Vec<String> = (0..len).map(|i| format!("t{}", i)).collect();
            let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
            let (mut engine, _events) = engine();
            engine.set_queue(tracks(&refs), len / 2).unwrap();
            let before = engine.current_track().cloned();

            engine.shuffle_queue();
            assert_eq!(engine.current_track().cloned(), before);
            engine.restore_original_queue();

            assert_eq!(engine.current_track().cloned(), before);
            assert_eq!(engine.queue().current_index(), Some(len / 2));
            assert!(!engine.status().shuffled);
        }
    }

    #[test]
    fn test_stale_load_is_discarded() {
        let (mut engine, _events) = engine();
        let remote = MockCatalog::remote_track("r1", "Remote", "Artist");
        let local = local_track("a");
        engine.set_queue(vec![local.clone(), remote], 0).unwrap();

        let LoadOutcome::Pending(ticket) = engine.play_track_at(1).unwrap() else {
            panic!("remote track should need a fetch");
        };
        engine.play_track_at(0).unwrap();
        assert!(engine.take_pending_load().is_none());

        let outcome = engine.complete_load(ticket, Ok(PathBuf::from("/downloads/r1"))).unwrap();
        assert_eq!(outcome, LoadOutcome::Stale);
        assert_eq!(engine.current_track(), Some(&local));
    }

    #[test]
    fn test_pending_load_completes() {
        let backend = Arc::new(MockBackend::new());
        let (mut engine, _events) = engine_with(backend.clone());
        let remote = MockCatalog::remote_track("r1", "Remote", "Artist");

        let LoadOutcome::Pending(ticket) = engine.set_queue(vec![remote.clone()], 0).unwrap() else {
            panic!("remote track should need a fetch");
        };
        assert_eq!(engine.state(), PlaybackState::Loaded);
        assert_eq!(engine.take_pending_load(), Some(ticket.clone()));

        let path = PathBuf::from("/downloads/r1.mp3");
        assert_eq!(engine.complete_load(ticket, Ok(path.clone())).unwrap(), LoadOutcome::Playing);
        assert_eq!(backend.opened(), vec![path]);
        assert_eq!(engine.current_track(), Some(&remote));
    }

    #[test]
    fn test_repeat_one_replays_same_track() {
        let backend = Arc::new(MockBackend::new());
        let (mut engine, _events) = engine_with(backend.clone());
        engine.set_queue(tracks(&["a", "b"]), 0).unwrap();
        assert_eq!(engine.toggle_repeat_mode(), RepeatMode::One);

        backend.finish_current();
        assert_eq!(engine.poll_finished().unwrap().unwrap(), LoadOutcome::Playing);

        assert_eq!(engine.queue().current_index(), Some(0));
        assert_eq!(backend.opened().len(), 1);
        let probe = backend.last_state().unwrap();
        assert!(probe.playing);
        assert_eq!(probe.position, Duration::ZERO);
    }

    #[test]
    fn test_finished_track_advances() {
        let backend = Arc::new(MockBackend::new());
        let (mut engine, _events) = engine_with(backend.clone());
        engine.set_queue(tracks(&["a", "b"]), 0).unwrap();

        assert!(engine.poll_finished().is_none());
        backend.finish_current();
        engine.poll_finished().unwrap().unwrap();

        assert_eq!(engine.queue().current_index(), Some(1));
        assert_eq!(backend.opened().len(), 2);
    }

    #[test]
    fn test_seek_is_clamped() {
        let (mut engine, _events) = engine();
        assert!(matches!(engine.seek(0.5), Err(PlaybackError::NoCurrentTrack)));

        engine.set_queue(tracks(&["a"]), 0).unwrap();
        assert_eq!(engine.seek(0.25).unwrap(), MOCK_DURATION / 4);
        assert_eq!(engine.seek(1.5).unwrap(), MOCK_DURATION);
        assert_eq!(engine.seek(-2.0).unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_play_or_pause() {
        let (mut engine, _events) = engine();
        let queue = tracks(&["a", "b"]);
        engine.set_queue(queue.clone(), 0).unwrap();

        assert_eq!(engine.play_or_pause(&queue[0]).unwrap(), LoadOutcome::Paused);
        assert_eq!(engine.state(), PlaybackState::Paused);
        assert_eq!(engine.play_or_pause(&queue[0]).unwrap(), LoadOutcome::Playing);

        assert_eq!(engine.play_or_pause(&queue[1]).unwrap(), LoadOutcome::Playing);
        assert_eq!(engine.queue().current_index(), Some(1));

        match engine.play_or_pause(&local_track("zzz")) {
            Err(PlaybackError::TrackNotInQueue { title }) => assert_eq!(title, "ZZZ"),
            other => panic!("Expected TrackNotInQueue, got {:?}", other),
        }
    }

    #[test]
    fn test_history_skips_adjacent_duplicates() {
        let (mut engine, _events) = engine();
        let queue = tracks(&["a", "b"]);
        engine.set_queue(queue.clone(), 0).unwrap();
        engine.play_track_at(0).unwrap();
        engine.play_track_at(1).unwrap();
        engine.play_track_at(0).unwrap();

        assert_eq!(
            engine.history().to_vec(),
            vec![queue[0].clone(), queue[1].clone(), queue[0].clone()]
        );
    }

    #[test]
    fn test_state_survives_restart() {
        let store = MemoryStore::new();
        let queue = tracks(&["a", "b", "c"]);
        {
            let (mut engine, _events) = engine();
            engine.set_queue(queue.clone(), 1).unwrap();
            engine.toggle_repeat_mode();
            engine.save_state(&store).unwrap();
        }

        let backend = Arc::new(MockBackend::new());
        let (mut engine, _events) = engine_with(backend.clone());
        assert!(engine.restore_state(&store).unwrap());

        assert_eq!(engine.state(), PlaybackState::Loaded);
        assert_eq!(engine.current_track(), Some(&queue[1]));
        assert_eq!(engine.repeat_mode(), RepeatMode::One);
        assert_eq!(engine.history().to_vec(), vec![queue[1].clone()]);
        assert!(backend.opened().is_empty());

        assert_eq!(engine.resume().unwrap(), LoadOutcome::Playing);
        assert_eq!(backend.opened().len(), 1);
    }

    #[test]
    fn test_reconcile_swaps_temporary_id() {
        let (mut engine, _events) = engine();
        let temp = Track::new(
            Some(TrackId::temporary()),
            "New",
            "Me",
            TrackSource::File(PathBuf::from("/music/new.flac")),
        );
        engine.set_queue(vec![local_track("a"), temp.clone()], 1).unwrap();

        let remote_id = TrackId::new("remote-1");
        assert!(engine.reconcile_track(temp.id.as_ref().unwrap(), &remote_id));

        let current = engine.current_track().unwrap();
        assert_eq!(current.id.as_ref(), Some(&remote_id));
        assert_eq!(engine.history().most_recent().unwrap().id.as_ref(), Some(&remote_id));
        assert!(!engine.reconcile_track(&TrackId::new("unknown"), &remote_id));
    }
}
