use tokio::sync::broadcast;

use crate::logging;
use crate::models::{PlaybackState, RepeatMode, Track, TrackId};

/// Notifications published to subscribers
///
/// Each variant carries enough payload for a subscriber to refresh without
/// querying the engine again.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    TrackChanged {
        track: Option<Track>,
        index: Option<usize>,
    },
    PlaybackStateChanged(PlaybackState),
    QueueChanged {
        tracks: Vec<Track>,
        current_index: Option<usize>,
    },
    RepeatModeChanged(RepeatMode),
    TrackDeleted(Track),
    /// A locally added track now has a catalog id
    TrackReconciled { from: TrackId, to: TrackId },
    /// A skip ran past either end of the queue
    QueueBoundary,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::TrackChanged { .. } => "TRACK_CHANGED",
            Event::PlaybackStateChanged(_) => "PLAYBACK_STATE_CHANGED",
            Event::QueueChanged { .. } => "QUEUE_CHANGED",
            Event::RepeatModeChanged(_) => "REPEAT_MODE_CHANGED",
            Event::TrackDeleted(_) => "TRACK_DELETED",
            Event::TrackReconciled { .. } => "TRACK_RECONCILED",
            Event::QueueBoundary => "QUEUE_BOUNDARY",
        }
    }
}

/// Fire-and-forget fan-out of events
///
/// Late subscribers do not see earlier events. Events from one sender are
/// received in the order they were emitted.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: Event) {
        logging::log_event(&event);
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
