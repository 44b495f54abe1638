use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{LoadOutcome, LoadTicket, PlaybackEngine, SourceResolver};
use crate::error::PlaybackError;
use crate::events::Event;
use crate::logging;
use crate::models::{EngineStatus, RepeatMode, Track, TrackId};
use crate::storage::KeyValueStore;

type Job = Box<dyn FnOnce(&mut PlaybackEngine) + Send>;
type Resolved = (LoadTicket, Result<PathBuf, PlaybackError>);

const COMMAND_BUFFER: usize = 32;

/// Cloneable handle to a [`PlaybackEngine`] running on its own task
///
/// Commands run one at a time in the order they were sent. The engine task
/// stops once every handle is dropped, saving the queue state first.
#[derive(Clone)]
pub struct EngineHandle {
    jobs: mpsc::Sender<Job>,
    status: watch::Receiver<EngineStatus>,
}

impl EngineHandle {
    /// Run `engine` on a new task
    ///
    /// `tick` is how often the primitive is checked for the end of a track.
    pub fn spawn(
        engine: PlaybackEngine,
        resolver: Option<SourceResolver>,
        store: Option<Arc<dyn KeyValueStore>>,
        tick: Duration,
    ) -> (Self, JoinHandle<()>) {
        let (jobs_tx, jobs_rx) = mpsc::channel(COMMAND_BUFFER);
        let (status_tx, status_rx) = watch::channel(engine.status());

        let actor = EngineActor {
            engine,
            resolver,
            store,
        };
        let task = tokio::spawn(actor.run(jobs_rx, status_tx, tick));

        (
            Self {
                jobs: jobs_tx,
                status: status_rx,
            },
            task,
        )
    }

    /// Run `f` on the engine task and return its result
    pub async fn call<T, F>(&self, f: F) -> Result<T, PlaybackError>
    where
        T: Send + 'static,
        F: FnOnce(&mut PlaybackEngine) -> T + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |engine| {
            // The caller may have given up waiting
            let _ = reply_tx.send(f(engine));
        });
        self.jobs
            .send(job)
            .await
            .map_err(|_| PlaybackError::EngineStopped)?;
        reply_rx.await.map_err(|_| PlaybackError::EngineStopped)
    }

    /// Status read on the engine task, after every earlier command applied
    pub async fn snapshot(&self) -> Result<EngineStatus, PlaybackError> {
        self.call(|engine| engine.status()).await
    }

    /// Status published after every job and tick
    pub fn watch_status(&self) -> watch::Receiver<EngineStatus> {
        self.status.clone()
    }

    pub async fn set_queue(&self, tracks: Vec<Track>, start: usize) -> Result<LoadOutcome, PlaybackError> {
        self.call(move |engine| engine.set_queue(tracks, start)).await?
    }

    pub async fn play_track_at(&self, index: usize) -> Result<LoadOutcome, PlaybackError> {
        self.call(move |engine| engine.play_track_at(index)).await?
    }

    pub async fn play_or_pause(&self, track: Track) -> Result<LoadOutcome, PlaybackError> {
        self.call(move |engine| engine.play_or_pause(&track)).await?
    }

    pub async fn play_next(&self) -> Result<LoadOutcome, PlaybackError> {
        self.call(|engine| engine.play_next()).await?
    }

    pub async fn play_previous(&self) -> Result<LoadOutcome, PlaybackError> {
        self.call(|engine| engine.play_previous()).await?
    }

    pub async fn pause(&self) -> Result<LoadOutcome, PlaybackError> {
        self.call(|engine| engine.pause()).await
    }

    pub async fn resume(&self) -> Result<LoadOutcome, PlaybackError> {
        self.call(|engine| engine.resume()).await?
    }

    pub async fn seek(&self, fraction: f64) -> Result<Duration, PlaybackError> {
        self.call(move |engine| engine.seek(fraction)).await?
    }

    pub async fn toggle_repeat_mode(&self) -> Result<RepeatMode, PlaybackError> {
        self.call(|engine| engine.toggle_repeat_mode()).await
    }

    pub async fn shuffle_queue(&self) -> Result<(), PlaybackError> {
        self.call(|engine| engine.shuffle_queue()).await
    }

    pub async fn restore_original_queue(&self) -> Result<(), PlaybackError> {
        self.call(|engine| engine.restore_original_queue()).await
    }

    pub async fn delete_track(&self, track: Track) -> Result<LoadOutcome, PlaybackError> {
        self.call(move |engine| engine.delete_track(&track)).await
    }

    pub async fn reconcile_track(&self, from: TrackId, to: TrackId) -> Result<bool, PlaybackError> {
        self.call(move |engine| engine.reconcile_track(&from, &to)).await
    }

    /// Tracks in play order
    pub async fn queue(&self) -> Result<Vec<Track>, PlaybackError> {
        self.call(|engine| engine.queue().tracks()).await
    }

    pub async fn history(&self) -> Result<Vec<Track>, PlaybackError> {
        self.call(|engine| engine.history().to_vec()).await
    }
}

struct EngineActor {
    engine: PlaybackEngine,
    resolver: Option<SourceResolver>,
    store: Option<Arc<dyn KeyValueStore>>,
}

impl EngineActor {
    async fn run(
        mut self,
        mut jobs: mpsc::Receiver<Job>,
        status: watch::Sender<EngineStatus>,
        tick: Duration,
    ) {
        let (resolved_tx, mut resolved_rx) = mpsc::unbounded_channel::<Resolved>();
        let mut events = self.engine.events().subscribe();
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        debug!("Engine task started");
        loop {
            tokio::select! {
                job = jobs.recv() => match job {
                    Some(job) => job(&mut self.engine),
                    None => break,
                },
                Some((ticket, source)) = resolved_rx.recv() => {
                    // Failures were logged by the engine
                    let _ = self.engine.complete_load(ticket, source);
                }
                event = events.recv() => match event {
                    Ok(Event::TrackReconciled { from, to }) => {
                        self.engine.reconcile_track(&from, &to);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Engine missed {} events", skipped);
                    }
                    Err(RecvError::Closed) => {}
                },
                _ = ticker.tick() => {
                    if let Some(Err(err)) = self.engine.poll_finished() {
                        logging::log_absorbed("Advancing after end of track", err.severity(), &err);
                    }
                }
            }

            if let Some(ticket) = self.engine.take_pending_load() {
                self.resolve(ticket, resolved_tx.clone());
            }
            status.send_replace(self.engine.status());
        }

        if let Some(store) = self.store.as_deref() {
            match self.engine.save_state(store) {
                Ok(()) => info!("Saved queue state"),
                Err(err) => warn!("Failed to save queue state: {}", err),
            }
        }
        debug!("Engine task stopped");
    }

    /// Fetch the audio off the engine task and feed the result back in
    fn resolve(&self, ticket: LoadTicket, results: mpsc::UnboundedSender<Resolved>) {
        let Some(resolver) = self.resolver.clone() else {
            let title = ticket.track.title.clone();
            let _ = results.send((ticket, Err(PlaybackError::SourceUnavailable { title })));
            return;
        };

        tokio::spawn(async move {
            let source = resolver.resolve(&ticket.track).await;
            // The engine task may have stopped meanwhile
            let _ = results.send((ticket, source));
        });
    }
}
