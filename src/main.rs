use clap::Parser;
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use music_sync_engine::audio::{track_from_file, ClockBackend};
use music_sync_engine::cache::TrackCache;
use music_sync_engine::catalog;
use music_sync_engine::cli::{CliApp, Commands, Control, ParseError};
use music_sync_engine::config::ConfigManager;
use music_sync_engine::connectivity::{ConnectivityMonitor, TcpProbe};
use music_sync_engine::engine::{EngineHandle, PlaybackEngine, SourceResolver};
use music_sync_engine::events::{Event, EventBus};
use music_sync_engine::library::{DeleteOutcome, MusicLibrary, UploadOutcome};
use music_sync_engine::logging::{self, OperationTimer};
use music_sync_engine::storage::{FileStore, KeyValueStore};
use music_sync_engine::sync::{PendingOperation, SyncContext, SyncCoordinator};
use music_sync_engine::{AudioError, CatalogError, PlaybackError, PlayerError, Track, TrackId, TrackMetadata};

/// How often the engine checks for the end of a track
const ENGINE_TICK: Duration = Duration::from_millis(200);
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Owns every long-lived component for the duration of one command
struct AppController {
    config_manager: ConfigManager,
    connectivity: Arc<ConnectivityMonitor>,
    events: EventBus,
    sync: Arc<SyncCoordinator>,
    library: MusicLibrary,
    engine: EngineHandle,
    engine_task: JoinHandle<()>,
    poller: JoinHandle<()>,
}

impl AppController {
    async fn new(config_path: Option<PathBuf>) -> Result<Self, PlayerError> {
        let config_manager = match config_path {
            Some(path) => ConfigManager::with_path(CliApp::expand_path(&path.to_string_lossy()))?,
            None => ConfigManager::new()?,
        };
        let config = config_manager.get_config().clone();

        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(&config.storage_directory)?);
        let cache = Arc::new(
            TrackCache::new(config.cache_capacity)
                .with_store(store.clone())
                .with_download_dir(&config.download_directory),
        );
        match cache.restore() {
            Ok(count) => debug!("Restored {} cached tracks", count),
            Err(e) => warn!("Starting with an empty cache: {}", e),
        }

        let events = EventBus::new(config.event_capacity);
        let connectivity = Arc::new(ConnectivityMonitor::new(false, config.force_offline));
        let probe = Arc::new(TcpProbe::new(config.reachability_host.clone(), PROBE_TIMEOUT));
        connectivity.check(probe.as_ref()).await;
        let poller = connectivity
            .clone()
            .spawn_polling(probe, config.reachability_interval());
        info!("Starting in {:?} mode", connectivity.mode());

        let remote = catalog::from_config(&config)?;
        let ctx = Arc::new(SyncContext::new(
            remote.clone(),
            cache.clone(),
            events.clone(),
            connectivity.clone(),
        ));
        let sync = Arc::new(SyncCoordinator::open(store.clone(), ctx)?);
        let resolver = SourceResolver::new(
            remote,
            cache.clone(),
            connectivity.clone(),
            config.download_directory.clone(),
        );

        let mut engine = PlaybackEngine::new(
            Arc::new(ClockBackend::new()),
            cache,
            events.clone(),
            config.history_limit,
        );
        if let Err(e) = engine.restore_state(store.as_ref()) {
            warn!("Could not restore the previous queue: {}", e);
        }
        let (engine, engine_task) =
            EngineHandle::spawn(engine, Some(resolver.clone()), Some(store), ENGINE_TICK);
        let library = MusicLibrary::new(sync.clone(), resolver).with_engine(engine.clone());

        Ok(Self {
            config_manager,
            connectivity,
            events,
            sync,
            library,
            engine,
            engine_task,
            poller,
        })
    }

    async fn execute_command(&mut self, command: Commands) -> Result<(), PlayerError> {
        match command {
            Commands::Play { paths, shuffle } => self.play(paths, shuffle).await?,
            Commands::Search { query, offline } => {
                if offline {
                    self.connectivity.set_forced_offline(true);
                }
                let tracks = self.library.search(&query).await?;
                if tracks.is_empty() {
                    println!("No tracks match '{}'", query);
                }
                for track in &tracks {
                    println!("{}", CliApp::format_track(track));
                }
            }
            Commands::Upload { file, title, artist } => {
                let metadata = TrackMetadata::new(title.unwrap_or_default(), artist.unwrap_or_default());
                let path = CliApp::expand_path(&file.to_string_lossy());
                match self.library.upload_track(&path, Some(metadata)).await? {
                    UploadOutcome::Uploaded(track) => println!("Uploaded: {}", CliApp::format_track(&track)),
                    UploadOutcome::Queued(track) => {
                        println!("Queued for upload: {}", CliApp::format_track(&track))
                    }
                }
            }
            Commands::Delete { id } => {
                let track = self.find_track(&TrackId::new(id)).await?;
                match self.library.delete_track(&track).await? {
                    DeleteOutcome::Deleted => println!("Deleted: {}", track.display_name()),
                    DeleteOutcome::Deferred(plan) => {
                        println!("Deleted locally: {} ({:?})", track.display_name(), plan)
                    }
                }
            }
            Commands::Pending => {
                let uploads = self.sync.pending_uploads();
                let deletions = self.sync.pending_deletions();
                if uploads.is_empty() && deletions.is_empty() {
                    println!("Nothing pending");
                }
                for queued in &deletions {
                    println!("{}  {}", queued.enqueued_at.format("%Y-%m-%d %H:%M:%S"), queued.operation.describe());
                }
                for queued in &uploads {
                    println!("{}  {}", queued.enqueued_at.format("%Y-%m-%d %H:%M:%S"), queued.operation.describe());
                }
            }
            Commands::Sync => {
                if !self.connectivity.mode().is_online() {
                    println!("Offline, {} operations stay pending", self.sync.pending_count());
                    return Ok(());
                }
                let timer = OperationTimer::new("sync");
                let report = self.sync.sync_now().await;
                timer.finish_with_threshold(Duration::from_secs(10));

                for (kind, drained) in [("Deletions", &report.deletions), ("Uploads", &report.uploads)] {
                    println!(
                        "{}: {} done, {} failed{}",
                        kind,
                        drained.completed.len(),
                        drained.failed.len(),
                        if drained.requeued.is_some() { ", retry later" } else { "" }
                    );
                    for (_, err) in &drained.failed {
                        println!("  {}", err.user_message());
                    }
                }
            }
            Commands::Cached => {
                let tracks = self.library.cache().tracks();
                println!("{} of {} cache slots used", tracks.len(), self.library.cache().capacity());
                for track in tracks.iter().rev() {
                    println!("{}", CliApp::format_track(track));
                }
            }
            Commands::Offline { state } => {
                self.config_manager.set_force_offline(state.is_on())?;
                self.connectivity.set_forced_offline(state.is_on());
                println!("Offline mode {}", if state.is_on() { "on" } else { "off" });
            }
        }
        Ok(())
    }

    /// Look a track up in the cache first, then in the catalog
    async fn find_track(&self, id: &TrackId) -> Result<Track, PlayerError> {
        if let Some(entry) = self.library.cache().get(id) {
            return Ok(entry.track);
        }
        if let Some(queued) = self
            .sync
            .pending_uploads()
            .into_iter()
            .find(|queued| queued.operation.temp_id() == Some(id))
        {
            return Ok(queued.operation.track);
        }

        let tracks = self.library.fetch_tracks().await?;
        tracks
            .into_iter()
            .find(|track| track.id.as_ref() == Some(id))
            .ok_or_else(|| CatalogError::NotFound(id.to_string()).into())
    }

    async fn play(&mut self, paths: Vec<PathBuf>, shuffle: bool) -> Result<(), PlayerError> {
        let mut tracks = Vec::new();
        for path in paths {
            let path = CliApp::expand_path(&path.to_string_lossy());
            match track_from_file(&path) {
                Ok(track) => tracks.push(track),
                Err(e) => warn!("Skipping {}: {}", path.display(), e.user_message()),
            }
        }
        if tracks.is_empty() {
            return Err(PlaybackError::EmptyQueue.into());
        }

        let worker = self.sync.clone().spawn_worker();
        let mut events = self.events.subscribe();

        self.engine.set_queue(tracks, 0).await?;
        if shuffle {
            self.engine.shuffle_queue().await?;
        }
        println!("{}", CliApp::format_status(&self.engine.snapshot().await?));
        println!("Type 'help' for playback controls.");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;

        loop {
            tokio::select! {
                line = lines.next_line(), if stdin_open => match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match CliApp::parse_control(&line) {
                            Ok(Control::Quit) => break,
                            Ok(control) => {
                                if let Err(e) = self.apply_control(control).await {
                                    eprintln!("Error: {}", e.user_message());
                                }
                            }
                            Err(e) => {
                                eprintln!("Error: {}", e);
                                println!("Type 'help' for playback controls.");
                            }
                        }
                    }
                    Ok(None) | Err(_) => {
                        debug!("Stdin closed, playing until the end of the queue");
                        stdin_open = false;
                    }
                },
                event = events.recv() => match event {
                    Ok(Event::TrackChanged { track: Some(track), .. }) => {
                        println!("Now playing: {}", track.display_name());
                    }
                    Ok(Event::QueueBoundary) => {
                        println!("End of queue");
                        if !stdin_open {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => debug!("Missed {} events", skipped),
                    Err(RecvError::Closed) => break,
                },
                _ = tokio::signal::ctrl_c() => {
                    println!("\nReceived interrupt signal. Shutting down gracefully...");
                    break;
                }
            }
        }

        worker.abort();
        self.engine.pause().await?;
        Ok(())
    }

    async fn apply_control(&self, control: Control) -> Result<(), PlayerError> {
        match control {
            Control::Toggle => {
                let current = self.engine.snapshot().await?.current.ok_or(PlaybackError::NoCurrentTrack)?;
                self.engine.play_or_pause(current).await?;
            }
            Control::Next => {
                self.engine.play_next().await?;
            }
            Control::Previous => {
                self.engine.play_previous().await?;
            }
            Control::Seek(position) => {
                let status = self.engine.snapshot().await?;
                let fraction = match CliApp::seek_fraction(position, status.duration) {
                    Ok(fraction) => fraction,
                    Err(ParseError::SeekBeyondDuration { position, duration }) => {
                        return Err(AudioError::InvalidSeekPosition { position, duration }.into());
                    }
                    Err(_) => return Err(PlaybackError::NoCurrentTrack.into()),
                };
                let landed = self.engine.seek(fraction).await?;
                println!("Seeked to {}", CliApp::format_duration(landed));
            }
            Control::Repeat => {
                let mode = self.engine.toggle_repeat_mode().await?;
                println!("Repeat: {:?}", mode);
            }
            Control::Shuffle => self.engine.shuffle_queue().await?,
            Control::Unshuffle => self.engine.restore_original_queue().await?,
            Control::Queue => {
                let current = self.engine.snapshot().await?.current_index;
                for (index, track) in self.engine.queue().await?.iter().enumerate() {
                    let marker = if Some(index) == current { ">" } else { " " };
                    println!("{} {:>3}. {}", marker, index + 1, track.display_name());
                }
            }
            Control::Status => println!("{}", CliApp::format_status(&self.engine.snapshot().await?)),
            Control::Help => CliApp::display_help(),
            Control::Quit => {}
        }
        Ok(())
    }

    /// Stop background work and let the engine save its state
    async fn shutdown(self) {
        self.poller.abort();

        let Self {
            library,
            engine,
            engine_task,
            ..
        } = self;
        drop(library);
        drop(engine);

        if let Err(e) = engine_task.await {
            warn!("Engine task ended abnormally: {}", e);
        }
        info!("Shutdown complete");
    }
}

#[tokio::main]
async fn main() {
    let cli = CliApp::parse();

    if let Err(e) = logging::init() {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    let mut app = match AppController::new(cli.config).await {
        Ok(app) => app,
        Err(e) => {
            logging::log_absorbed("Startup", e.severity(), &e);
            eprintln!("Failed to initialize: {}", e.user_message());
            std::process::exit(1);
        }
    };

    let result = app.execute_command(cli.command).await;
    app.shutdown().await;

    if let Err(e) = result {
        logging::log_absorbed("Command", e.severity(), &e);
        eprintln!("Error: {}", e.user_message());
        std::process::exit(1);
    }
}
