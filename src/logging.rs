use log::{debug, info, trace, warn};
use std::fmt;
use std::time::{Duration, Instant};

use crate::error::ErrorSeverity;
use crate::events::Event;

/// Initialize logging with the level from `MSYNC_LOG_LEVEL` or `RUST_LOG`
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    let log_level = std::env::var("MSYNC_LOG_LEVEL")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());

    let mut builder = env_logger::Builder::new();

    builder.format(|buf, record| {
        use std::io::Write;
        writeln!(
            buf,
            "{} [{}] [{}:{}] {}",
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.file().unwrap_or("unknown"),
            record.line().unwrap_or(0),
            record.args()
        )
    });

    builder.filter_level(parse_level(&log_level));
    builder.try_init()?;

    info!("Logging initialized with level: {}", log_level);
    Ok(())
}

fn parse_level(level: &str) -> log::LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "info" => log::LevelFilter::Info,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        "off" => log::LevelFilter::Off,
        _ => log::LevelFilter::Info,
    }
}

/// Log level used for an emitted event
pub fn event_level(event: &Event) -> log::Level {
    match event {
        Event::TrackChanged { .. }
        | Event::PlaybackStateChanged(_)
        | Event::RepeatModeChanged(_)
        | Event::TrackDeleted(_)
        | Event::TrackReconciled { .. } => log::Level::Info,
        Event::QueueChanged { .. } | Event::QueueBoundary => log::Level::Debug,
    }
}

/// Log an emitted event
pub fn log_event(event: &Event) {
    let details = match event {
        Event::TrackChanged { track: Some(track), index } => {
            format!("'{}' at {:?}", track.display_name(), index)
        }
        Event::TrackChanged { track: None, .. } => "no current track".to_string(),
        Event::PlaybackStateChanged(state) => state.as_str().to_string(),
        Event::QueueChanged { tracks, current_index } => {
            format!("{} tracks, current {:?}", tracks.len(), current_index)
        }
        Event::RepeatModeChanged(mode) => format!("{:?}", mode),
        Event::TrackDeleted(track) => track.display_name(),
        Event::TrackReconciled { from, to } => format!("{} -> {}", from, to),
        Event::QueueBoundary => "end of queue".to_string(),
    };

    log::log!(event_level(event), "[{}] {}", event.as_str(), details);
}

/// Log an error absorbed at a component boundary
pub fn log_absorbed(context: &str, severity: ErrorSeverity, error: &dyn fmt::Display) {
    log::log!(
        severity.log_level(),
        "[{}] {}: {}",
        severity.as_str(),
        context,
        error
    );
}

/// Timer utility for measuring operation durations
pub struct OperationTimer {
    start_time: Instant,
    operation_name: String,
}

impl OperationTimer {
    pub fn new(operation_name: impl Into<String>) -> Self {
        let operation_name = operation_name.into();
        trace!("Starting operation: {}", operation_name);
        Self {
            start_time: Instant::now(),
            operation_name,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn finish_with_threshold(self, threshold: Duration) -> Duration {
        let duration = self.elapsed();
        if duration > threshold {
            warn!(
                "Operation '{}' took {}ms (threshold: {}ms)",
                self.operation_name,
                duration.as_millis(),
                threshold.as_millis()
            );
        } else {
            debug!("Completed operation '{}' in {}ms", self.operation_name, duration.as_millis());
        }
        duration
    }
}
