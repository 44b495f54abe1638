use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::models::{EngineStatus, Track};

/// Offline-first music library and player
#[derive(Debug, Parser)]
#[command(name = "msync")]
#[command(about = "Play, search and sync a music catalog, online or offline")]
#[command(version)]
pub struct CliApp {
    /// Configuration file to use instead of the default one
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Play local files, then read playback controls from stdin
    Play {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Shuffle everything after the first track
        #[arg(long)]
        shuffle: bool,
    },
    /// Search tracks by title or artist
    Search {
        query: String,
        /// Only look in the local cache
        #[arg(long)]
        offline: bool,
    },
    /// Add a local audio file to the catalog
    Upload {
        file: PathBuf,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        artist: Option<String>,
    },
    /// Delete a track by id
    Delete { id: String },
    /// List operations waiting for the catalog
    Pending,
    /// Send pending operations now
    Sync,
    /// List cached tracks
    Cached,
    /// Force offline mode on or off
    Offline {
        #[arg(value_enum)]
        state: Switch,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    pub fn is_on(self) -> bool {
        self == Switch::On
    }
}

/// Controls accepted on stdin while playing
#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    Toggle,
    Next,
    Previous,
    Seek(Duration),
    Repeat,
    Shuffle,
    Unshuffle,
    Queue,
    Status,
    Help,
    Quit,
}

impl CliApp {
    /// Expand tilde (~) in path to home directory
    pub fn expand_path(path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home_dir) = dirs::home_dir() {
                return home_dir.join(rest);
            }
        } else if path == "~" {
            if let Some(home_dir) = dirs::home_dir() {
                return home_dir;
            }
        }
        PathBuf::from(path)
    }

    /// Parse a playback control line
    pub fn parse_control(input: &str) -> Result<Control, ParseError> {
        let args: Vec<&str> = input.split_whitespace().collect();
        let Some(&command) = args.first() else {
            return Err(ParseError::EmptyCommand);
        };

        match command {
            "p" | "pause" | "play" => Ok(Control::Toggle),
            "n" | "next" => Ok(Control::Next),
            "b" | "prev" | "previous" => Ok(Control::Previous),
            "seek" => match args.get(1) {
                Some(position) => Ok(Control::Seek(Self::parse_time(position)?)),
                None => Err(ParseError::MissingArgument {
                    command: "seek".to_string(),
                    argument: "position".to_string(),
                }),
            },
            "r" | "repeat" => Ok(Control::Repeat),
            "s" | "shuffle" => Ok(Control::Shuffle),
            "unshuffle" => Ok(Control::Unshuffle),
            "queue" => Ok(Control::Queue),
            "status" => Ok(Control::Status),
            "help" | "?" => Ok(Control::Help),
            "q" | "quit" | "exit" => Ok(Control::Quit),
            _ => Err(ParseError::UnknownCommand {
                command: command.to_string(),
            }),
        }
    }

    pub fn display_help() {
        println!("Playback controls:");
        println!("  p, pause        - Play or pause");
        println!("  n, next         - Next track");
        println!("  b, prev         - Previous track");
        println!("  seek <time>     - Seek to position (e.g., '1:30', '90s')");
        println!("  r, repeat       - Cycle repeat mode");
        println!("  s, shuffle      - Shuffle the rest of the queue");
        println!("  unshuffle       - Restore the original order");
        println!("  queue           - List the queue");
        println!("  status          - Show the current track");
        println!("  q, quit         - Stop and exit");
    }

    /// Parse time string to Duration
    pub fn parse_time(time_str: &str) -> Result<Duration, ParseError> {
        let trimmed = time_str.trim();
        let invalid = || ParseError::InvalidTimeFormat {
            input: time_str.to_string(),
        };

        let seconds = match trimmed.split_once(':') {
            Some((minutes, seconds)) => {
                let minutes: u64 = minutes.parse().map_err(|_| invalid())?;
                let seconds: f64 = seconds.parse().map_err(|_| invalid())?;
                if !(0.0..60.0).contains(&seconds) {
                    return Err(invalid());
                }
                minutes as f64 * 60.0 + seconds
            }
            None => trimmed.trim_end_matches('s').parse().map_err(|_| invalid())?,
        };

        if !seconds.is_finite() || seconds < 0.0 {
            return Err(invalid());
        }
        Ok(Duration::from_secs_f64(seconds))
    }

    /// Fraction of `duration` that `position` represents, for seeking
    pub fn seek_fraction(position: Duration, duration: Duration) -> Result<f64, ParseError> {
        if duration.is_zero() {
            return Err(ParseError::UnknownDuration);
        }
        if position > duration {
            return Err(ParseError::SeekBeyondDuration {
                position: position.as_secs_f64(),
                duration: duration.as_secs_f64(),
            });
        }
        Ok(position.as_secs_f64() / duration.as_secs_f64())
    }

    pub fn format_duration(duration: Duration) -> String {
        let total_seconds = duration.as_secs();
        format!("{:02}:{:02}", total_seconds / 60, total_seconds % 60)
    }

    pub fn format_track(track: &Track) -> String {
        let id = track
            .id
            .as_ref()
            .map(|id| id.as_str().to_string())
            .unwrap_or_else(|| "-".to_string());
        format!("{:<38} {}", id, track.display_name())
    }

    /// One-line summary of the engine status
    pub fn format_status(status: &EngineStatus) -> String {
        let Some(track) = status.current.as_ref() else {
            return format!("[{}] nothing loaded", status.state.as_str());
        };

        let position = match status.current_index {
            Some(index) => format!("{}/{}", index + 1, status.queue_len),
            None => format!("-/{}", status.queue_len),
        };
        let mut line = format!(
            "[{}] {} {} / {} ({}) repeat: {:?}",
            status.state.as_str(),
            track.display_name(),
            Self::format_duration(status.position),
            Self::format_duration(status.duration),
            position,
            status.repeat,
        );
        if status.shuffled {
            line.push_str(" shuffled");
        }
        line
    }
}

/// Control parsing errors
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Empty command")]
    EmptyCommand,

    #[error("Unknown command: {command}")]
    UnknownCommand { command: String },

    #[error("Missing argument for {command}: {argument}")]
    MissingArgument { command: String, argument: String },

    #[error("Invalid time format: {input}")]
    InvalidTimeFormat { input: String },

    #[error("Seek position {position:.2}s exceeds track duration {duration:.2}s")]
    SeekBeyondDuration { position: f64, duration: f64 },

    #[error("Track duration is unknown")]
    UnknownDuration,
}
