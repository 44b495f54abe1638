use log::debug;
use std::path::Path;
use std::time::Duration;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey};
use symphonia::core::probe::Hint;
use symphonia::default::get_probe;

use crate::error::AudioError;
use crate::models::{Track, TrackSource};

/// What a container tells us without decoding any audio
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProbedAudio {
    pub duration: Duration,
    pub title: Option<String>,
    pub artist: Option<String>,
}

/// Read duration and title/artist tags from a local file
pub fn probe_file(path: &Path) -> Result<ProbedAudio, AudioError> {
    let display = path.to_string_lossy().to_string();

    let file = std::fs::File::open(path).map_err(|_| AudioError::FileNotFound {
        path: display.clone(),
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }

    let meta_opts: MetadataOptions = Default::default();
    let fmt_opts = FormatOptions::default();

    let mut probed = get_probe()
        .format(&hint, mss, &fmt_opts, &meta_opts)
        .map_err(|err| match err {
            SymphoniaError::Unsupported(_) => AudioError::UnsupportedFormat {
                path: display.clone(),
            },
            other => AudioError::DecodeFailed(format!("{}: {}", display, other)),
        })?;

    let mut result = ProbedAudio::default();

    // Tags ahead of the container (ID3v2) first, then the container's own
    if let Some(metadata) = probed.metadata.get() {
        if let Some(revision) = metadata.current() {
            apply_tags(revision, &mut result);
        }
    }

    let mut format = probed.format;
    if let Some(revision) = format.metadata().current() {
        apply_tags(revision, &mut result);
    }

    if let Some(track) = format.default_track().or_else(|| format.tracks().first()) {
        if let (Some(time_base), Some(n_frames)) =
            (track.codec_params.time_base, track.codec_params.n_frames)
        {
            let seconds = (n_frames as f64) * time_base.numer as f64 / time_base.denom as f64;
            result.duration = Duration::from_secs_f64(seconds);
        }
    }

    debug!(
        "Probed {}: {:.2}s, title {:?}, artist {:?}",
        display,
        result.duration.as_secs_f64(),
        result.title,
        result.artist
    );

    Ok(result)
}

fn apply_tags(revision: &MetadataRevision, result: &mut ProbedAudio) {
    for tag in revision.tags() {
        let value = tag.value.to_string();
        if value.trim().is_empty() {
            continue;
        }

        match tag.std_key {
            Some(StandardTagKey::TrackTitle) => result.title = Some(value),
            Some(StandardTagKey::Artist) => result.artist = Some(value),
            _ => match tag.key.as_str() {
                "TITLE" | "TIT2" => result.title = Some(value),
                "ARTIST" | "TPE1" => result.artist = Some(value),
                _ => {}
            },
        }
    }
}

/// Build an id-less track for a local audio file
pub fn track_from_file(path: &Path) -> Result<Track, AudioError> {
    let probed = probe_file(path)?;

    let title = probed.title.unwrap_or_else(|| {
        path.file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("Unknown")
            .to_string()
    });
    let artist = probed.artist.unwrap_or_else(|| "Unknown Artist".to_string());

    Ok(Track::new(None, title, artist, TrackSource::File(path.to_path_buf())))
}

/// Minimal 16-bit mono PCM WAV file for tests
#[cfg(test)]
pub(crate) fn write_test_wav(path: &Path, sample_rate: u32, seconds: u32) {
    let samples = sample_rate * seconds;
    let data_len = samples * 2;

    let mut bytes = Vec::with_capacity(44 + data_len as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVE");
    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
    bytes.extend_from_slice(&1u16.to_le_bytes()); // mono
    bytes.extend_from_slice(&sample_rate.to_le_bytes());
    bytes.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    bytes.extend_from_slice(&2u16.to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    bytes.resize(44 + data_len as usize, 0);

    std::fs::write(path, bytes).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_probe_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let result = probe_file(&temp_dir.path().join("missing.flac"));
        assert!(matches!(result, Err(AudioError::FileNotFound { .. })));
    }

    #[test]
    fn test_probe_garbage_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("garbage.flac");
        std::fs::write(&path, b"definitely not audio data").unwrap();

        let result = probe_file(&path);
        assert!(matches!(
            result,
            Err(AudioError::UnsupportedFormat { .. }) | Err(AudioError::DecodeFailed(_))
        ));
    }

    #[test]
    fn test_probe_wav_duration() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tone.wav");
        write_test_wav(&path, 8000, 1);

        let probed = probe_file(&path).unwrap();
        assert!((probed.duration.as_secs_f64() - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_track_from_file_falls_back_to_file_name() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("Morning Song.wav");
        write_test_wav(&path, 8000, 1);

        let track = track_from_file(&path).unwrap();
        assert_eq!(track.title, "Morning Song");
        assert_eq!(track.artist, "Unknown Artist");
        assert!(track.id.is_none());
        assert_eq!(track.source, TrackSource::File(path));
    }
}
