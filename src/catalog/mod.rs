pub mod http;

use async_trait::async_trait;
use log::info;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::{CatalogError, ConfigError};
use crate::models::{Artwork, Playlist, PlaylistId, Track, TrackId, TrackMetadata};

pub use http::HttpCatalogClient;

/// Remote track and playlist catalog
///
/// Failures are typed: [`CatalogError::is_transient`] separates network
/// trouble, which is worth retrying later, from domain failures such as a
/// missing track or a conflict.
#[async_trait]
pub trait RemoteCatalogClient: Send + Sync {
    async fn fetch_tracks(&self) -> Result<Vec<Track>, CatalogError>;

    async fn fetch_tracks_by_artist(&self, artist: &str) -> Result<Vec<Track>, CatalogError>;

    async fn search_tracks(&self, query: &str) -> Result<Vec<Track>, CatalogError>;

    /// Upload an audio file, returning the id the catalog assigned
    async fn upload_track(
        &self,
        file_name: &str,
        audio: Vec<u8>,
        metadata: &TrackMetadata,
    ) -> Result<TrackId, CatalogError>;

    async fn delete_track(&self, id: &TrackId) -> Result<(), CatalogError>;

    async fn fetch_track_image(&self, id: &TrackId) -> Result<Artwork, CatalogError>;

    /// Download the audio of a remote track
    async fn fetch_track_audio(&self, track: &Track) -> Result<Vec<u8>, CatalogError>;

    async fn fetch_playlists(&self) -> Result<Vec<Playlist>, CatalogError>;

    async fn create_playlist(&self, name: &str, track_ids: &[TrackId]) -> Result<Playlist, CatalogError>;

    async fn update_playlist(&self, playlist: &Playlist) -> Result<Playlist, CatalogError>;

    async fn delete_playlist(&self, id: &PlaylistId) -> Result<(), CatalogError>;
}

/// Stand-in used when no server is configured
///
/// Every call fails as a network failure, so mutations are kept in the
/// pending queues until a server becomes available.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredCatalog;

impl UnconfiguredCatalog {
    fn unavailable<T>() -> Result<T, CatalogError> {
        Err(CatalogError::Network("no catalog server configured".to_string()))
    }
}

#[async_trait]
impl RemoteCatalogClient for UnconfiguredCatalog {
    async fn fetch_tracks(&self) -> Result<Vec<Track>, CatalogError> {
        Self::unavailable()
    }

    async fn fetch_tracks_by_artist(&self, _artist: &str) -> Result<Vec<Track>, CatalogError> {
        Self::unavailable()
    }

    async fn search_tracks(&self, _query: &str) -> Result<Vec<Track>, CatalogError> {
        Self::unavailable()
    }

    async fn upload_track(
        &self,
        _file_name: &str,
        _audio: Vec<u8>,
        _metadata: &TrackMetadata,
    ) -> Result<TrackId, CatalogError> {
        Self::unavailable()
    }

    async fn delete_track(&self, _id: &TrackId) -> Result<(), CatalogError> {
        Self::unavailable()
    }

    async fn fetch_track_image(&self, _id: &TrackId) -> Result<Artwork, CatalogError> {
        Self::unavailable()
    }

    async fn fetch_track_audio(&self, _track: &Track) -> Result<Vec<u8>, CatalogError> {
        Self::unavailable()
    }

    async fn fetch_playlists(&self) -> Result<Vec<Playlist>, CatalogError> {
        Self::unavailable()
    }

    async fn create_playlist(&self, _name: &str, _track_ids: &[TrackId]) -> Result<Playlist, CatalogError> {
        Self::unavailable()
    }

    async fn update_playlist(&self, _playlist: &Playlist) -> Result<Playlist, CatalogError> {
        Self::unavailable()
    }

    async fn delete_playlist(&self, _id: &PlaylistId) -> Result<(), CatalogError> {
        Self::unavailable()
    }
}

/// Catalog client for the configured server, if any
pub fn from_config(config: &EngineConfig) -> Result<Arc<dyn RemoteCatalogClient>, ConfigError> {
    match config.server_url()? {
        Some(url) => {
            info!("Using catalog at {}", url);
            let client = HttpCatalogClient::new(url, config.request_timeout()).map_err(|e| {
                ConfigError::InvalidValue {
                    field: "server_url".to_string(),
                    reason: e.to_string(),
                }
            })?;
            Ok(Arc::new(client))
        }
        None => {
            info!("No catalog server configured, running local only");
            Ok(Arc::new(UnconfiguredCatalog))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_catalog_is_transient() {
        let catalog = UnconfiguredCatalog;

        let err = catalog.fetch_tracks().await.unwrap_err();
        assert!(err.is_transient());

        let err = catalog.delete_track(&TrackId::new("1")).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_from_config() {
        let config = EngineConfig::default();
        assert!(from_config(&config).is_ok());

        let config = EngineConfig {
            server_url: Some("mailto:someone@example.com".to_string()),
            ..EngineConfig::default()
        };
        assert!(matches!(
            from_config(&config),
            Err(ConfigError::InvalidServerUrl { .. })
        ));
    }
}
