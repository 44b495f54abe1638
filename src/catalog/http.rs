//! REST client for the catalog server.
//!
//! Endpoints, relative to the configured base URL:
//!
//! * `GET tracks`, `GET tracks?artist=`, `GET tracks/search?q=`
//! * `POST tracks?title=&artist=&filename=` with the raw audio as body
//! * `DELETE tracks/{id}`
//! * `GET tracks/{id}/artwork`, `GET tracks/{id}/audio`
//! * `GET playlists`, `POST playlists`, `PUT playlists/{id}`,
//!   `DELETE playlists/{id}`

use async_trait::async_trait;
use log::{debug, trace};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use super::RemoteCatalogClient;
use crate::error::CatalogError;
use crate::models::{Artwork, Playlist, PlaylistId, Track, TrackId, TrackMetadata, TrackSource};

pub struct HttpCatalogClient {
    base_url: Url,
    client: reqwest::Client,
}

/// Track as served by the catalog
#[derive(Debug, Clone, Deserialize)]
struct TrackDto {
    id: String,
    title: String,
    #[serde(default)]
    artist: String,
    #[serde(default)]
    artwork: Option<String>,
    #[serde(default)]
    audio_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct PlaylistRequest<'a> {
    name: &'a str,
    track_ids: &'a [TrackId],
}

/// Map a response status to the catalog error taxonomy
///
/// Timeouts, throttling and server errors are transient; other failures are
/// domain errors that retrying will not fix.
pub fn classify_status(status: StatusCode, what: &str) -> Result<(), CatalogError> {
    if status.is_success() {
        return Ok(());
    }

    Err(match status {
        StatusCode::NOT_FOUND => CatalogError::NotFound(what.to_string()),
        StatusCode::CONFLICT => CatalogError::Conflict(what.to_string()),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            CatalogError::Network(format!("{} returned {}", what, status))
        }
        status if status.is_server_error() => {
            CatalogError::Network(format!("{} returned {}", what, status))
        }
        status => CatalogError::Rejected {
            status: status.as_u16(),
            message: format!("{} returned {}", what, status),
        },
    })
}

impl HttpCatalogClient {
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, CatalogError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, CatalogError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| CatalogError::InvalidPayload(format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, CatalogError> {
        let url = self.endpoint(segments)?;
        trace!("{} {}", method, url);
        Ok(self.client.request(method, url))
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response, CatalogError> {
        let response = request.send().await?;
        classify_status(response.status(), what)?;
        Ok(response)
    }

    async fn get_tracks(&self, request: RequestBuilder, what: &str) -> Result<Vec<Track>, CatalogError> {
        let dtos: Vec<TrackDto> = self.send(request, what).await?.json().await?;
        debug!("{} returned {} tracks", what, dtos.len());
        dtos.into_iter().map(|dto| self.to_track(dto)).collect()
    }

    fn to_track(&self, dto: TrackDto) -> Result<Track, CatalogError> {
        let audio_url = match dto.audio_url.as_deref() {
            Some(raw) => self
                .base_url
                .join(raw)
                .map_err(|e| CatalogError::InvalidResponse(format!("audio URL '{}': {}", raw, e)))?,
            None => self.endpoint(&["tracks", dto.id.as_str(), "audio"])?,
        };

        let mut track = Track::new(
            Some(TrackId::new(dto.id)),
            dto.title,
            dto.artist,
            TrackSource::Remote(audio_url),
        );
        track.artwork = dto.artwork;
        Ok(track)
    }

    async fn bytes(&self, request: RequestBuilder, what: &str) -> Result<Vec<u8>, CatalogError> {
        let body = self.send(request, what).await?.bytes().await?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl RemoteCatalogClient for HttpCatalogClient {
    async fn fetch_tracks(&self) -> Result<Vec<Track>, CatalogError> {
        let request = self.request(Method::GET, &["tracks"])?;
        self.get_tracks(request, "tracks").await
    }

    async fn fetch_tracks_by_artist(&self, artist: &str) -> Result<Vec<Track>, CatalogError> {
        let request = self
            .request(Method::GET, &["tracks"])?
            .query(&[("artist", artist)]);
        self.get_tracks(request, artist).await
    }

    async fn search_tracks(&self, query: &str) -> Result<Vec<Track>, CatalogError> {
        let request = self
            .request(Method::GET, &["tracks", "search"])?
            .query(&[("q", query)]);
        self.get_tracks(request, query).await
    }

    async fn upload_track(
        &self,
        file_name: &str,
        audio: Vec<u8>,
        metadata: &TrackMetadata,
    ) -> Result<TrackId, CatalogError> {
        let request = self
            .request(Method::POST, &["tracks"])?
            .query(&[
                ("title", metadata.title.as_str()),
                ("artist", metadata.artist.as_str()),
                ("filename", file_name),
            ])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(audio);

        let uploaded: UploadResponse = self.send(request, file_name).await?.json().await?;
        Ok(TrackId::new(uploaded.id))
    }

    async fn delete_track(&self, id: &TrackId) -> Result<(), CatalogError> {
        let request = self.request(Method::DELETE, &["tracks", id.as_str()])?;
        self.send(request, id.as_str()).await?;
        Ok(())
    }

    async fn fetch_track_image(&self, id: &TrackId) -> Result<Artwork, CatalogError> {
        let request = self.request(Method::GET, &["tracks", id.as_str(), "artwork"])?;
        Ok(Artwork(self.bytes(request, id.as_str()).await?))
    }

    async fn fetch_track_audio(&self, track: &Track) -> Result<Vec<u8>, CatalogError> {
        let request = match (&track.source, &track.id) {
            (TrackSource::Remote(url), _) => self.client.get(url.clone()),
            (TrackSource::File(_), Some(id)) => self.request(Method::GET, &["tracks", id.as_str(), "audio"])?,
            (TrackSource::File(_), None) => {
                return Err(CatalogError::InvalidPayload(format!(
                    "'{}' has no remote source",
                    track.title
                )))
            }
        };
        self.bytes(request, &track.title).await
    }

    async fn fetch_playlists(&self) -> Result<Vec<Playlist>, CatalogError> {
        let request = self.request(Method::GET, &["playlists"])?;
        Ok(self.send(request, "playlists").await?.json().await?)
    }

    async fn create_playlist(&self, name: &str, track_ids: &[TrackId]) -> Result<Playlist, CatalogError> {
        let request = self
            .request(Method::POST, &["playlists"])?
            .json(&PlaylistRequest { name, track_ids });
        Ok(self.send(request, name).await?.json().await?)
    }

    async fn update_playlist(&self, playlist: &Playlist) -> Result<Playlist, CatalogError> {
        let request = self
            .request(Method::PUT, &["playlists", playlist.id.0.as_str()])?
            .json(&PlaylistRequest {
                name: &playlist.name,
                track_ids: &playlist.track_ids,
            });
        Ok(self.send(request, &playlist.name).await?.json().await?)
    }

    async fn delete_playlist(&self, id: &PlaylistId) -> Result<(), CatalogError> {
        let request = self.request(Method::DELETE, &["playlists", id.0.as_str()])?;
        self.send(request, &id.0).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and return the request line
    async fn serve_once(status: &str, body: &str) -> (Url, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("http://{}/api/", listener.local_addr().unwrap())).unwrap();
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).lines().next().unwrap_or_default().to_string()
        });

        (url, handle)
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status(StatusCode::OK, "x").is_ok());
        assert!(classify_status(StatusCode::NO_CONTENT, "x").is_ok());

        assert_eq!(
            classify_status(StatusCode::NOT_FOUND, "7"),
            Err(CatalogError::NotFound("7".to_string()))
        );
        assert_eq!(
            classify_status(StatusCode::CONFLICT, "7"),
            Err(CatalogError::Conflict("7".to_string()))
        );
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE, "x").unwrap_err().is_transient());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "x").unwrap_err().is_transient());
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "x"),
            Err(CatalogError::Rejected { status: 400, .. })
        ));
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let client = HttpCatalogClient::new(
            Url::parse("https://music.example/api/").unwrap(),
            Duration::from_secs(5),
        )
        .unwrap();

        let url = client.endpoint(&["tracks", "a b/c", "artwork"]).unwrap();
        assert_eq!(url.as_str(), "https://music.example/api/tracks/a%20b%2Fc/artwork");
    }

    #[tokio::test]
    async fn test_fetch_tracks_parses_catalog() {
        let body = r#"[{"id":"1","title":"One","artist":"A, B"},{"id":"2","title":"Two","audio_url":"/media/2.flac"}]"#;
        let (url, server) = serve_once("200 OK", body).await;
        let client = HttpCatalogClient::new(url, Duration::from_secs(5)).unwrap();

        let tracks = client.fetch_tracks().await.unwrap();
        assert_eq!(server.await.unwrap(), "GET /api/tracks HTTP/1.1");

        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].id, Some(TrackId::new("1")));
        assert_eq!(tracks[0].artists(), vec!["A", "B"]);
        match &tracks[0].source {
            TrackSource::Remote(audio) => assert!(audio.path().ends_with("/api/tracks/1/audio")),
            other => panic!("Expected remote source, got {:?}", other),
        }
        match &tracks[1].source {
            TrackSource::Remote(audio) => assert_eq!(audio.path(), "/media/2.flac"),
            other => panic!("Expected remote source, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_delete_missing_track_is_not_found() {
        let (url, server) = serve_once("404 Not Found", "{}").await;
        let client = HttpCatalogClient::new(url, Duration::from_secs(5)).unwrap();

        let result = client.delete_track(&TrackId::new("9")).await;
        assert_eq!(server.await.unwrap(), "DELETE /api/tracks/9 HTTP/1.1");
        assert_eq!(result, Err(CatalogError::NotFound("9".to_string())));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transient() {
        let client = HttpCatalogClient::new(
            Url::parse("http://127.0.0.1:1/").unwrap(),
            Duration::from_secs(2),
        )
        .unwrap();

        let err = client.fetch_tracks().await.unwrap_err();
        assert!(err.is_transient(), "unexpected error: {:?}", err);
    }
}
