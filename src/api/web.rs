//! HTTP implementation of the Web API transport

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use super::{ApiError, Page, PlaylistItem, PlaylistObject, UserProfile, WebApi};

/// Base URL for the Spotify Web API
const SPOTIFY_API_BASE_URL: &str = "https://api.spotify.com/v1";

/// Maximum page size of the playlists listing
const PLAYLISTS_PAGE_LIMIT: u32 = 50;

/// Maximum page size of a playlist's item listing
const PLAYLIST_ITEMS_PAGE_LIMIT: u32 = 100;

/// Client for the Spotify Web API
#[derive(Debug, Clone)]
pub struct WebApiClient {
    client: Client,
    /// Base URL for the API (allows override for testing)
    base_url: String,
}

impl WebApiClient {
    /// Create a new WebApiClient with the given request timeout
    pub fn new(timeout: Duration) -> Result<Self, ApiError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: SPOTIFY_API_BASE_URL.to_string(),
        })
    }

    /// Create a new WebApiClient against a different base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn playlists_url(&self) -> String {
        format!("{}/me/playlists?limit={}", self.base_url, PLAYLISTS_PAGE_LIMIT)
    }

    fn playlist_items_url(&self, playlist_id: &str) -> String {
        format!(
            "{}/playlists/{}/tracks?limit={}&additional_types=track&fields=items(added_at,track(id,name,is_local)),next",
            self.base_url, playlist_id, PLAYLIST_ITEMS_PAGE_LIMIT
        )
    }

    fn playlist_tracks_url(&self, playlist_id: &str) -> String {
        format!("{}/playlists/{}/tracks", self.base_url, playlist_id)
    }

    /// Sends `request`, mapping 401 and other non-success statuses to errors
    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = request.send().await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, token: &str, url: &str) -> Result<T, ApiError> {
        debug!(url, "GET");
        let response = self.send(self.client.get(url).bearer_auth(token)).await?;

        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}

fn track_uri(track_id: &str) -> String {
    format!("spotify:track:{}", track_id)
}

#[async_trait]
impl WebApi for WebApiClient {
    async fn current_user(&self, token: &str) -> Result<UserProfile, ApiError> {
        let url = format!("{}/me", self.base_url);
        self.get_json(token, &url).await
    }

    async fn playlists_page(
        &self,
        token: &str,
        next: Option<&str>,
    ) -> Result<Page<PlaylistObject>, ApiError> {
        let url = next.map_or_else(|| self.playlists_url(), str::to_string);
        self.get_json(token, &url).await
    }

    async fn playlist_items_page(
        &self,
        token: &str,
        playlist_id: &str,
        next: Option<&str>,
    ) -> Result<Page<PlaylistItem>, ApiError> {
        let url = next.map_or_else(|| self.playlist_items_url(playlist_id), str::to_string);
        self.get_json(token, &url).await
    }

    async fn playlist(&self, token: &str, playlist_id: &str) -> Result<PlaylistObject, ApiError> {
        let url = format!("{}/playlists/{}?fields=id,name,owner.id", self.base_url, playlist_id);
        self.get_json(token, &url).await
    }

    async fn remove_playlist_items(
        &self,
        token: &str,
        playlist_id: &str,
        track_ids: &[String],
    ) -> Result<(), ApiError> {
        let url = self.playlist_tracks_url(playlist_id);
        let tracks: Vec<_> = track_ids
            .iter()
            .map(|id| json!({ "uri": track_uri(id) }))
            .collect();
        debug!(url = %url, count = track_ids.len(), "DELETE");

        self.send(
            self.client
                .delete(&url)
                .bearer_auth(token)
                .json(&json!({ "tracks": tracks })),
        )
        .await?;
        Ok(())
    }

    async fn add_playlist_items(
        &self,
        token: &str,
        playlist_id: &str,
        track_ids: &[String],
    ) -> Result<(), ApiError> {
        let url = self.playlist_tracks_url(playlist_id);
        let uris: Vec<String> = track_ids.iter().map(|id| track_uri(id)).collect();
        debug!(url = %url, count = track_ids.len(), "POST");

        self.send(
            self.client
                .post(&url)
                .bearer_auth(token)
                .json(&json!({ "uris": uris })),
        )
        .await?;
        Ok(())
    }
}
