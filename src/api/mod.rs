//! Spotify Web API access
//!
//! This module contains the response models, the [`WebApi`] transport trait and
//! its HTTP implementation, and the cache-fronted [`SpotifyClient`].

mod client;
mod web;

pub use client::{ClientError, PlaylistQuery, SpotifyClient};
pub use web::WebApiClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by the Web API transport
#[derive(Debug, Error)]
pub enum ApiError {
    /// The access token was rejected (HTTP 401)
    #[error("access token rejected by the Web API")]
    Unauthorized,

    /// Any other non-success response
    #[error("Web API returned {status}: {body}")]
    Status { status: u16, body: String },

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Failed to parse JSON response
    #[error("Failed to parse JSON response: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// One page of a paginated listing
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    /// URL of the following page, absent on the last page
    pub next: Option<String>,
}

/// The current user's profile
#[derive(Debug, Clone, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub display_name: Option<String>,
}

/// Playlist as returned by the playlists listing
#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistObject {
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    pub owner: Option<OwnerObject>,
    pub tracks: Option<TracksRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OwnerObject {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TracksRef {
    pub total: u32,
}

/// An entry of a playlist's item listing
#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistItem {
    pub added_at: Option<DateTime<Utc>>,
    /// `null` for removed or unavailable items
    pub track: Option<TrackObject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackObject {
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_local: bool,
}

/// A playlist the user can see
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub owner_id: Option<String>,
    pub track_total: u32,
}

/// A track inside a playlist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    /// Absent for local files
    pub id: Option<String>,
    pub name: String,
    /// When the track was added to the playlist
    pub added_at: Option<DateTime<Utc>>,
    pub is_local: bool,
}

/// Raw Web API calls; one call is one HTTP request
///
/// `next` is the URL of a following page; `None` requests the first page.
#[async_trait]
pub trait WebApi: Send + Sync {
    async fn current_user(&self, token: &str) -> Result<UserProfile, ApiError>;

    async fn playlists_page(
        &self,
        token: &str,
        next: Option<&str>,
    ) -> Result<Page<PlaylistObject>, ApiError>;

    async fn playlist_items_page(
        &self,
        token: &str,
        playlist_id: &str,
        next: Option<&str>,
    ) -> Result<Page<PlaylistItem>, ApiError>;

    /// A single playlist's id, name and owner
    async fn playlist(&self, token: &str, playlist_id: &str) -> Result<PlaylistObject, ApiError>;

    /// Removes every occurrence of the given tracks; at most 100 ids per call
    async fn remove_playlist_items(
        &self,
        token: &str,
        playlist_id: &str,
        track_ids: &[String],
    ) -> Result<(), ApiError>;

    /// Appends the given tracks; at most 100 ids per call
    async fn add_playlist_items(
        &self,
        token: &str,
        playlist_id: &str,
        track_ids: &[String],
    ) -> Result<(), ApiError>;
}
