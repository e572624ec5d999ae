//! spotlists library
//!
//! Lists a Spotify user's playlists and their tracks through the Web API,
//! caching responses on disk and optionally sampling tracks by score.

pub mod api;
pub mod app;
pub mod auth;
pub mod cache;
pub mod cli;
pub mod config;
pub mod logging;
pub mod sampling;

#[cfg(test)]
mod stub_server;
