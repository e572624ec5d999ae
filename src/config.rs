//! Configuration loading for spotlists
//!
//! Credentials and tunables come from a `config.env` file (loaded with dotenvy)
//! and the process environment. Variables already present in the environment
//! take precedence over the file.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::cache::CacheStore;

/// Env file read when no other path is given
pub const DEFAULT_ENV_FILE: &str = "config.env";

/// Redirect URI registered for the Spotify app by default
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8888/callback";

/// Default cache TTL in seconds
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 3600;

/// Default number of tracks for `--sample`
pub const DEFAULT_SAMPLE_SIZE: usize = 10;

/// Default softmax temperature for `--sample`
pub const DEFAULT_SAMPLING_TEMPERATURE: f64 = 1.0;

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is unset or empty
    #[error("{0} is not set; add it to config.env or the environment")]
    Missing(&'static str),

    /// A variable is set but cannot be used
    #[error("invalid value for {name}: '{value}' ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },

    /// The env file exists but could not be loaded
    #[error("failed to load {path}: {source}")]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },

    /// Neither CACHE_DIR nor a home directory is available
    #[error("cannot determine a cache directory; set CACHE_DIR")]
    NoCacheDir,
}

/// Runtime configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    /// TTL applied to every cache write
    pub cache_ttl_seconds: u64,
    pub cache_dir: PathBuf,
    /// Where the OAuth token is persisted between runs
    pub token_path: PathBuf,
    /// Playlist id taken from TARGET_PLAYLIST_URL, excluded from listings
    pub target_playlist_id: Option<String>,
    pub sample_size: usize,
    pub sampling_temperature: f64,
}

impl Config {
    /// Loads `env_file` (if it exists) and then reads the process environment
    ///
    /// A missing env file is not an error; all values can come from the environment.
    pub fn load(env_file: &Path) -> Result<Self, ConfigError> {
        match dotenvy::from_path(env_file) {
            Ok(()) => debug!(path = %env_file.display(), "loaded env file"),
            Err(dotenvy::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %env_file.display(), "no env file, using process environment");
            }
            Err(source) => {
                return Err(ConfigError::EnvFile {
                    path: env_file.to_path_buf(),
                    source,
                })
            }
        }

        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Empty values behave as unset.
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let client_id = var("SPOTIFY_CLIENT_ID").ok_or(ConfigError::Missing("SPOTIFY_CLIENT_ID"))?;
        let client_secret =
            var("SPOTIFY_CLIENT_SECRET").ok_or(ConfigError::Missing("SPOTIFY_CLIENT_SECRET"))?;
        let redirect_uri =
            var("SPOTIFY_REDIRECT_URI").unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string());

        let cache_ttl_seconds = match var("CACHE_TTL_SECONDS") {
            Some(raw) => parse_number("CACHE_TTL_SECONDS", &raw)?,
            None => DEFAULT_CACHE_TTL_SECONDS,
        };

        let cache_dir = match var("CACHE_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => CacheStore::default_dir().ok_or(ConfigError::NoCacheDir)?,
        };
        let token_path = var("TOKEN_CACHE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| cache_dir.join("token.json"));

        let target_playlist_id = var("TARGET_PLAYLIST_URL").and_then(|url| playlist_id_from_url(&url));

        let sample_size = match var("SAMPLE_SIZE") {
            Some(raw) => parse_number("SAMPLE_SIZE", &raw)?,
            None => DEFAULT_SAMPLE_SIZE,
        };

        let sampling_temperature = match var("SAMPLING_TEMPERATURE") {
            Some(raw) => {
                let t: f64 = parse_number("SAMPLING_TEMPERATURE", &raw)?;
                if !t.is_finite() {
                    return Err(ConfigError::Invalid {
                        name: "SAMPLING_TEMPERATURE",
                        value: raw,
                        reason: "must be a finite number".to_string(),
                    });
                }
                t
            }
            None => DEFAULT_SAMPLING_TEMPERATURE,
        };

        Ok(Config {
            client_id,
            client_secret,
            redirect_uri,
            cache_ttl_seconds,
            cache_dir,
            token_path,
            target_playlist_id,
            sample_size,
            sampling_temperature,
        })
    }
}

fn parse_number<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

/// Extracts a playlist id from a share URL, a `spotify:playlist:` URI or a bare id
///
/// Returns `None` for empty input.
pub fn playlist_id_from_url(input: &str) -> Option<String> {
    let input = input.trim();
    let id = if let Some((_, rest)) = input.split_once("open.spotify.com/playlist/") {
        rest.split(['?', '#', '/']).next().unwrap_or_default()
    } else if let Some((_, rest)) = input.split_once("spotify:playlist:") {
        rest
    } else {
        input
    };

    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}
