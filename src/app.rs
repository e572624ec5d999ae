//! Application orchestration
//!
//! Loads configuration, makes sure a token is available, and prints the
//! playlist listing or a weighted sample of tracks. With `--write-target` the
//! sample also replaces the contents of the target playlist.

use std::io::{self, Write};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use crate::api::{ApiError, ClientError, Playlist, SpotifyClient, Track, WebApiClient};
use crate::auth::{
    authorize_url, generate_state, parse_redirect, AccountsClient, AuthError, Credentials,
    TokenEndpoint, TokenManager, TokenStore, SCOPES,
};
use crate::cache::{CacheError, CacheStore};
use crate::cli::{Cli, CliError, RunOptions, SampleOptions};
use crate::config::{Config, ConfigError};
use crate::sampling::sample_weighted;

/// Timeout applied to every HTTP request
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Any error that ends a run
#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cli(#[from] CliError),

    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Spotify API error: {0}")]
    Api(#[from] ApiError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<ClientError> for AppError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Auth(e) => AppError::Auth(e),
            ClientError::Api(e) => AppError::Api(e),
        }
    }
}

/// Runs the program for parsed arguments, writing results to stdout
pub async fn run(cli: Cli) -> Result<(), AppError> {
    let config = Config::load(&cli.env_file)?;
    let options = RunOptions::from_cli(&cli, &config)?;

    let cache = CacheStore::with_dir(config.cache_dir.clone());
    debug!(dir = %cache.dir().display(), ttl = config.cache_ttl_seconds, "using cache");
    if options.clear_cache {
        let removed = cache.clear()?;
        info!(removed, "cache cleared");
        eprintln!("Cleared {} cached responses", removed);
    }

    let credentials = Credentials {
        client_id: config.client_id.clone(),
        client_secret: config.client_secret.clone(),
        redirect_uri: config.redirect_uri.clone(),
    };
    let store = TokenStore::new(config.token_path.clone());
    if options.reauthorize {
        store.remove()?;
        info!(path = %store.path().display(), "stored token removed");
    }

    let mut tokens = TokenManager::new(AccountsClient::new(HTTP_TIMEOUT)?, credentials).with_store(store);
    tokens.load_stored()?;
    let new_authorization = !tokens.has_token();
    if new_authorization {
        authorize_interactively(&mut tokens).await?;
    }

    let api = WebApiClient::new(HTTP_TIMEOUT)?;
    let mut client = SpotifyClient::new(api, tokens, Some(cache), config.cache_ttl_seconds)
        .with_force_refresh(options.force_refresh);
    if options.reauthorize || new_authorization {
        // The account may have changed.
        client.forget_current_user();
    }

    let playlists = client.user_playlists(&options.playlists).await?;
    let mut listing = Vec::with_capacity(playlists.len());
    for playlist in playlists {
        let tracks = client.playlist_tracks(&playlist.id, options.include_local).await?;
        listing.push((playlist, tracks));
    }

    let Some(sample) = &options.sample else {
        let mut out = io::stdout().lock();
        write_listing(&mut out, &listing)?;
        out.flush()?;
        return Ok(());
    };

    let all: Vec<Track> = listing.into_iter().flat_map(|(_, tracks)| tracks).collect();
    let picked = sample_tracks(&all, sample);

    if let Some(target) = &options.write_target {
        let track_ids: Vec<String> = picked.iter().filter_map(|t| t.id.clone()).collect();
        let removed = client.replace_playlist_tracks(target, &track_ids).await?;
        eprintln!(
            "Replaced {} tracks in playlist {} with {} sampled tracks",
            removed,
            target,
            track_ids.len()
        );
    }

    let mut out = io::stdout().lock();
    write_sample(&mut out, &picked)?;
    out.flush()?;
    Ok(())
}

/// Walks the user through the Authorization Code flow on the terminal
async fn authorize_interactively<E: TokenEndpoint>(tokens: &mut TokenManager<E>) -> Result<(), AppError> {
    let state = generate_state();
    let url = authorize_url(tokens.credentials(), SCOPES, &state);

    eprintln!("Open this URL in your browser and approve access:\n\n  {}\n", url);
    eprintln!("Then paste the full URL you were redirected to:");

    let mut line = String::new();
    let read = BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
    if read == 0 || line.trim().is_empty() {
        return Err(AuthError::NotAuthenticated.into());
    }

    let code = parse_redirect(&line, &state)?;
    tokens.authorize_with_code(&code).await?;
    eprintln!("Authorized.");
    Ok(())
}

fn sample_tracks(tracks: &[Track], sample: &SampleOptions) -> Vec<Track> {
    sample_weighted(
        tracks,
        sample.size,
        sample.temperature,
        sample.model,
        Utc::now(),
        &mut rand::thread_rng(),
    )
}

/// Writes each playlist id followed by its indented track ids
pub fn write_listing<W: Write>(out: &mut W, listing: &[(Playlist, Vec<Track>)]) -> io::Result<()> {
    for (playlist, tracks) in listing {
        writeln!(out, "{}", playlist.id)?;
        for track in tracks {
            match &track.id {
                Some(id) => writeln!(out, "  {}", id)?,
                None => writeln!(out, "  local:{}", track.name)?,
            }
        }
    }
    Ok(())
}

/// Writes one sampled track id per line
pub fn write_sample<W: Write>(out: &mut W, tracks: &[Track]) -> io::Result<()> {
    for track in tracks {
        if let Some(id) = &track.id {
            writeln!(out, "{}", id)?;
        }
    }
    Ok(())
}
