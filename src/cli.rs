//! Command-line interface parsing for spotlists
//!
//! This module handles parsing of CLI arguments using clap and resolves them,
//! together with the loaded [`Config`], into the options for one run.

use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;

use crate::api::PlaylistQuery;
use crate::config::{Config, DEFAULT_ENV_FILE};
use crate::sampling::ScoreModel;

/// Error types for CLI argument validation
#[derive(Debug, Error)]
pub enum CliError {
    /// `--sample` was given a count of zero
    #[error("Invalid sample size: 0. Use a positive number of tracks")]
    ZeroSampleSize,

    /// The temperature is not a finite number
    #[error("Invalid temperature: '{0}'. Use a finite number, e.g. 0.5")]
    InvalidTemperature(f64),

    /// `--write-target` without a playlist to write to
    #[error("--write-target needs TARGET_PLAYLIST_URL to be set")]
    NoTargetPlaylist,
}

/// spotlists - List your Spotify playlists and their tracks
#[derive(Parser, Debug)]
#[command(name = "spotlists")]
#[command(about = "List Spotify playlists and their tracks, with a local response cache")]
#[command(version)]
pub struct Cli {
    /// Env file with SPOTIFY_CLIENT_ID, SPOTIFY_CLIENT_SECRET and tunables
    #[arg(long, value_name = "PATH", default_value = DEFAULT_ENV_FILE)]
    pub env_file: PathBuf,

    /// Remove all cached responses before running
    #[arg(long)]
    pub clear_cache: bool,

    /// Ignore cached responses for this run (fresh results are still cached)
    #[arg(long)]
    pub force_refresh: bool,

    /// Discard the stored token and authorize again
    #[arg(long)]
    pub reauthorize: bool,

    /// Include playlists you follow but do not own
    #[arg(long)]
    pub all_playlists: bool,

    /// Include local files (tracks without a Spotify id)
    #[arg(long)]
    pub include_local: bool,

    /// Playlist id or URL to leave out (repeatable)
    #[arg(long, value_name = "PLAYLIST")]
    pub ignore: Vec<String>,

    /// Print weighted-sampled track ids instead of the full listing
    ///
    /// Examples:
    ///   spotlists --sample          # SAMPLE_SIZE tracks (default 10)
    ///   spotlists --sample 25       # 25 tracks
    #[arg(long, value_name = "N")]
    pub sample: Option<Option<usize>>,

    /// Replace the tracks of TARGET_PLAYLIST_URL with the sample (implies --sample)
    #[arg(long)]
    pub write_target: bool,

    /// Sampling temperature; 0 picks the top scores (default SAMPLING_TEMPERATURE)
    #[arg(long, value_name = "T", allow_negative_numbers = true)]
    pub temperature: Option<f64>,

    /// Scoring model used by --sample
    #[arg(long, value_enum, default_value_t = ScoreModel::Recency)]
    pub score: ScoreModel,

    /// Log debug output to stderr
    #[arg(short, long)]
    pub verbose: bool,
}

/// Sampling options resolved from CLI and configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SampleOptions {
    pub size: usize,
    pub temperature: f64,
    pub model: ScoreModel,
}

/// Options for one run, derived from CLI arguments and configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub clear_cache: bool,
    pub force_refresh: bool,
    pub reauthorize: bool,
    pub include_local: bool,
    pub playlists: PlaylistQuery,
    /// `Some` when sampling instead of listing
    pub sample: Option<SampleOptions>,
    /// Playlist id whose tracks are replaced by the sample
    pub write_target: Option<String>,
}

impl RunOptions {
    /// Combines parsed CLI arguments with the loaded configuration
    ///
    /// TARGET_PLAYLIST_URL from the configuration is added to the ignore list.
    pub fn from_cli(cli: &Cli, config: &Config) -> Result<Self, CliError> {
        let mut ignore: Vec<String> = cli
            .ignore
            .iter()
            .filter_map(|p| crate::config::playlist_id_from_url(p))
            .collect();
        if let Some(target) = &config.target_playlist_id {
            ignore.push(target.clone());
        }
        ignore.sort();
        ignore.dedup();

        let write_target = if cli.write_target {
            let target = config
                .target_playlist_id
                .clone()
                .ok_or(CliError::NoTargetPlaylist)?;
            Some(target)
        } else {
            None
        };

        let requested = match (cli.sample, cli.write_target) {
            (Some(size), _) => Some(size),
            (None, true) => Some(None),
            (None, false) => None,
        };
        let sample = match requested {
            None => None,
            Some(size) => {
                let size = size.unwrap_or(config.sample_size);
                if size == 0 {
                    return Err(CliError::ZeroSampleSize);
                }
                let temperature = cli.temperature.unwrap_or(config.sampling_temperature);
                if !temperature.is_finite() {
                    return Err(CliError::InvalidTemperature(temperature));
                }
                Some(SampleOptions {
                    size,
                    temperature,
                    model: cli.score,
                })
            }
        };

        Ok(RunOptions {
            clear_cache: cli.clear_cache,
            force_refresh: cli.force_refresh,
            reauthorize: cli.reauthorize,
            include_local: cli.include_local,
            playlists: PlaylistQuery {
                include_followed: cli.all_playlists,
                ignore,
            },
            sample,
            write_target,
        })
    }
}
