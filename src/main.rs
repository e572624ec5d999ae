//! spotlists - List Spotify playlists and their tracks
//!
//! A command-line tool that prints the playlists a user owns (or follows) and
//! the tracks in each, caching API responses locally between runs.

use std::process::ExitCode;

use clap::Parser;

use spotlists::app;
use spotlists::cli::Cli;
use spotlists::logging::init_logging;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match app::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!(error = ?e, "run failed");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
