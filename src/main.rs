//! discovery-feed CLI entry point
//!
//! Parses arguments, runs the command, and renders failures through
//! [`user_friendly_error`] before exiting with status 1.
//!
//! - `feed` - load a discovery list from a fixture backend and print it
//! - `config` - manage `~/.discovery-feed/config.toml`

use anyhow::Result;
use clap::Parser;
use discovery_feed::cli;
use discovery_feed::core::user_friendly_error;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    match cli.execute().await {
        Ok(()) => Ok(()),
        Err(e) => {
            let error_ctx = user_friendly_error(e);
            error_ctx.display();
            std::process::exit(1);
        }
    }
}
