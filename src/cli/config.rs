//! Manage the user configuration file.
//!
//! ```bash
//! discovery-feed config init          # write defaults
//! discovery-feed config init --force  # overwrite an existing file
//! discovery-feed config show          # print the effective configuration
//! discovery-feed config               # same as show
//! discovery-feed config path          # print the file location
//! ```

use crate::config::FeedConfig;
use anyhow::Result;
use clap::{Args, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

/// `config` command.
#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    command: Option<ConfigSubcommands>,
}

#[derive(Subcommand)]
enum ConfigSubcommands {
    /// Write a config file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration (defaults when no file exists)
    Show,

    /// Print the config file location
    Path,
}

impl ConfigCommand {
    /// Runs the subcommand against `config_path`, or the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or written.
    pub async fn execute(self, config_path: Option<PathBuf>) -> Result<()> {
        match self.command {
            Some(ConfigSubcommands::Init {
                force,
            }) => Self::init(force, config_path).await,
            Some(ConfigSubcommands::Show) | None => Self::show(config_path).await,
            Some(ConfigSubcommands::Path) => Self::show_path(config_path),
        }
    }

    fn resolve(config_path: Option<PathBuf>) -> Result<PathBuf> {
        match config_path {
            Some(path) => Ok(path),
            None => FeedConfig::default_path(),
        }
    }

    async fn init(force: bool, config_path: Option<PathBuf>) -> Result<()> {
        let path = Self::resolve(config_path)?;

        if tokio::fs::try_exists(&path).await.unwrap_or(false) && !force {
            println!("❌ Config already exists at: {}", path.display());
            println!("   Use --force to overwrite");
            return Ok(());
        }

        let config = FeedConfig::default();
        config.save_to(&path).await?;

        println!("✅ Created config at: {}", path.display());
        println!("\n{}", "Configuration:".bold());
        println!("{}", toml::to_string_pretty(&config)?);
        Ok(())
    }

    async fn show(config_path: Option<PathBuf>) -> Result<()> {
        let path = Self::resolve(config_path)?;
        let config = FeedConfig::load_with_optional(Some(path.clone())).await?;

        println!("{}", "Configuration".bold());
        println!("Location: {}\n", path.display());
        println!("{}", toml::to_string_pretty(&config)?);

        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            println!("{}", "Tip:".yellow());
            println!("  No config file found, showing defaults. Run 'discovery-feed config init' to create one");
        }
        Ok(())
    }

    fn show_path(config_path: Option<PathBuf>) -> Result<()> {
        println!("{}", Self::resolve(config_path)?.display());
        Ok(())
    }
}
