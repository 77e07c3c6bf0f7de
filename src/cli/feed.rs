//! Load and print a discovery list.
//!
//! The command builds the same screen a client would, backed by a fixture
//! file instead of the network, and waits for the network pass to land
//! before printing. With a `cache_dir` configured, a second invocation
//! renders the persisted list first.

use crate::config::FeedConfig;
use crate::core::{FeedItem, GeoPoint, ResourceKind};
use crate::fixtures::FixtureBackend;
use crate::join::JoinEngine;
use crate::pagination::LoadNextOutcome;
use crate::pipeline::{PipelineServices, RenderSource};
use crate::request::{FixedLocation, LocationProvider, NoLocation};
use crate::screen::{ScreenController, ScreenHandle, ScreenView};
use crate::session::{Generation, QuerySession};
use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// `feed` command.
#[derive(Args, Debug)]
pub struct FeedCommand {
    /// JSON fixture file serving the list and its datasets
    #[arg(long, value_name = "FILE")]
    fixtures: PathBuf,

    /// Resource kind to list (restaurant, event)
    #[arg(long, default_value = "restaurant")]
    kind: ResourceKind,

    /// Tag filter; repeat to require several
    #[arg(long = "tag", value_name = "TAG")]
    tags: Vec<String>,

    /// City scope
    #[arg(long, value_name = "ID")]
    city: Option<String>,

    /// Device latitude; enables distances
    #[arg(long, requires = "lon", allow_hyphen_values = true)]
    lat: Option<f64>,

    /// Device longitude
    #[arg(long, requires = "lat", allow_hyphen_values = true)]
    lon: Option<f64>,

    /// Number of pages to load
    #[arg(long, default_value_t = 1)]
    pages: u32,

    /// Reference date for schedules (default: today)
    #[arg(long, value_name = "YYYY-MM-DD")]
    date: Option<NaiveDate>,

    /// Print the list as JSON
    #[arg(long)]
    json: bool,
}

impl FeedCommand {
    fn query(&self) -> QuerySession {
        let mut query = QuerySession::new(self.kind);
        for tag in &self.tags {
            query = query.with_tag(tag);
        }
        if let Some(city) = &self.city {
            query = query.with_city(city);
        }
        query
    }

    fn location(&self) -> Arc<dyn LocationProvider> {
        match self.lat.zip(self.lon) {
            Some((lat, lon)) => Arc::new(FixedLocation(GeoPoint::new(lat, lon))),
            None => Arc::new(NoLocation),
        }
    }

    /// Loads the list and prints it.
    ///
    /// # Errors
    ///
    /// Returns an error if the config or fixtures cannot be loaded, or the
    /// list fetch fails.
    pub async fn execute(self, config_path: Option<PathBuf>) -> Result<()> {
        let config = FeedConfig::load_with_optional(config_path).await?;
        let backend = Arc::new(FixtureBackend::load(&self.fixtures).await?);

        let join = JoinEngine::new()
            .with_schedules(backend.clone())
            .with_assessments(backend.clone())
            .with_fan_out_limit(config.fan_out_limit);
        let services = PipelineServices::new(backend, join, self.location(), config.cache());

        let mut options = config.screen_options();
        options.pipeline.reference_date = self.date;
        let screen = ScreenController::spawn(services, config.mutation_bus(), options);

        let query = self.query();
        let generation = screen
            .load_resources(query)
            .ok_or_else(|| anyhow!("Screen already shows this query"))?;
        let view = wait_for_network(&screen, generation).await?;
        if let Some(error) = &view.error {
            return Err(anyhow::Error::new(error.as_ref().clone()));
        }

        let mut loaded = view.items.len();
        for _ in 1..self.pages {
            match screen.load_next().await {
                LoadNextOutcome::Appended {
                    items,
                    ..
                } => {
                    loaded += items.len();
                    let mut views = screen.subscribe();
                    views
                        .wait_for(|view| view.items.len() >= loaded)
                        .await
                        .context("Screen stopped while appending a page")?;
                }
                LoadNextOutcome::Failed(error) => return Err(error.into()),
                outcome => {
                    info!(?outcome, "No further pages");
                    break;
                }
            }
        }

        let view = screen.view();
        if self.json {
            println!("{}", serde_json::to_string_pretty(&view.items)?);
        } else {
            print_items(&view);
        }
        Ok(())
    }
}

/// Waits until `generation` rendered a network result or failed.
async fn wait_for_network(screen: &ScreenHandle, generation: Generation) -> Result<ScreenView> {
    let mut views = screen.subscribe();
    let view = views
        .wait_for(|view| {
            view.generation == generation
                && (view.error.is_some() || view.source.is_some_and(|s| s != RenderSource::Cache))
        })
        .await
        .context("Screen stopped before the list loaded")?;
    Ok(view.clone())
}

fn print_items(view: &ScreenView) {
    if view.items.is_empty() {
        println!("{}", "No results".yellow());
        return;
    }

    for (index, item) in view.items.iter().enumerate() {
        println!("{:>3}. {}", index + 1, describe(item));
    }
}

fn describe(item: &FeedItem) -> String {
    let mut line = format!("{} {}", item.resource.title.bold(), format!("[{}]", item.id()).dimmed());
    if item.resource.favorite {
        line.push_str(&format!(" {}", "♥".red()));
    }
    if let Some(distance) = item.distance_text() {
        line.push_str(&format!(" {}", distance.cyan()));
    }
    if let Some(assessment) = &item.assessment {
        line.push_str(&format!(" ★ {:.1} ({})", assessment.rating, assessment.count));
    }
    if let Some(schedule) = &item.schedule {
        line.push_str(&format!(" {}", format!("{} slots", schedule.slots.len()).green()));
    }
    line
}
