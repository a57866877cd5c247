//! Command-line interface for flowtrack.
//!
//! Provides commands for appending lifecycle events, inspecting single
//! instances, listing filtered summaries and reading status statistics.

use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::adapters::SqliteEventLog;
use crate::config::{self, ResolvedConfig};
use crate::core::{CategorizationService, FlowService};
use crate::domain::{AggregateKey, Event, InstanceFlowSummary, InstanceStatistics};

pub mod args;

use args::{FilterArgs, PageArgs};

/// flowtrack - Instance flow tracking over an event log
#[derive(Parser, Debug)]
#[command(name = "flowtrack")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Event log database (overrides configuration)
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Append events (one JSON object per line)
    Append {
        /// JSONL file (reads from stdin if not provided)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Show the event history of one instance
    Events {
        #[command(flatten)]
        key: KeyArgs,
    },

    /// Show the current state of one instance
    Summary {
        #[command(flatten)]
        key: KeyArgs,
    },

    /// List instance summaries
    Summaries {
        #[command(flatten)]
        filter: FilterArgs,

        #[command(flatten)]
        page: PageArgs,
    },

    /// Count instances per lifecycle status
    Stats {
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Count instances per lifecycle status for each integration
    IntegrationStats {
        #[command(flatten)]
        filter: FilterArgs,

        #[command(flatten)]
        page: PageArgs,
    },

    /// List the event categories
    Categories,

    /// Show resolved configuration (debug)
    Config,
}

#[derive(clap::Args, Debug, Clone)]
pub struct KeyArgs {
    /// Source application id
    pub source_application_id: i64,

    /// Source application integration id
    pub source_application_integration_id: String,

    /// Source application instance id
    pub source_application_instance_id: String,
}

impl From<KeyArgs> for AggregateKey {
    fn from(args: KeyArgs) -> Self {
        AggregateKey::new(
            args.source_application_id,
            args.source_application_integration_id,
            args.source_application_instance_id,
        )
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let json = self.json;
        let database = self.database;

        match self.command {
            Commands::Append { input } => {
                let (service, _) = open_service(database)?;
                append_events(&service, input, json).await
            }
            Commands::Events { key } => {
                let (service, _) = open_service(database)?;
                show_events(&service, key.into(), json).await
            }
            Commands::Summary { key } => {
                let (service, _) = open_service(database)?;
                show_summary(&service, key.into(), json).await
            }
            Commands::Summaries { filter, page } => {
                let (service, cfg) = open_service(database)?;
                list_summaries(&service, cfg, filter, page, json).await
            }
            Commands::Stats { filter } => {
                let (service, _) = open_service(database)?;
                show_statistics(&service, filter, json).await
            }
            Commands::IntegrationStats { filter, page } => {
                let (service, cfg) = open_service(database)?;
                show_integration_statistics(&service, cfg, filter, page, json).await
            }
            Commands::Categories => show_categories(json),
            Commands::Config => show_config(json),
        }
    }
}

/// Open the event log and wrap it in a service
fn open_service(database: Option<PathBuf>) -> Result<(FlowService, &'static ResolvedConfig)> {
    let cfg = config::config()?;
    let path = database.unwrap_or_else(|| cfg.database.clone());

    let log = SqliteEventLog::open(&path)
        .with_context(|| format!("Failed to open event log: {}", path.display()))?;
    Ok((FlowService::new(Arc::new(log), cfg.query_settings()), cfg))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

/// Append JSONL events from a file or stdin
async fn append_events(service: &FlowService, input: Option<PathBuf>, json: bool) -> Result<()> {
    let reader: Box<dyn BufRead> = match input {
        Some(ref path) => Box::new(BufReader::new(
            std::fs::File::open(path)
                .with_context(|| format!("Failed to read input file: {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let mut ids = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read input")?;
        if line.trim().is_empty() {
            continue;
        }
        let event: Event = serde_json::from_str(&line)
            .with_context(|| format!("Invalid event on line {}", index + 1))?;
        let id = service
            .append_event(event)
            .await
            .with_context(|| format!("Failed to append event on line {}", index + 1))?;
        ids.push(id);
    }

    if json {
        print_json(&ids)
    } else {
        eprintln!("Appended {} event(s)", ids.len());
        Ok(())
    }
}

async fn show_events(service: &FlowService, key: AggregateKey, json: bool) -> Result<()> {
    let events = service.get_events(&key).await?;
    if json {
        return print_json(&events);
    }

    if events.is_empty() {
        println!("No events for {}", key);
        return Ok(());
    }

    println!("{:<10} {:<27} {:<6} {:<42} {}", "ID", "TIMESTAMP", "KIND", "NAME", "DESTINATION");
    println!("{}", "-".repeat(100));
    for stored in events {
        let event = &stored.event;
        println!(
            "{:<10} {:<27} {:<6} {:<42} {}",
            stored.id,
            event.timestamp.to_rfc3339(),
            event.kind.as_str(),
            event.name,
            event.flow_headers.destination_instance_id.as_deref().unwrap_or("-")
        );
        for error in &event.errors {
            println!("{:<10} error: {} {:?}", "", error.error_code, error.args);
        }
    }

    Ok(())
}

async fn show_summary(service: &FlowService, key: AggregateKey, json: bool) -> Result<()> {
    let Some(summary) = service.get_summary(&key).await? else {
        if json {
            return print_json(&serde_json::Value::Null);
        }
        println!("No events for {}", key);
        return Ok(());
    };

    if json {
        return print_json(&summary);
    }

    println!("Instance:        {}", summary.key);
    println!(
        "Integration:     {}",
        summary.integration_id.map(|id| id.to_string()).unwrap_or_else(|| "-".into())
    );
    println!(
        "Instance id:     {}",
        summary.latest_instance_id.map(|id| id.to_string()).unwrap_or_else(|| "-".into())
    );
    println!("Latest update:   {}", summary.latest_update.to_rfc3339());
    println!("Latest event id: {}", summary.latest_event_id);
    println!(
        "Status:          {} ({})",
        summary.status().map(|s| s.as_str()).unwrap_or("-"),
        summary.latest_status_event_name.as_deref().unwrap_or("no status event")
    );
    println!(
        "Storage:         {} ({})",
        summary.storage_status(),
        summary.latest_storage_status_event_name.as_deref().unwrap_or("no storage event")
    );
    if summary.destination_instance_ids.is_empty() {
        println!("Destinations:    -");
    } else {
        let destinations: Vec<_> = summary.destination_instance_ids.iter().cloned().collect();
        println!("Destinations:    {}", destinations.join(", "));
    }

    Ok(())
}

fn summary_row(summary: &InstanceFlowSummary) -> String {
    format!(
        "{:<40} {:<27} {:<12} {:<20}",
        summary.key.to_string(),
        summary.latest_update.to_rfc3339(),
        summary.status().map(|s| s.as_str()).unwrap_or("-"),
        summary.storage_status().as_str()
    )
}

async fn list_summaries(
    service: &FlowService,
    cfg: &ResolvedConfig,
    filter: FilterArgs,
    page: PageArgs,
    json: bool,
) -> Result<()> {
    let request = filter.into_request()?;
    let page = page.into_request(cfg.query.default_page_size);
    let slice = service.get_summaries(request, page).await?;

    if json {
        return print_json(&slice);
    }

    if slice.content.is_empty() {
        println!("No matching instances");
        return Ok(());
    }

    println!("{:<40} {:<27} {:<12} {:<20}", "INSTANCE", "LATEST UPDATE", "STATUS", "STORAGE");
    println!("{}", "-".repeat(100));
    for summary in &slice.content {
        println!("{}", summary_row(summary));
    }
    println!();
    match slice.total_elements {
        Some(total) => println!("Page {} ({} of {} total)", slice.page, slice.content.len(), total),
        None => println!("Page {} ({} shown)", slice.page, slice.content.len()),
    }
    if slice.has_next {
        println!("More results on page {}", slice.page + 1);
    }

    Ok(())
}

fn print_statistics_row(label: &str, stats: &InstanceStatistics) {
    println!(
        "{:<14} {:>8} {:>12} {:>12} {:>8} {:>8}",
        label, stats.total, stats.in_progress, stats.transferred, stats.aborted, stats.failed
    );
}

fn print_statistics_header(label: &str) {
    println!(
        "{:<14} {:>8} {:>12} {:>12} {:>8} {:>8}",
        label, "TOTAL", "IN_PROGRESS", "TRANSFERRED", "ABORTED", "FAILED"
    );
    println!("{}", "-".repeat(67));
}

async fn show_statistics(service: &FlowService, filter: FilterArgs, json: bool) -> Result<()> {
    let statistics = service.get_statistics(filter.into_request()?).await?;
    if json {
        return print_json(&statistics);
    }

    print_statistics_header("");
    print_statistics_row("all", &statistics);
    Ok(())
}

async fn show_integration_statistics(
    service: &FlowService,
    cfg: &ResolvedConfig,
    filter: FilterArgs,
    page: PageArgs,
    json: bool,
) -> Result<()> {
    let request = filter.into_request()?;
    let page = page.into_request(cfg.query.default_page_size);
    let slice = service.get_integration_statistics(request, page).await?;

    if json {
        return print_json(&slice);
    }

    if slice.content.is_empty() {
        println!("No matching instances");
        return Ok(());
    }

    print_statistics_header("INTEGRATION");
    for entry in &slice.content {
        let label = entry
            .integration_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "(unknown)".to_string());
        print_statistics_row(&label, &entry.statistics);
    }
    if slice.has_next {
        println!("\nMore results on page {}", slice.page + 1);
    }
    Ok(())
}

fn show_categories(json: bool) -> Result<()> {
    let categories = CategorizationService::global().categories();
    if json {
        return print_json(&categories);
    }

    println!("{:<42} {:<6} {:<12} {:<20} {}", "NAME", "KIND", "STATUS", "STORAGE", "DISPATCH");
    println!("{}", "-".repeat(92));
    for category in categories {
        println!(
            "{:<42} {:<6} {:<12} {:<20} {}",
            category.event_name,
            category.kind.as_str(),
            category.status.map(|s| s.as_str()).unwrap_or("-"),
            category.storage_status.map(|s| s.as_str()).unwrap_or("-"),
            if category.dispatch { "yes" } else { "" }
        );
    }
    Ok(())
}

/// Show the resolved configuration (for debugging)
fn show_config(json: bool) -> Result<()> {
    let cfg = config::config()?;

    if json {
        return print_json(&serde_json::json!({
            "configFile": cfg.config_file,
            "home": cfg.home,
            "database": cfg.database,
            "timeZone": cfg.query.time_zone.name(),
            "timeoutSeconds": cfg.query.timeout.as_secs(),
            "defaultPageSize": cfg.query.default_page_size,
            "maxPageSize": cfg.query.max_page_size,
        }));
    }

    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:     {}", cfg.home.display());
    println!("  Database: {}", cfg.database.display());
    println!();
    println!("Queries:");
    println!("  Time zone:         {}", cfg.query.time_zone.name());
    println!("  Timeout:           {}s", cfg.query.timeout.as_secs());
    println!("  Default page size: {}", cfg.query.default_page_size);
    println!("  Max page size:     {}", cfg.query.max_page_size);

    Ok(())
}
