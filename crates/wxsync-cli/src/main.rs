use std::fmt;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use serde::Serialize;
use wxsync_normalize::{CatalogueEntry, CityCatalogue};
use wxsync_sync::SyncConfig;

#[derive(Debug, Parser)]
#[command(name = "wxsync")]
#[command(about = "Fetch current weather for configured cities into Postgres")]
struct Cli {
    /// YAML config file; defaults to $WXSYNC_CONFIG, then ./wxsync.yaml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print summaries and lookup results as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch, validate and upsert one batch of observations.
    Fetch,
    /// Copy rows whose temperature matches the configured range into the sorted table.
    Filter,
    /// Run fetch and filter on their cron schedules until interrupted.
    Schedule,
    /// Look up city ids by name in a provider city list.
    Resolve {
        #[arg(long)]
        catalogue: PathBuf,
        name: String,
        #[arg(long)]
        country: Option<String>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command.unwrap_or(Commands::Fetch) {
        Commands::Fetch => {
            let config = load_config(&cli.config)?;
            let summary = wxsync_sync::run_pipeline_once(config).await?;
            print_summary(&summary, cli.json)?;
        }
        Commands::Filter => {
            let config = load_config(&cli.config)?;
            let summary = wxsync_sync::run_filter_once(&config).await?;
            print_summary(&summary, cli.json)?;
        }
        Commands::Schedule => {
            let config = load_config(&cli.config)?;
            wxsync_sync::run_scheduler(config).await?;
        }
        Commands::Resolve {
            catalogue,
            name,
            country,
        } => {
            let catalogue = CityCatalogue::load(&catalogue)?;
            let matches: Vec<_> = catalogue.search(&name, country.as_deref()).collect();
            if matches.is_empty() {
                anyhow::bail!("no city named {name:?} in catalogue");
            }
            println!("{}", render_matches(&matches, cli.json)?);
        }
    }

    Ok(())
}

fn load_config(path: &Option<PathBuf>) -> Result<SyncConfig> {
    SyncConfig::load(path.as_deref()).context("loading configuration")
}

fn print_summary<T: Serialize + fmt::Display>(summary: &T, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
    } else {
        println!("{summary}");
    }
    Ok(())
}

/// One tab-separated line per match, or a JSON array with `--json`.
fn render_matches(matches: &[&CatalogueEntry], json: bool) -> Result<String> {
    if json {
        return Ok(serde_json::to_string_pretty(matches)?);
    }
    Ok(matches
        .iter()
        .map(|e| format!("{}\t{}\t{}\t{}", e.id, e.name, e.state, e.country))
        .collect::<Vec<_>>()
        .join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wxsync_core::CityId;

    fn entry(id: i64, state: &str) -> CatalogueEntry {
        CatalogueEntry {
            id: CityId(id),
            name: "Springfield".into(),
            state: state.into(),
            country: "US".into(),
            coord: None,
        }
    }

    #[test]
    fn resolve_output_is_tab_separated_by_default() {
        let (a, b) = (entry(4409896, "MO"), entry(4250542, "IL"));
        assert_eq!(
            render_matches(&[&a, &b], false).unwrap(),
            "4409896\tSpringfield\tMO\tUS\n4250542\tSpringfield\tIL\tUS"
        );
    }

    #[test]
    fn resolve_honours_json_flag() {
        let a = entry(4409896, "MO");
        let out = render_matches(&[&a], true).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed[0]["id"], 4409896);
        assert_eq!(parsed[0]["state"], "MO");
    }

    #[test]
    fn json_flag_is_accepted_after_any_subcommand() {
        let args = ["wxsync", "resolve", "--catalogue", "c.json", "Paris", "--json"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Some(Commands::Resolve { .. })));
    }
}
