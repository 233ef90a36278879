//! Orphan sweeper for sidescan.
//!
//! This binary deletes scan instances carrying the scan tag, the snapshots
//! they were booted from, and run keys named `sidescan-key-*`. Use it after
//! an interrupted run whose cleanup did not finish.

use clap::Parser;
use sidescan::{DigitalOceanConfig, DigitalOceanProvider, Janitor, JanitorConfig};
use std::io::Write as _;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "sidescan-janitor",
    about = "Delete DigitalOcean resources left behind by interrupted sidescan runs"
)]
struct Cli {
    /// Tag carried by scan instances.
    #[arg(long, env = "SIDESCAN_SCAN_TAG", default_value = "snapshot-droplet")]
    scan_tag: String,
    /// Also delete snapshots named `<source>-snapshot-<timestamp>` that no
    /// scan instance refers to.
    #[arg(long)]
    include_named_snapshots: bool,
}

#[tokio::main]
async fn main() -> Result<(), String> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init()
        .ok();

    let cli = Cli::parse();
    let config = JanitorConfig::new(cli.scan_tag, cli.include_named_snapshots)
        .map_err(|err| err.to_string())?;
    let provider_config =
        DigitalOceanConfig::load_without_cli_args().map_err(|err| err.to_string())?;
    let provider = DigitalOceanProvider::new(&provider_config).map_err(|err| err.to_string())?;
    let summary = Janitor::new(config, provider)
        .sweep()
        .await
        .map_err(|err| err.to_string())?;

    writeln!(
        std::io::stdout(),
        "janitor sweep complete: deleted_instances={}, deleted_snapshots={}, deleted_keys={}",
        summary.deleted_instances,
        summary.deleted_snapshots,
        summary.deleted_keys
    )
    .map_err(|err| err.to_string())?;

    if summary.is_clean() {
        return Ok(());
    }
    let failures: Vec<String> = summary
        .failures
        .iter()
        .map(ToString::to_string)
        .collect();
    Err(format!("failed to delete: {}", failures.join("; ")))
}
