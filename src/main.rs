//! Binary entry point for the sidescan CLI.

mod cli;

use std::io::{self, Write};
use std::process;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sidescan::{
    ConfigError, DigitalOceanConfig, DigitalOceanError, DigitalOceanProvider, HttpInstaller,
    ProcessCommandRunner, Provider, RunError, RunOrchestrator, ScanConfig, WorkDir, WorkDirError,
    render_cleanup_warnings, render_instances,
};

use cli::Cli;

const SUPPORTED_SERVICES: [&str; 1] = ["do"];
const INSTALLER_TIMEOUT: Duration = Duration::from_secs(60);
const EXIT_INCOMPLETE: i32 = 2;
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Debug, Error)]
enum CliError {
    #[error(
        "unsupported cloud service '{0}'; supported services are: {}",
        SUPPORTED_SERVICES.join(", ")
    )]
    UnsupportedService(String),
    #[error("invalid instance id '{0}': expected a numeric id")]
    InvalidInstanceId(String),
    #[error("no instances found to scan")]
    NoSources,
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("provider error: {0}")]
    Provider(#[from] DigitalOceanError),
    #[error("work directory error: {0}")]
    WorkDir(#[from] WorkDirError),
    #[error("scan run failed: {0}")]
    Run(#[from] RunError<DigitalOceanError>),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
        .ok();
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    ensure_supported(&cli.cloud_service)?;
    let ids = parse_instance_ids(&cli.instance_ids)?;

    let provider_config = DigitalOceanConfig::load_without_cli_args()?;
    let provider = DigitalOceanProvider::new(&provider_config)?;

    if cli.list_instances {
        info!(service = %cli.cloud_service, "listing instances");
        let instances = provider.list_instances().await?;
        write!(io::stdout(), "{}", render_instances(&instances))?;
        return Ok(0);
    }

    let scan_config = ScanConfig::load_without_cli_args()?;
    scan_config.validate()?;
    scan(provider, &scan_config, &ids).await
}

async fn scan(
    provider: DigitalOceanProvider,
    config: &ScanConfig,
    ids: &[u64],
) -> Result<i32, CliError> {
    let workdir = WorkDir::open(config.work_dir.clone())?;
    let client = reqwest::Client::builder()
        .timeout(INSTALLER_TIMEOUT)
        .build()
        .map_err(DigitalOceanError::from)?;
    let installer = HttpInstaller::new(client, config.installer_url.clone());
    let orchestrator = RunOrchestrator::new(
        provider,
        ProcessCommandRunner,
        installer,
        workdir,
        config.run_settings(),
    );

    let sources = orchestrator.resolve_sources(ids).await?;
    if sources.is_empty() {
        return Err(CliError::NoSources);
    }

    tokio::select! {
        outcome = orchestrator.run(&sources) => {
            let report = outcome?;
            write!(io::stdout(), "{}", report.render())?;
            Ok(if report.is_clean() { 0 } else { EXIT_INCOMPLETE })
        }
        Ok(()) = tokio::signal::ctrl_c() => {
            warn!("interrupted; destroying resources created so far");
            let cleanup = orchestrator.cleanup_tracked().await;
            write!(io::stderr(), "{}", render_cleanup_warnings(&cleanup))?;
            Ok(EXIT_INTERRUPTED)
        }
    }
}

fn ensure_supported(service: &str) -> Result<(), CliError> {
    if SUPPORTED_SERVICES.contains(&service) {
        Ok(())
    } else {
        Err(CliError::UnsupportedService(service.to_owned()))
    }
}

fn parse_instance_ids(raw: &[String]) -> Result<Vec<u64>, CliError> {
    raw.iter()
        .map(|value| {
            let trimmed = value.trim();
            trimmed
                .parse::<u64>()
                .map_err(|_| CliError::InvalidInstanceId(trimmed.to_owned()))
        })
        .collect()
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
