//! Command-line interface definitions for the `sidescan` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `sidescan` binary.
#[derive(Debug, Parser)]
#[command(
    name = "sidescan",
    about = "Snapshot cloud instances and scan the snapshots for vulnerabilities",
    version
)]
pub(crate) struct Cli {
    /// Cloud service to use. Only `do` (DigitalOcean) is supported.
    #[arg(value_name = "CLOUD_SERVICE")]
    pub(crate) cloud_service: String,
    /// Comma-separated instance ids to scan. Every instance is scanned when
    /// omitted.
    #[arg(
        short = 'i',
        long = "instance-ids",
        visible_alias = "instance_ids",
        value_name = "IDS",
        value_delimiter = ',',
        conflicts_with = "list_instances"
    )]
    pub(crate) instance_ids: Vec<String>,
    /// List the account's instances instead of scanning them.
    #[arg(short = 'l', long = "list-instances", visible_alias = "list_instances")]
    pub(crate) list_instances: bool,
}
