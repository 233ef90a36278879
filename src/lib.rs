//! Core library for the sidescan vulnerability scanner.
//!
//! A run snapshots each source instance, boots a disposable scan instance
//! from every snapshot, installs and runs the scanner on it over SSH, and
//! aggregates the JSON findings into a severity report. Every resource a run
//! creates is tracked in a ledger and destroyed at the end of the run, on
//! failure, or on interruption.

pub mod cleanup;
pub mod config;
pub mod credentials;
pub mod digitalocean;
pub mod exec;
pub mod janitor;
pub mod naming;
pub mod poll;
pub mod provider;
pub mod provision;
pub mod report;
pub mod run;
pub mod scan;
pub mod snapshot;
#[cfg(test)]
pub mod test_helpers;
pub mod test_support;
pub mod workdir;

pub use cleanup::{
    CleanupCoordinator, CleanupFailure, CleanupReport, PendingSnapshot, ResourceLedger,
    ResourceKind, TrackedResources,
};
pub use config::{ConfigError, DigitalOceanConfig, ScanConfig};
pub use credentials::{CredentialError, CredentialManager, ScanKeyPair};
pub use digitalocean::{DigitalOceanError, DigitalOceanProvider};
pub use exec::{CommandOutput, CommandRunner, ExecError, ProcessCommandRunner, SshSettings};
pub use janitor::{Janitor, JanitorConfig, JanitorError, SweepSummary};
pub use naming::{Lineage, RunId};
pub use poll::{PollError, PollPolicy, wait_for_action};
pub use provider::{Action, ActionStatus, Instance, InstanceSpec, KeyResource, Provider, Snapshot};
pub use provision::{InstanceProvisioner, ProvisionError, ProvisionSettings, ScanInstance};
pub use report::{
    ReportError, ReportRow, RowOutcome, SeverityTally, Stage, render_cleanup_warnings,
    render_instances, render_summary,
};
pub use run::{RunError, RunOrchestrator, RunReport, RunSettings};
pub use scan::{HttpInstaller, InstallerSource, RemoteScanRunner, ScanError, ScanSettings};
pub use snapshot::{LookupPolicy, SnapshotError, SnapshotOrchestrator, SnapshotRecord};
pub use workdir::{WorkDir, WorkDirError};
