//! Orchestrates a complete scan run.
//!
//! A run creates one key pair, snapshots every source, boots a scan instance
//! from each snapshot, waits a single settle delay, scans the instances, and
//! then tears down everything it created. Per-source failures are isolated
//! and reported as rows; cleanup runs after the scan phase whatever the
//! outcome of individual sources.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::cleanup::{CleanupCoordinator, CleanupReport, ResourceLedger};
use crate::credentials::{CredentialError, CredentialManager, ScanKeyPair};
use crate::exec::CommandRunner;
use crate::naming::RunId;
use crate::poll::PollPolicy;
use crate::provider::{Instance, Provider};
use crate::provision::{InstanceProvisioner, ProvisionSettings, ScanInstance};
use crate::report::{
    ReportRow, RowOutcome, Stage, parse_result, render_cleanup_warnings, render_summary,
};
use crate::scan::{InstallerSource, RemoteScanRunner, ScanSettings};
use crate::snapshot::{LookupPolicy, SnapshotOrchestrator};
use crate::workdir::WorkDir;

/// Timing, sizing, and tool settings for a run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunSettings {
    /// Polling applied to snapshot and create actions.
    pub poll: PollPolicy,
    /// Retry budget for resolving snapshots by name.
    pub lookup: LookupPolicy,
    /// Scan instance shape.
    pub provision: ProvisionSettings,
    /// Remote scan settings.
    pub scan: ScanSettings,
    /// Global wait between provisioning and the first SSH attempt.
    pub settle_delay: Duration,
    /// Maximum number of sources processed concurrently.
    pub concurrency: usize,
    /// Path to `ssh-keygen`.
    pub keygen_bin: String,
}

/// Errors that stop a run before any per-source work starts.
#[derive(Debug, Error)]
pub enum RunError<E>
where
    E: std::error::Error + 'static,
{
    /// An explicitly requested instance does not exist.
    #[error("unable to find instance by id: {id}")]
    Lookup {
        /// Requested identifier.
        id: u64,
    },
    /// Two sources share a name, so their result files would collide.
    #[error("more than one source instance is named {name}")]
    DuplicateName {
        /// Duplicated name.
        name: String,
    },
    /// Querying the provider for sources failed.
    #[error("failed to look up source instances: {0}")]
    Provider(#[source] E),
    /// The run key could not be created.
    #[error(transparent)]
    KeyGeneration(CredentialError<E>),
}

/// Outcome of a run: one row per source plus the cleanup summary.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RunReport {
    /// Rows in source order.
    pub rows: Vec<ReportRow>,
    /// Teardown outcome.
    pub cleanup: CleanupReport,
}

impl RunReport {
    /// Returns `true` when every source produced a tally and teardown left
    /// nothing behind.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.rows.iter().all(ReportRow::is_success) && self.cleanup.is_clean()
    }

    /// Renders the summary table followed by any cleanup warnings.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = render_summary(&self.rows);
        out.push_str(&render_cleanup_warnings(&self.cleanup));
        out
    }
}

#[derive(Debug)]
struct StageFailure {
    stage: Stage,
    message: String,
}

impl StageFailure {
    fn new(stage: Stage, err: &impl std::fmt::Display) -> Self {
        Self {
            stage,
            message: err.to_string(),
        }
    }
}

/// Executes scan runs against a provider.
#[derive(Debug)]
pub struct RunOrchestrator<P, R, I> {
    provider: P,
    runner: R,
    installer: I,
    workdir: WorkDir,
    settings: RunSettings,
    ledger: ResourceLedger,
}

impl<P, R, I> RunOrchestrator<P, R, I>
where
    P: Provider,
    R: CommandRunner,
    I: InstallerSource,
{
    /// Creates an orchestrator.
    #[must_use]
    pub fn new(
        provider: P,
        runner: R,
        installer: I,
        workdir: WorkDir,
        settings: RunSettings,
    ) -> Self {
        Self {
            provider,
            runner,
            installer,
            workdir,
            settings,
            ledger: ResourceLedger::new(),
        }
    }

    /// Returns the provider.
    #[must_use]
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    /// Returns the work directory holding results and the diagnostic log.
    #[must_use]
    pub const fn workdir(&self) -> &WorkDir {
        &self.workdir
    }

    /// Returns the ledger of resources created and not yet cleaned up.
    #[must_use]
    pub const fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    fn credentials(&self) -> CredentialManager<'_, P, R> {
        CredentialManager::new(
            &self.provider,
            &self.runner,
            &self.workdir,
            &self.settings.keygen_bin,
        )
    }

    /// Resolves the instances to scan.
    ///
    /// With no ids every account instance is returned except leftover scan
    /// instances carrying the scan tag. Otherwise each id must exist.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Lookup`] for an unknown id and
    /// [`RunError::Provider`] when the provider cannot be queried.
    pub async fn resolve_sources(&self, ids: &[u64]) -> Result<Vec<Instance>, RunError<P::Error>> {
        if ids.is_empty() {
            let tag = &self.settings.provision.tag;
            let instances = self
                .provider
                .list_instances()
                .await
                .map_err(RunError::Provider)?;
            let (skipped, sources): (Vec<_>, Vec<_>) = instances
                .into_iter()
                .partition(|instance| instance.tags.contains(tag));
            for instance in &skipped {
                info!(instance = %instance.name, "skipping scan instance left by an earlier run");
            }
            return Ok(sources);
        }

        let mut sources = Vec::with_capacity(ids.len());
        for &id in ids {
            let found = self
                .provider
                .get_instance(id)
                .await
                .map_err(RunError::Provider)?
                .ok_or(RunError::Lookup { id })?;
            sources.push(found);
        }
        Ok(sources)
    }

    /// Runs a scan of `sources` under a fresh run identifier.
    ///
    /// # Errors
    ///
    /// See [`RunOrchestrator::run_with_id`].
    pub async fn run(&self, sources: &[Instance]) -> Result<RunReport, RunError<P::Error>> {
        self.run_with_id(sources, RunId::now()).await
    }

    /// Runs a scan of `sources` under `run`.
    ///
    /// An empty source list returns an empty report without touching the
    /// provider.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::DuplicateName`] when two sources share a name and
    /// [`RunError::KeyGeneration`] when the run key cannot be created. Both
    /// are raised before any other resource exists. Per-source failures are
    /// reported as rows instead.
    pub async fn run_with_id(
        &self,
        sources: &[Instance],
        run: RunId,
    ) -> Result<RunReport, RunError<P::Error>> {
        if sources.is_empty() {
            info!("no source instances to scan");
            return Ok(RunReport::default());
        }
        ensure_unique_names(sources)?;

        info!(%run, sources = sources.len(), "starting scan run");
        let key = self
            .credentials()
            .create_run_key(run)
            .await
            .map_err(RunError::KeyGeneration)?;
        self.ledger.track_key(key.clone());

        let mut failures = BTreeMap::new();
        let instances = self.prepare_all(sources, run, &key, &mut failures).await;

        if !instances.is_empty() {
            info!(
                delay_secs = self.settings.settle_delay.as_secs(),
                "waiting for scan instances to accept ssh"
            );
            sleep(self.settings.settle_delay).await;
            self.scan_all(&instances, &key, &mut failures).await;
        }

        let cleanup = self.cleanup_tracked().await;

        let rows = sources
            .iter()
            .enumerate()
            .map(|(index, source)| {
                let outcome = match failures.remove(&index) {
                    Some(StageFailure { stage, message }) => RowOutcome::Failed { stage, message },
                    None => match parse_result(&self.workdir, &source.name) {
                        Ok(tally) => RowOutcome::Tally(tally),
                        Err(err) => RowOutcome::Failed {
                            stage: Stage::Parse,
                            message: err.to_string(),
                        },
                    },
                };
                ReportRow {
                    source_name: source.name.clone(),
                    outcome,
                }
            })
            .collect();

        info!(%run, "scan run finished");
        Ok(RunReport { rows, cleanup })
    }

    /// Destroys everything the ledger still tracks.
    ///
    /// Used at the end of every run and by the interrupt handler. Entries
    /// leave the ledger only once their destroy call returns, so calling this
    /// again after a cancelled pass picks up what that pass had not reached.
    pub async fn cleanup_tracked(&self) -> CleanupReport {
        let tracked = self.ledger.snapshot();
        if tracked.is_empty() {
            return CleanupReport::default();
        }
        info!(
            instances = tracked.instances.len(),
            snapshots = tracked.snapshots.len(),
            pending_snapshots = tracked.pending_snapshots.len(),
            key = tracked.key.is_some(),
            "cleaning up run resources"
        );
        let coordinator = CleanupCoordinator::new(&self.provider, self.credentials());
        let report = coordinator.cleanup(&self.ledger).await;
        if !report.is_clean() {
            warn!(
                failures = report.failures.len(),
                "cleanup incomplete; run sidescan-janitor to remove leftovers"
            );
        }
        report
    }

    async fn prepare_all(
        &self,
        sources: &[Instance],
        run: RunId,
        key: &ScanKeyPair,
        failures: &mut BTreeMap<usize, StageFailure>,
    ) -> Vec<(usize, ScanInstance)> {
        let mut prepared: Vec<_> = stream::iter(sources.iter().enumerate())
            .map(|(index, source)| async move { (index, self.prepare(source, run, key).await) })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;
        prepared.sort_by_key(|(index, _)| *index);

        let mut instances = Vec::with_capacity(prepared.len());
        for (index, outcome) in prepared {
            match outcome {
                Ok(instance) => instances.push((index, instance)),
                Err(failure) => {
                    failures.insert(index, failure);
                }
            }
        }
        instances
    }

    async fn prepare(
        &self,
        source: &Instance,
        run: RunId,
        key: &ScanKeyPair,
    ) -> Result<ScanInstance, StageFailure> {
        let snapshots = SnapshotOrchestrator::new(
            &self.provider,
            &self.ledger,
            self.settings.poll,
            self.settings.lookup,
        );
        let snapshot = snapshots.snapshot(source, run).await.map_err(|err| {
            warn!(instance = %source.name, error = %err, "snapshot failed");
            StageFailure::new(Stage::Snapshot, &err)
        })?;

        let provisioner = InstanceProvisioner::new(
            &self.provider,
            &self.ledger,
            self.settings.poll,
            &self.settings.provision,
        );
        provisioner.provision(&snapshot, key).await.map_err(|err| {
            warn!(instance = %source.name, error = %err, "provisioning failed");
            StageFailure::new(Stage::Provision, &err)
        })
    }

    async fn scan_all(
        &self,
        instances: &[(usize, ScanInstance)],
        key: &ScanKeyPair,
        failures: &mut BTreeMap<usize, StageFailure>,
    ) {
        let scanner = RemoteScanRunner::new(
            &self.runner,
            &self.installer,
            &self.workdir,
            &self.settings.scan,
        );
        let scanner_ref = &scanner;
        let outcomes: Vec<_> = stream::iter(instances.iter())
            .map(|(index, instance)| async move {
                (*index, instance, scanner_ref.scan_instance(instance, key).await)
            })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        for (index, instance, outcome) in outcomes {
            if let Err(err) = outcome {
                warn!(instance = %instance.name, error = %err, "scan failed");
                failures.insert(index, StageFailure::new(Stage::Scan, &err));
            }
        }
    }
}

fn ensure_unique_names<E: std::error::Error + 'static>(
    sources: &[Instance],
) -> Result<(), RunError<E>> {
    let mut seen = HashSet::new();
    for source in sources {
        if !seen.insert(source.name.as_str()) {
            return Err(RunError::DuplicateName {
                name: source.name.clone(),
            });
        }
    }
    Ok(())
}
