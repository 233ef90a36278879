//! Resource tracking and guaranteed teardown.
//!
//! Components register every provider resource in the [`ResourceLedger`] the
//! moment the provider accepts the request that creates it. The
//! [`CleanupCoordinator`] destroys instances, then snapshots, then the run
//! key, attempting every destroy call even when earlier ones fail. An entry
//! leaves the ledger only after its destroy call has returned, so a pass that
//! is cancelled part way can be resumed by another.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use tracing::{info, warn};

use crate::credentials::{CredentialError, CredentialManager, ScanKeyPair};
use crate::exec::CommandRunner;
use crate::naming::Lineage;
use crate::provider::{Provider, Snapshot};
use crate::provision::ScanInstance;
use crate::snapshot::SnapshotRecord;

/// Snapshot requested from the provider but not yet resolved to an id.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PendingSnapshot {
    /// Source instance and run that requested the snapshot.
    pub lineage: Lineage,
    /// Name the snapshot will be listed under.
    pub name: String,
}

impl PendingSnapshot {
    /// Creates a pending entry named after `lineage`.
    #[must_use]
    pub fn new(lineage: Lineage) -> Self {
        let name = lineage.snapshot_name();
        Self { lineage, name }
    }
}

/// Resources created by a run that still need to be destroyed.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TrackedResources {
    /// Scan instances, in creation order.
    pub instances: Vec<ScanInstance>,
    /// Snapshots resolved to a provider id, in creation order.
    pub snapshots: Vec<SnapshotRecord>,
    /// Snapshots known only by name.
    pub pending_snapshots: Vec<PendingSnapshot>,
    /// The run key, once registered.
    pub key: Option<ScanKeyPair>,
}

impl TrackedResources {
    /// Returns `true` when nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
            && self.snapshots.is_empty()
            && self.pending_snapshots.is_empty()
            && self.key.is_none()
    }
}

/// Thread-safe record of the resources created so far.
///
/// Cleanup reads the ledger and releases each entry once its destroy call
/// has returned. Whatever a cancelled pass had not finished stays tracked for
/// the next one, whether that is the normal end of a run or an interrupt.
#[derive(Debug, Default)]
pub struct ResourceLedger {
    state: Mutex<TrackedResources>,
}

impl ResourceLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a scan instance.
    pub fn track_instance(&self, instance: ScanInstance) {
        self.lock().instances.push(instance);
    }

    /// Records a snapshot the provider has accepted but not yet listed.
    pub fn track_pending_snapshot(&self, pending: PendingSnapshot) {
        self.lock().pending_snapshots.push(pending);
    }

    /// Records a resolved snapshot, replacing its pending entry.
    pub fn track_snapshot(&self, snapshot: SnapshotRecord) {
        let mut state = self.lock();
        state
            .pending_snapshots
            .retain(|pending| pending.name != snapshot.name);
        state.snapshots.push(snapshot);
    }

    /// Drops a pending snapshot the provider never created.
    pub fn forget_pending_snapshot(&self, name: &str) {
        self.lock()
            .pending_snapshots
            .retain(|pending| pending.name != name);
    }

    /// Records the run key.
    pub fn track_key(&self, key: ScanKeyPair) {
        self.lock().key = Some(key);
    }

    /// Returns a copy of the tracked resources.
    #[must_use]
    pub fn snapshot(&self) -> TrackedResources {
        self.lock().clone()
    }

    fn release_instance(&self, id: u64) {
        self.lock().instances.retain(|instance| instance.id != id);
    }

    fn release_snapshot(&self, id: &str) {
        self.lock().snapshots.retain(|snapshot| snapshot.id != id);
    }

    fn release_key(&self) {
        self.lock().key = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackedResources> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Kind of resource a cleanup failure refers to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResourceKind {
    /// A scan instance.
    Instance,
    /// A snapshot.
    Snapshot,
    /// The run key (provider resource or local files).
    Key,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Instance => "instance",
            Self::Snapshot => "snapshot",
            Self::Key => "key",
        };
        f.write_str(label)
    }
}

/// A destroy call that failed; the resource may still exist.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CleanupFailure {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Resource name.
    pub name: String,
    /// Failure description.
    pub message: String,
}

impl fmt::Display for CleanupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.kind, self.name, self.message)
    }
}

/// Outcome of a cleanup pass.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CleanupReport {
    /// Number of resources destroyed successfully.
    pub destroyed: usize,
    /// Every destroy call that failed.
    pub failures: Vec<CleanupFailure>,
}

impl CleanupReport {
    /// Returns `true` when every destroy call succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Folds another report into this one.
    pub fn merge(&mut self, other: Self) {
        self.destroyed += other.destroyed;
        self.failures.extend(other.failures);
    }
}

/// Destroys every tracked resource without stopping at the first failure.
#[derive(Debug)]
pub struct CleanupCoordinator<'a, P, R> {
    provider: &'a P,
    credentials: CredentialManager<'a, P, R>,
}

impl<'a, P, R> CleanupCoordinator<'a, P, R>
where
    P: Provider,
    R: CommandRunner,
{
    /// Creates a coordinator; the credential manager removes the run key.
    #[must_use]
    pub const fn new(provider: &'a P, credentials: CredentialManager<'a, P, R>) -> Self {
        Self {
            provider,
            credentials,
        }
    }

    /// Destroys instances, then snapshots, then the run key.
    ///
    /// Each tracked resource receives one destroy attempt and is released
    /// from `ledger` once that attempt returns. Pending snapshots are looked
    /// up by name first; a name the provider does not list is reported as a
    /// failure because the snapshot may still appear. Failures are logged and
    /// collected in the returned report.
    pub async fn cleanup(&self, ledger: &ResourceLedger) -> CleanupReport {
        let mut report = CleanupReport::default();
        let TrackedResources {
            instances,
            snapshots,
            pending_snapshots,
            key,
        } = ledger.snapshot();

        for instance in instances {
            info!(instance = %instance.name, instance_id = instance.id, "destroying scan instance");
            let outcome = self.provider.destroy_instance(instance.id).await;
            record(&mut report, ResourceKind::Instance, &instance.name, outcome);
            ledger.release_instance(instance.id);
        }

        for snapshot in snapshots {
            info!(snapshot = %snapshot.name, snapshot_id = %snapshot.id, "destroying snapshot");
            let outcome = self.provider.destroy_snapshot(&snapshot.id).await;
            record(&mut report, ResourceKind::Snapshot, &snapshot.name, outcome);
            ledger.release_snapshot(&snapshot.id);
        }

        if !pending_snapshots.is_empty() {
            self.destroy_pending(ledger, &pending_snapshots, &mut report)
                .await;
        }

        if let Some(run_key) = key {
            match self.credentials.destroy_run_key(&run_key).await {
                Ok(()) => report.destroyed += 1,
                Err(CredentialError::Cleanup { failures }) => {
                    for message in failures {
                        warn!(key = %run_key.name, %message, "run key cleanup failed");
                        report.failures.push(CleanupFailure {
                            kind: ResourceKind::Key,
                            name: run_key.name.clone(),
                            message,
                        });
                    }
                }
                Err(other) => {
                    warn!(key = %run_key.name, error = %other, "run key cleanup failed");
                    report.failures.push(CleanupFailure {
                        kind: ResourceKind::Key,
                        name: run_key.name.clone(),
                        message: other.to_string(),
                    });
                }
            }
            ledger.release_key();
        }

        report
    }

    async fn destroy_pending(
        &self,
        ledger: &ResourceLedger,
        pending: &[PendingSnapshot],
        report: &mut CleanupReport,
    ) {
        let listed: Result<Vec<Snapshot>, String> = self
            .provider
            .list_snapshots()
            .await
            .map_err(|err| format!("could not list snapshots: {err}"));

        for entry in pending {
            let lookup = listed
                .as_ref()
                .map(|snapshots| snapshots.iter().find(|snapshot| snapshot.name == entry.name));
            match lookup {
                Ok(Some(found)) => {
                    info!(
                        snapshot = %found.name,
                        snapshot_id = %found.id,
                        "destroying snapshot resolved during cleanup"
                    );
                    let outcome = self.provider.destroy_snapshot(&found.id).await;
                    record(report, ResourceKind::Snapshot, &entry.name, outcome);
                }
                Ok(None) => unresolved(
                    report,
                    entry,
                    String::from(
                        "not listed by the provider yet; \
                         remove it with sidescan-janitor --include-named-snapshots",
                    ),
                ),
                Err(message) => unresolved(report, entry, message.clone()),
            }
            ledger.forget_pending_snapshot(&entry.name);
        }
    }
}

fn unresolved(report: &mut CleanupReport, entry: &PendingSnapshot, message: String) {
    warn!(snapshot = %entry.name, %message, "snapshot could not be resolved for cleanup");
    report.failures.push(CleanupFailure {
        kind: ResourceKind::Snapshot,
        name: entry.name.clone(),
        message,
    });
}

fn record<E: std::error::Error>(
    report: &mut CleanupReport,
    kind: ResourceKind,
    name: &str,
    outcome: Result<(), E>,
) {
    match outcome {
        Ok(()) => report.destroyed += 1,
        Err(err) => {
            warn!(%kind, resource = name, error = %err, "destroy failed; resource may be leaked");
            report.failures.push(CleanupFailure {
                kind,
                name: name.to_owned(),
                message: err.to_string(),
            });
        }
    }
}
