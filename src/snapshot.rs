//! Snapshot orchestration: request → poll → resolve by name.

use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::cleanup::{PendingSnapshot, ResourceLedger};
use crate::naming::{Lineage, RunId};
use crate::poll::{PollError, PollPolicy, wait_for_action};
use crate::provider::{Instance, Provider, Snapshot};

/// Completion status of a snapshot record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SnapshotStatus {
    /// The snapshot action had not finished when the record was taken.
    Pending,
    /// The snapshot action completed and the snapshot is listed.
    Complete,
    /// The snapshot action errored but a snapshot was still listed.
    Failed,
}

/// Snapshot created for one source instance during a run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SnapshotRecord {
    /// Source instance and run that produced this snapshot.
    pub lineage: Lineage,
    /// Snapshot name (`<source>-snapshot-<run>`).
    pub name: String,
    /// Provider assigned identifier.
    pub id: String,
    /// Regions in which the snapshot is available.
    pub regions: Vec<String>,
    /// Completion status.
    pub status: SnapshotStatus,
}

impl SnapshotRecord {
    fn from_listing(lineage: Lineage, snapshot: Snapshot, status: SnapshotStatus) -> Self {
        Self {
            lineage,
            name: snapshot.name,
            id: snapshot.id,
            regions: snapshot.regions,
            status,
        }
    }
}

/// Bounded retry applied when resolving a snapshot by name.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LookupPolicy {
    /// Number of listing attempts (at least one is always made).
    pub attempts: u32,
    /// Delay between attempts.
    pub delay: Duration,
}

impl LookupPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }
}

/// Errors raised while snapshotting a source instance.
#[derive(Debug, Error)]
pub enum SnapshotError<E>
where
    E: std::error::Error + 'static,
{
    /// The provider rejected the snapshot request.
    #[error("snapshot request for {instance} rejected: {source}")]
    Request {
        /// Source instance name.
        instance: String,
        /// Provider error.
        #[source]
        source: E,
    },
    /// The provider reported the snapshot action as errored.
    #[error("snapshot of {instance} failed: {source}")]
    Failed {
        /// Source instance name.
        instance: String,
        /// Polling error describing the failure.
        #[source]
        source: PollError<E>,
    },
    /// The snapshot action completed but no snapshot with the expected name
    /// appeared in the listing within the retry budget.
    #[error("snapshot {name} not found after {attempts} lookup attempts")]
    NotFound {
        /// Expected snapshot name.
        name: String,
        /// Lookup attempts made.
        attempts: u32,
    },
    /// Listing snapshots failed.
    #[error("failed to list snapshots while resolving {name}: {source}")]
    Listing {
        /// Expected snapshot name.
        name: String,
        /// Provider error.
        #[source]
        source: E,
    },
}

/// Drives source instances through the snapshot cycle.
#[derive(Debug)]
pub struct SnapshotOrchestrator<'a, P> {
    provider: &'a P,
    ledger: &'a ResourceLedger,
    poll: PollPolicy,
    lookup: LookupPolicy,
}

impl<'a, P: Provider> SnapshotOrchestrator<'a, P> {
    /// Creates an orchestrator that records snapshots in `ledger`.
    #[must_use]
    pub const fn new(
        provider: &'a P,
        ledger: &'a ResourceLedger,
        poll: PollPolicy,
        lookup: LookupPolicy,
    ) -> Self {
        Self {
            provider,
            ledger,
            poll,
            lookup,
        }
    }

    /// Snapshots `source` and returns the completed record.
    ///
    /// The expected name is registered with the ledger as soon as the
    /// provider accepts the request and is replaced by the full record once
    /// the snapshot is listed. A name that never resolves stays pending, so
    /// cleanup looks for it again. When the action errors or times out, one
    /// extra lookup is made; a provider-reported failure with nothing listed
    /// drops the pending name.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError`] when the request is rejected, the action
    /// fails or times out, or the snapshot never becomes visible.
    pub async fn snapshot(
        &self,
        source: &Instance,
        run: RunId,
    ) -> Result<SnapshotRecord, SnapshotError<P::Error>> {
        let lineage = Lineage::new(source.id, source.name.clone(), run);
        let name = lineage.snapshot_name();
        info!(instance = %source.name, snapshot = %name, "taking snapshot");

        let action = self
            .provider
            .create_snapshot(source.id, &name)
            .await
            .map_err(|err| SnapshotError::Request {
                instance: source.name.clone(),
                source: err,
            })?;
        self.ledger
            .track_pending_snapshot(PendingSnapshot::new(lineage.clone()));

        if let Err(poll_error) = wait_for_action(self.provider, action, self.poll).await {
            let errored = matches!(poll_error, PollError::Failed { .. });
            let leftover_status = if errored {
                SnapshotStatus::Failed
            } else {
                SnapshotStatus::Pending
            };
            let tracked = self.track_leftover(&name, &lineage, leftover_status).await;
            if errored && !tracked {
                self.ledger.forget_pending_snapshot(&name);
            }
            return Err(SnapshotError::Failed {
                instance: source.name.clone(),
                source: poll_error,
            });
        }

        let record = self.resolve(&name, lineage).await?;
        self.ledger.track_snapshot(record.clone());
        info!(snapshot = %record.name, snapshot_id = %record.id, "snapshot complete");
        Ok(record)
    }

    /// Looks up a completed snapshot by exact name, retrying to tolerate
    /// listing lag.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::NotFound`] once the retry budget is spent and
    /// [`SnapshotError::Listing`] when a listing call fails.
    pub async fn resolve(
        &self,
        name: &str,
        lineage: Lineage,
    ) -> Result<SnapshotRecord, SnapshotError<P::Error>> {
        let attempts = self.lookup.attempts.max(1);
        for attempt in 1..=attempts {
            if let Some(found) = self.find_by_name(name).await? {
                return Ok(SnapshotRecord::from_listing(
                    lineage,
                    found,
                    SnapshotStatus::Complete,
                ));
            }
            debug!(snapshot = name, attempt, attempts, "snapshot not yet listed");
            if attempt < attempts {
                sleep(self.lookup.delay).await;
            }
        }

        Err(SnapshotError::NotFound {
            name: name.to_owned(),
            attempts,
        })
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Snapshot>, SnapshotError<P::Error>> {
        let snapshots =
            self.provider
                .list_snapshots()
                .await
                .map_err(|source| SnapshotError::Listing {
                    name: name.to_owned(),
                    source,
                })?;
        Ok(snapshots.into_iter().find(|snapshot| snapshot.name == name))
    }

    async fn track_leftover(
        &self,
        name: &str,
        lineage: &Lineage,
        status: SnapshotStatus,
    ) -> bool {
        match self.find_by_name(name).await {
            Ok(Some(found)) => {
                warn!(snapshot = name, "tracking snapshot left behind by unfinished action");
                self.ledger.track_snapshot(SnapshotRecord::from_listing(
                    lineage.clone(),
                    found,
                    status,
                ));
                true
            }
            Ok(None) => false,
            Err(err) => {
                warn!(snapshot = name, error = %err, "could not check for leftover snapshot");
                false
            }
        }
    }
}
