//! Scan instance provisioning from completed snapshots.

use std::net::IpAddr;

use thiserror::Error;
use tracing::{info, warn};

use crate::cleanup::ResourceLedger;
use crate::credentials::ScanKeyPair;
use crate::naming::Lineage;
use crate::poll::{PollError, PollPolicy, wait_for_action};
use crate::provider::{InstanceSpec, Provider, SpecError};
use crate::snapshot::SnapshotRecord;

/// Temporary instance booted from a source snapshot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScanInstance {
    /// Source instance and run this scan instance belongs to.
    pub lineage: Lineage,
    /// Snapshot the instance was booted from.
    pub snapshot_name: String,
    /// Instance name (`<snapshot>-droplet`).
    pub name: String,
    /// Provider assigned identifier.
    pub id: u64,
    /// Public address, known once the instance is active.
    pub public_ip: Option<IpAddr>,
    /// Last status reported by the provider.
    pub status: String,
}

/// Size, tag, and monitoring choices applied to every scan instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionSettings {
    /// Size slug.
    pub size: String,
    /// Tag identifying scan instances.
    pub tag: String,
    /// Whether provider monitoring is enabled.
    pub monitoring: bool,
}

/// Errors raised while provisioning a scan instance.
#[derive(Debug, Error)]
pub enum ProvisionError<E>
where
    E: std::error::Error + 'static,
{
    /// The snapshot lists no region to boot in.
    #[error("snapshot {snapshot} is not available in any region")]
    NoRegion {
        /// Snapshot name.
        snapshot: String,
    },
    /// The instance request could not be assembled.
    #[error("invalid instance request for {name}: {source}")]
    Spec {
        /// Instance name.
        name: String,
        /// Validation failure.
        #[source]
        source: SpecError,
    },
    /// The provider rejected the create request.
    #[error("failed to create instance {name}: {source}")]
    Request {
        /// Instance name.
        name: String,
        /// Provider error.
        #[source]
        source: E,
    },
    /// The creation action errored or timed out.
    #[error("instance {name} did not become active: {source}")]
    Failed {
        /// Instance name.
        name: String,
        /// Polling error.
        #[source]
        source: PollError<E>,
    },
    /// Reloading the instance after creation failed.
    #[error("failed to reload instance {name}: {source}")]
    Reload {
        /// Instance name.
        name: String,
        /// Provider error.
        #[source]
        source: E,
    },
    /// The instance disappeared before it became reachable.
    #[error("instance {name} vanished after creation")]
    Vanished {
        /// Instance name.
        name: String,
    },
}

/// Boots scan instances from snapshots.
#[derive(Debug)]
pub struct InstanceProvisioner<'a, P> {
    provider: &'a P,
    ledger: &'a ResourceLedger,
    poll: PollPolicy,
    settings: &'a ProvisionSettings,
}

impl<'a, P: Provider> InstanceProvisioner<'a, P> {
    /// Creates a provisioner that records instances in `ledger`.
    #[must_use]
    pub const fn new(
        provider: &'a P,
        ledger: &'a ResourceLedger,
        poll: PollPolicy,
        settings: &'a ProvisionSettings,
    ) -> Self {
        Self {
            provider,
            ledger,
            poll,
            settings,
        }
    }

    /// Boots an instance from `snapshot` with the run key installed, waits
    /// for it to become active, and returns it with its public address.
    ///
    /// The instance is tracked for cleanup as soon as the provider accepts
    /// the create request, before the creation action is polled.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when the request cannot be built, is
    /// rejected, or the instance never becomes active.
    pub async fn provision(
        &self,
        snapshot: &SnapshotRecord,
        key: &ScanKeyPair,
    ) -> Result<ScanInstance, ProvisionError<P::Error>> {
        let name = snapshot.lineage.scan_instance_name();
        let region = snapshot
            .regions
            .first()
            .ok_or_else(|| ProvisionError::NoRegion {
                snapshot: snapshot.name.clone(),
            })?;

        let spec = InstanceSpec::builder()
            .name(name.as_str())
            .region(region.as_str())
            .size(self.settings.size.as_str())
            .image(snapshot.id.as_str())
            .ssh_key(key.resource.id)
            .monitoring(self.settings.monitoring)
            .tag(self.settings.tag.as_str())
            .build()
            .map_err(|source| ProvisionError::Spec {
                name: name.clone(),
                source,
            })?;

        info!(instance = %name, %region, size = %spec.size, "creating scan instance");
        let created = self
            .provider
            .create_instance(&spec)
            .await
            .map_err(|source| ProvisionError::Request {
                name: name.clone(),
                source,
            })?;

        let mut scan_instance = ScanInstance {
            lineage: snapshot.lineage.clone(),
            snapshot_name: snapshot.name.clone(),
            name: name.clone(),
            id: created.instance.id,
            public_ip: created.instance.public_ip,
            status: created.instance.status,
        };
        self.ledger.track_instance(scan_instance.clone());

        wait_for_action(self.provider, created.action, self.poll)
            .await
            .map_err(|source| ProvisionError::Failed {
                name: name.clone(),
                source,
            })?;

        let reloaded = self
            .provider
            .get_instance(scan_instance.id)
            .await
            .map_err(|source| ProvisionError::Reload {
                name: name.clone(),
                source,
            })?
            .ok_or_else(|| ProvisionError::Vanished { name: name.clone() })?;

        if reloaded.public_ip.is_none() {
            warn!(instance = %name, "scan instance has no public address");
        }
        scan_instance.public_ip = reloaded.public_ip;
        scan_instance.status = reloaded.status;
        info!(
            instance = %name,
            instance_id = scan_instance.id,
            address = ?scan_instance.public_ip,
            "scan instance active"
        );
        Ok(scan_instance)
    }
}
