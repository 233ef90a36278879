//! Orphan sweeper for interrupted runs.
//!
//! A run that is killed before its cleanup pass leaves scan instances, their
//! snapshots, and the run key behind. Scan instances are found by the scan
//! tag, keys by the `sidescan-key-` prefix, and snapshots by pairing them
//! with the swept instances (or, when asked, by the run naming pattern).
//! Every delete is attempted; failures are collected rather than aborting
//! the sweep.

use thiserror::Error;
use tracing::{info, warn};

use crate::cleanup::{CleanupFailure, ResourceKind};
use crate::naming::{RUN_KEY_PREFIX, SCAN_INSTANCE_SUFFIX, source_name_from_snapshot_name};
use crate::provider::Provider;

/// Configuration for a janitor sweep.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JanitorConfig {
    /// Tag carried by scan instances.
    pub scan_tag: String,
    /// Prefix of run key names.
    pub key_prefix: String,
    /// Also delete unpaired snapshots whose names follow the run pattern.
    pub include_named_snapshots: bool,
}

impl JanitorConfig {
    /// Constructs a config, trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`JanitorError::InvalidConfig`] when the tag is blank.
    pub fn new(
        scan_tag: impl Into<String>,
        include_named_snapshots: bool,
    ) -> Result<Self, JanitorError> {
        let trimmed_tag = scan_tag.into().trim().to_owned();
        if trimmed_tag.is_empty() {
            return Err(JanitorError::InvalidConfig {
                field: String::from("scan_tag"),
            });
        }
        Ok(Self {
            scan_tag: trimmed_tag,
            key_prefix: String::from(RUN_KEY_PREFIX),
            include_named_snapshots,
        })
    }
}

/// Summary of janitor work.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SweepSummary {
    /// Number of scan instances deleted.
    pub deleted_instances: usize,
    /// Number of snapshots deleted.
    pub deleted_snapshots: usize,
    /// Number of run keys deleted.
    pub deleted_keys: usize,
    /// Deletes that failed; the resources may still exist.
    pub failures: Vec<CleanupFailure>,
}

impl SweepSummary {
    /// Returns `true` when every attempted delete succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Errors returned by the janitor.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum JanitorError {
    /// Raised when configuration is missing required values.
    #[error("missing {field}")]
    InvalidConfig {
        /// Name of the missing or invalid field.
        field: String,
    },
    /// Raised when resources cannot be listed.
    #[error("failed to list {resource}: {message}")]
    Listing {
        /// Resource type being listed.
        resource: String,
        /// Provider error message.
        message: String,
    },
}

/// Deletes resources left behind by interrupted runs.
#[derive(Clone, Debug)]
pub struct Janitor<P> {
    config: JanitorConfig,
    provider: P,
}

impl<P: Provider> Janitor<P> {
    /// Creates a new janitor using the provided configuration and provider.
    #[must_use]
    pub const fn new(config: JanitorConfig, provider: P) -> Self {
        Self { config, provider }
    }

    /// Performs a sweep and returns what was deleted.
    ///
    /// Instances go first so their snapshots are no longer in use, then
    /// snapshots, then keys.
    ///
    /// # Errors
    ///
    /// Returns [`JanitorError::Listing`] when the provider cannot list a
    /// resource type. Individual delete failures are reported in
    /// [`SweepSummary::failures`].
    pub async fn sweep(&self) -> Result<SweepSummary, JanitorError> {
        let mut summary = SweepSummary::default();

        let instances = self
            .provider
            .list_instances()
            .await
            .map_err(|err| listing_error("instances", &err))?;
        let mut paired_snapshots = Vec::new();
        for instance in instances
            .iter()
            .filter(|candidate| candidate.tags.contains(&self.config.scan_tag))
        {
            if let Some(snapshot) = instance.name.strip_suffix(SCAN_INSTANCE_SUFFIX) {
                paired_snapshots.push(snapshot.to_owned());
            }
            match self.provider.destroy_instance(instance.id).await {
                Ok(()) => {
                    info!(instance = %instance.name, "deleted orphaned scan instance");
                    summary.deleted_instances += 1;
                }
                Err(err) => record(&mut summary, ResourceKind::Instance, &instance.name, &err),
            }
        }

        let snapshots = self
            .provider
            .list_snapshots()
            .await
            .map_err(|err| listing_error("snapshots", &err))?;
        for snapshot in snapshots.iter().filter(|candidate| {
            paired_snapshots.contains(&candidate.name)
                || (self.config.include_named_snapshots
                    && source_name_from_snapshot_name(&candidate.name).is_some())
        }) {
            match self.provider.destroy_snapshot(&snapshot.id).await {
                Ok(()) => {
                    info!(snapshot = %snapshot.name, "deleted orphaned snapshot");
                    summary.deleted_snapshots += 1;
                }
                Err(err) => record(&mut summary, ResourceKind::Snapshot, &snapshot.name, &err),
            }
        }

        let keys = self
            .provider
            .list_keys()
            .await
            .map_err(|err| listing_error("keys", &err))?;
        for key in keys
            .iter()
            .filter(|candidate| candidate.name.starts_with(&self.config.key_prefix))
        {
            match self.provider.destroy_key(key.id).await {
                Ok(()) => {
                    info!(key = %key.name, "deleted orphaned run key");
                    summary.deleted_keys += 1;
                }
                Err(err) => record(&mut summary, ResourceKind::Key, &key.name, &err),
            }
        }

        Ok(summary)
    }
}

fn listing_error(resource: &str, err: &impl std::fmt::Display) -> JanitorError {
    JanitorError::Listing {
        resource: resource.to_owned(),
        message: err.to_string(),
    }
}

fn record(
    summary: &mut SweepSummary,
    kind: ResourceKind,
    name: &str,
    err: &impl std::fmt::Display,
) {
    warn!(%kind, name, error = %err, "janitor delete failed");
    summary.failures.push(CleanupFailure {
        kind,
        name: name.to_owned(),
        message: err.to_string(),
    });
}

#[cfg(test)]
mod tests;
