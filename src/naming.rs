//! Run identifiers, resource names, and lineage records.
//!
//! Every resource a run creates carries a [`Lineage`] pointing back at the
//! source instance it was derived from. The derived names still encode that
//! lineage (`web-1` → `web-1-snapshot-1700000000` →
//! `web-1-snapshot-1700000000-droplet`) so that resources remain
//! recognisable in the provider console and can be decomposed when only the
//! name is available.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Infix joining a source name and the run timestamp in snapshot names.
pub const SNAPSHOT_INFIX: &str = "-snapshot-";
/// Suffix appended to snapshot names to name scan instances.
pub const SCAN_INSTANCE_SUFFIX: &str = "-droplet";
/// Suffix of the per-source result artifact.
pub const RESULT_FILE_SUFFIX: &str = "-result.json";
/// Prefix of the run-scoped key pair name.
pub const RUN_KEY_PREFIX: &str = "sidescan-key-";

/// Timestamp-derived identifier shared by every resource of one run.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RunId(u64);

impl RunId {
    /// Derives a run identifier from the current wall-clock time (seconds
    /// since the Unix epoch).
    #[must_use]
    pub fn now() -> Self {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs());
        Self(seconds)
    }

    /// Wraps an explicit timestamp.
    #[must_use]
    pub const fn from_timestamp(seconds: u64) -> Self {
        Self(seconds)
    }

    /// Returns the underlying timestamp.
    #[must_use]
    pub const fn timestamp(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlates a derived resource with the source instance and run it came
/// from.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Lineage {
    /// Identifier of the source instance.
    pub source_id: u64,
    /// Name of the source instance.
    pub source_name: String,
    /// Run that created the resource.
    pub run: RunId,
}

impl Lineage {
    /// Creates a lineage record.
    #[must_use]
    pub fn new(source_id: u64, source_name: impl Into<String>, run: RunId) -> Self {
        Self {
            source_id,
            source_name: source_name.into(),
            run,
        }
    }

    /// Name of the snapshot taken of the source during this run.
    #[must_use]
    pub fn snapshot_name(&self) -> String {
        snapshot_name(&self.source_name, self.run)
    }

    /// Name of the scan instance booted from this run's snapshot.
    #[must_use]
    pub fn scan_instance_name(&self) -> String {
        scan_instance_name(&self.snapshot_name())
    }

    /// File name of the raw result artifact for the source.
    #[must_use]
    pub fn result_file_name(&self) -> String {
        result_file_name(&self.source_name)
    }
}

/// Builds `<source>-snapshot-<run>`.
#[must_use]
pub fn snapshot_name(source_name: &str, run: RunId) -> String {
    format!("{source_name}{SNAPSHOT_INFIX}{run}")
}

/// Builds `<snapshot>-droplet`.
#[must_use]
pub fn scan_instance_name(snapshot_name: &str) -> String {
    format!("{snapshot_name}{SCAN_INSTANCE_SUFFIX}")
}

/// Builds `<source>-result.json`.
#[must_use]
pub fn result_file_name(source_name: &str) -> String {
    format!("{source_name}{RESULT_FILE_SUFFIX}")
}

/// Builds the run key name `sidescan-key-<run>`.
#[must_use]
pub fn run_key_name(run: RunId) -> String {
    format!("{RUN_KEY_PREFIX}{run}")
}

/// Recovers the source name from a snapshot name.
///
/// The split happens on the last `-snapshot-` infix followed only by digits,
/// so sources whose own names contain `-snapshot-` decompose correctly.
#[must_use]
pub fn source_name_from_snapshot_name(snapshot_name: &str) -> Option<&str> {
    let (source, stamp) = snapshot_name.rsplit_once(SNAPSHOT_INFIX)?;
    let is_stamp = !stamp.is_empty() && stamp.chars().all(|ch| ch.is_ascii_digit());
    (is_stamp && !source.is_empty()).then_some(source)
}

/// Recovers the source name from a scan instance name.
#[must_use]
pub fn source_name_from_instance_name(instance_name: &str) -> Option<&str> {
    instance_name
        .strip_suffix(SCAN_INSTANCE_SUFFIX)
        .and_then(source_name_from_snapshot_name)
}
