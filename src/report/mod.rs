//! Result aggregation and report rendering.
//!
//! Raw tallies only contain severities the scanner actually reported;
//! the four headline columns are zero-filled when rendering.

mod table;

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use thiserror::Error;

use crate::cleanup::CleanupReport;
use crate::naming::result_file_name;
use crate::provider::Instance;
use crate::workdir::{WorkDir, WorkDirError};

pub use table::{Align, Table};

/// Severity columns shown in the summary, in display order.
pub const HEADLINE_SEVERITIES: [&str; 4] = ["Critical", "High", "Medium", "Low"];

/// Per-severity match counts for one scan.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SeverityTally {
    counts: BTreeMap<String, u64>,
}

impl SeverityTally {
    /// Counts one match of `severity`.
    pub fn record(&mut self, severity: &str) {
        *self.counts.entry(severity.to_owned()).or_insert(0) += 1;
    }

    /// Returns the count for `severity`, zero when it was never observed.
    #[must_use]
    pub fn get(&self, severity: &str) -> u64 {
        self.counts.get(severity).copied().unwrap_or(0)
    }

    /// Sum over every observed severity, including those outside the
    /// headline columns.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Iterates over the observed severities and their counts.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counts.iter().map(|(label, count)| (label.as_str(), *count))
    }
}

/// Raised when a result artifact cannot be turned into a tally.
#[derive(Debug, Error)]
pub enum ReportError {
    /// The artifact does not exist, usually because the scan failed.
    #[error("result file {file} is missing")]
    Missing {
        /// Artifact file name.
        file: String,
    },
    /// The artifact exists but could not be read.
    #[error(transparent)]
    Unreadable(#[from] WorkDirError),
    /// The artifact is not a scanner JSON document.
    #[error("result file {file} is not valid scanner output: {message}")]
    Malformed {
        /// Artifact file name.
        file: String,
        /// Parser message.
        message: String,
    },
}

#[derive(Debug, Deserialize)]
struct ScanDocument {
    matches: Vec<ScanMatch>,
}

#[derive(Debug, Deserialize)]
struct ScanMatch {
    vulnerability: Vulnerability,
}

#[derive(Debug, Deserialize)]
struct Vulnerability {
    severity: String,
}

/// Counts matches by severity in a scanner JSON document.
///
/// # Errors
///
/// Returns the parser error when `json` lacks a `matches` list of
/// `vulnerability.severity` entries.
pub fn tally_matches(json: &str) -> Result<SeverityTally, serde_json::Error> {
    let document: ScanDocument = serde_json::from_str(json)?;
    let mut tally = SeverityTally::default();
    for entry in &document.matches {
        tally.record(&entry.vulnerability.severity);
    }
    Ok(tally)
}

/// Reads `<source>-result.json` from `workdir` and tallies it.
///
/// # Errors
///
/// Returns [`ReportError`] when the file is missing, unreadable, or not
/// valid scanner output. An empty file is malformed, never zero findings.
pub fn parse_result(workdir: &WorkDir, source_name: &str) -> Result<SeverityTally, ReportError> {
    let file = result_file_name(source_name);
    if !workdir.contains(&file) {
        return Err(ReportError::Missing { file });
    }
    let contents = workdir.read_to_string(&file)?;
    tally_matches(&contents).map_err(|err| ReportError::Malformed {
        file,
        message: err.to_string(),
    })
}

/// Pipeline stage at which a source instance failed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    /// Snapshotting the source.
    Snapshot,
    /// Booting the scan instance.
    Provision,
    /// Installing or running the scanner.
    Scan,
    /// Reading the result artifact.
    Parse,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Snapshot => "snapshot",
            Self::Provision => "provision",
            Self::Scan => "scan",
            Self::Parse => "parse",
        };
        f.write_str(label)
    }
}

/// Outcome for one source instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RowOutcome {
    /// The scan completed and its result parsed.
    Tally(SeverityTally),
    /// The pipeline failed.
    Failed {
        /// Stage that failed.
        stage: Stage,
        /// Error description.
        message: String,
    },
}

/// One line of the summary report.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReportRow {
    /// Source instance name.
    pub source_name: String,
    /// What happened to it.
    pub outcome: RowOutcome,
}

impl ReportRow {
    /// Returns `true` when the row carries a tally.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.outcome, RowOutcome::Tally(_))
    }
}

/// Renders the per-instance summary table.
#[must_use]
pub fn render_summary(rows: &[ReportRow]) -> String {
    let mut table = Table::new(&[
        ("Name", Align::Left),
        ("Critical", Align::Right),
        ("High", Align::Right),
        ("Medium", Align::Right),
        ("Low", Align::Right),
        ("Total", Align::Right),
        ("Error", Align::Left),
    ]);
    for row in rows {
        let mut cells = vec![row.source_name.clone()];
        match &row.outcome {
            RowOutcome::Tally(tally) => {
                cells.extend(
                    HEADLINE_SEVERITIES
                        .iter()
                        .map(|severity| tally.get(severity).to_string()),
                );
                cells.push(tally.total().to_string());
                cells.push(String::new());
            }
            RowOutcome::Failed { stage, message } => {
                cells.extend(std::iter::repeat_n(String::from("-"), 5));
                cells.push(format!("{stage}: {message}"));
            }
        }
        table.push_row(cells);
    }
    table.render()
}

/// Renders one warning line per failed destroy call.
#[must_use]
pub fn render_cleanup_warnings(cleanup: &CleanupReport) -> String {
    cleanup
        .failures
        .iter()
        .map(|failure| format!("warning: failed to destroy {failure}\n"))
        .collect()
}

/// Renders the account's instances for list mode.
#[must_use]
pub fn render_instances(instances: &[Instance]) -> String {
    let mut table = Table::new(&[
        ("Id", Align::Right),
        ("Region", Align::Left),
        ("Name", Align::Left),
        ("Size", Align::Left),
        ("Disk", Align::Right),
    ]);
    for instance in instances {
        table.push_row(vec![
            instance.id.to_string(),
            instance.region.clone(),
            instance.name.clone(),
            instance.size.clone(),
            instance.disk_gb.to_string(),
        ]);
    }
    table.render()
}
