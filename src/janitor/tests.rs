//! Unit tests for the janitor module.

use super::*;
use crate::provider::Snapshot;
use crate::test_support::{FakeProvider, source_instance};
use rstest::{fixture, rstest};

const TAG: &str = "snapshot-droplet";

fn snapshot(id: &str, name: &str) -> Snapshot {
    Snapshot {
        id: id.to_owned(),
        name: name.to_owned(),
        regions: vec![String::from("nyc3")],
    }
}

fn tagged(id: u64, name: &str) -> crate::provider::Instance {
    let mut instance = source_instance(id, name);
    instance.tags = vec![String::from(TAG)];
    instance
}

#[fixture]
fn provider() -> FakeProvider {
    let provider = FakeProvider::new();
    provider.add_instance(source_instance(1, "web-1"));
    provider.add_instance(tagged(2, "web-1-snapshot-1700000000-droplet"));
    provider.add_snapshot(snapshot("s-1", "web-1-snapshot-1700000000"));
    provider.add_snapshot(snapshot("s-2", "nightly-backup"));
    provider.add_snapshot(snapshot("s-3", "db-snapshot-1699999999"));
    provider.add_key("sidescan-key-1700000000");
    provider.add_key("laptop");
    provider
}

#[rstest]
fn janitor_config_rejects_blank_tag() {
    let err = JanitorConfig::new("  ", false).expect_err("expected invalid config");
    assert_eq!(
        err,
        JanitorError::InvalidConfig {
            field: String::from("scan_tag")
        }
    );
}

#[rstest]
#[tokio::test]
async fn sweep_deletes_only_run_resources(provider: FakeProvider) {
    let janitor = Janitor::new(JanitorConfig::new(TAG, false).expect("config"), provider.clone());

    let summary = janitor.sweep().await.expect("sweep should succeed");

    assert_eq!(summary.deleted_instances, 1);
    assert_eq!(summary.deleted_snapshots, 1);
    assert_eq!(summary.deleted_keys, 1);
    assert!(summary.is_clean());
    let instances: Vec<_> = provider.instances().into_iter().map(|i| i.name).collect();
    assert_eq!(instances, vec![String::from("web-1")]);
    let snapshots: Vec<_> = provider.snapshots().into_iter().map(|s| s.name).collect();
    assert_eq!(
        snapshots,
        vec![String::from("nightly-backup"), String::from("db-snapshot-1699999999")]
    );
    let keys: Vec<_> = provider.keys().into_iter().map(|k| k.name).collect();
    assert_eq!(keys, vec![String::from("laptop")]);
}

#[rstest]
#[tokio::test]
async fn named_snapshots_are_swept_on_request(provider: FakeProvider) {
    let janitor = Janitor::new(JanitorConfig::new(TAG, true).expect("config"), provider.clone());

    let summary = janitor.sweep().await.expect("sweep should succeed");

    assert_eq!(summary.deleted_snapshots, 2);
    let snapshots: Vec<_> = provider.snapshots().into_iter().map(|s| s.name).collect();
    assert_eq!(snapshots, vec![String::from("nightly-backup")]);
}

#[rstest]
#[tokio::test]
async fn failed_deletes_are_collected_and_sweep_continues(provider: FakeProvider) {
    provider.fail_instance_destroy();
    let janitor = Janitor::new(JanitorConfig::new(TAG, false).expect("config"), provider.clone());

    let summary = janitor.sweep().await.expect("sweep should finish");

    assert_eq!(summary.deleted_instances, 0);
    assert_eq!(summary.deleted_snapshots, 1);
    assert_eq!(summary.deleted_keys, 1);
    let failure = summary.failures.first().expect("one failure");
    assert_eq!(failure.kind, ResourceKind::Instance);
    assert_eq!(failure.name, "web-1-snapshot-1700000000-droplet");
    assert!(!summary.is_clean());
}

#[rstest]
#[tokio::test]
async fn empty_account_sweeps_nothing() {
    let janitor = Janitor::new(JanitorConfig::new(TAG, true).expect("config"), FakeProvider::new());
    let summary = janitor.sweep().await.expect("sweep should succeed");
    assert_eq!(summary, SweepSummary::default());
}
