//! BDD step definitions for janitor sweeps.

use std::time::Duration;

use rstest_bdd_macros::{given, then, when};
use sidescan::Snapshot;
use sidescan::test_support::source_instance;
use tokio::runtime::Runtime;

use super::test_helpers::{JanitorContext, JanitorTestError, RUN, SweepOutcome};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Setup(#[from] JanitorTestError),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn sweep(
    mut janitor_context: JanitorContext,
    include_named: bool,
) -> Result<JanitorContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let janitor = janitor_context
        .janitor(include_named)
        .map_err(StepError::Assertion)?;
    let result = runtime.block_on(async move { janitor.sweep().await });
    janitor_context.outcome = Some(match result {
        Ok(summary) => SweepOutcome::Success(summary),
        Err(err) => SweepOutcome::Failure(err.to_string()),
    });
    Ok(janitor_context)
}

#[given("source instances \"{names}\"")]
fn source_instances(mut janitor_context: JanitorContext, names: String) -> JanitorContext {
    for (name, id) in names.split(',').zip(1_u64..) {
        let source = janitor_context
            .provider
            .add_instance(source_instance(id, name.trim()));
        janitor_context.sources.push(source);
    }
    janitor_context
}

#[given("an account key named \"{name}\"")]
fn account_key(janitor_context: JanitorContext, name: String) -> JanitorContext {
    janitor_context.provider.add_key(&name);
    janitor_context
}

#[given("a scan run abandoned while settling")]
fn abandoned_run(janitor_context: JanitorContext) -> Result<JanitorContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let orchestrator = janitor_context.stalling_orchestrator()?;
    let sources = janitor_context.sources.clone();
    let abandoned = runtime.block_on(async move {
        tokio::time::timeout(
            Duration::from_millis(300),
            orchestrator.run_with_id(&sources, RUN),
        )
        .await
    });
    if abandoned.is_ok() {
        return Err(StepError::Assertion(String::from(
            "run finished instead of stalling in the settle delay",
        )));
    }
    Ok(janitor_context)
}

#[given("a snapshot named \"{name}\"")]
fn named_snapshot(janitor_context: JanitorContext, name: String) -> JanitorContext {
    let id = format!("manual-{}", janitor_context.provider.snapshots().len());
    janitor_context.provider.add_snapshot(Snapshot {
        id,
        name,
        regions: vec![String::from("nyc3")],
    });
    janitor_context
}

#[given("snapshot deletion fails")]
fn snapshot_deletion_fails(janitor_context: JanitorContext) -> JanitorContext {
    janitor_context.provider.fail_snapshot_destroy();
    janitor_context
}

#[when("the janitor sweeps with default settings")]
fn sweep_default(janitor_context: JanitorContext) -> Result<JanitorContext, StepError> {
    sweep(janitor_context, false)
}

#[when("the janitor sweeps including named snapshots")]
fn sweep_including_named(janitor_context: JanitorContext) -> Result<JanitorContext, StepError> {
    sweep(janitor_context, true)
}

#[then("the janitor deleted \"{instances}\" instances, \"{snapshots}\" snapshots and \"{keys}\" keys")]
fn deleted_counts(
    janitor_context: &JanitorContext,
    instances: usize,
    snapshots: usize,
    keys: usize,
) -> Result<(), StepError> {
    let summary = janitor_context.summary().ok_or_else(|| {
        StepError::Assertion(format!("sweep did not succeed: {:?}", janitor_context.outcome))
    })?;
    let actual = (
        summary.deleted_instances,
        summary.deleted_snapshots,
        summary.deleted_keys,
    );
    if actual == (instances, snapshots, keys) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {instances}/{snapshots}/{keys} deletions, got {actual:?}"
        )))
    }
}

#[then("only the source instances remain")]
fn only_sources_remain(janitor_context: &JanitorContext) -> Result<(), StepError> {
    let instances = janitor_context.provider.instances();
    if instances == janitor_context.sources {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("unexpected instances: {instances:?}")))
    }
}

#[then("only the key \"{name}\" remains")]
fn only_key_remains(janitor_context: &JanitorContext, name: String) -> Result<(), StepError> {
    let keys: Vec<String> = janitor_context
        .provider
        .keys()
        .into_iter()
        .map(|key| key.name)
        .collect();
    if keys == [name.clone()] {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("expected only {name}, got {keys:?}")))
    }
}

#[then("the snapshot \"{name}\" remains")]
fn snapshot_remains(janitor_context: &JanitorContext, name: String) -> Result<(), StepError> {
    let snapshots = janitor_context.provider.snapshots();
    if snapshots.iter().any(|snapshot| snapshot.name == name) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("{name} was deleted: {snapshots:?}")))
    }
}

#[then("the sweep reports \"{count}\" failures")]
fn sweep_failures(janitor_context: &JanitorContext, count: usize) -> Result<(), StepError> {
    let summary = janitor_context
        .summary()
        .ok_or_else(|| StepError::Assertion(String::from("sweep did not succeed")))?;
    if summary.failures.len() == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} failures, got {:?}",
            summary.failures
        )))
    }
}
