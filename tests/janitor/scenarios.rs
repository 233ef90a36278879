//! BDD scenarios for janitor sweeps.

use rstest_bdd_macros::scenario;

use super::test_helpers::{JanitorContext, janitor_context};

#[scenario(
    path = "tests/features/janitor.feature",
    name = "Sweep what an abandoned run left behind"
)]
fn scenario_abandoned_run_swept(janitor_context: JanitorContext) {
    let _ = janitor_context;
}

#[scenario(
    path = "tests/features/janitor.feature",
    name = "Named snapshots are kept by default"
)]
fn scenario_named_snapshots_kept(janitor_context: JanitorContext) {
    let _ = janitor_context;
}

#[scenario(
    path = "tests/features/janitor.feature",
    name = "Named snapshots are swept on request"
)]
fn scenario_named_snapshots_swept(janitor_context: JanitorContext) {
    let _ = janitor_context;
}

#[scenario(
    path = "tests/features/janitor.feature",
    name = "Failed deletes are reported without stopping the sweep"
)]
fn scenario_failed_deletes_reported(janitor_context: JanitorContext) {
    let _ = janitor_context;
}
