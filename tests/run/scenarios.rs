//! BDD scenarios for complete scan runs.

use rstest_bdd_macros::scenario;

use super::test_helpers::{RunContext, run_context};

#[scenario(
    path = "tests/features/run.feature",
    name = "Clean run renders a full report"
)]
fn scenario_clean_run(run_context: RunContext) {
    let _ = run_context;
}

#[scenario(
    path = "tests/features/run.feature",
    name = "Installer output goes to the diagnostic log"
)]
fn scenario_installer_output_logged(run_context: RunContext) {
    let _ = run_context;
}

#[scenario(
    path = "tests/features/run.feature",
    name = "A failed installer marks only that source"
)]
fn scenario_failed_installer(run_context: RunContext) {
    let _ = run_context;
}

#[scenario(
    path = "tests/features/run.feature",
    name = "Malformed scanner output is a parse failure"
)]
fn scenario_malformed_scanner_output(run_context: RunContext) {
    let _ = run_context;
}

#[scenario(
    path = "tests/features/run.feature",
    name = "An unreachable installer URL fails every scan but cleans up"
)]
fn scenario_unreachable_installer_url(run_context: RunContext) {
    let _ = run_context;
}

#[scenario(
    path = "tests/features/run.feature",
    name = "Listing lag within the lookup budget is tolerated"
)]
fn scenario_tolerated_listing_lag(run_context: RunContext) {
    let _ = run_context;
}

#[scenario(
    path = "tests/features/run.feature",
    name = "A snapshot listed after the lookup budget is still destroyed"
)]
fn scenario_late_listed_snapshot(run_context: RunContext) {
    let _ = run_context;
}

#[scenario(
    path = "tests/features/run.feature",
    name = "A snapshot that is never listed is reported after the run"
)]
fn scenario_never_listed_snapshot(run_context: RunContext) {
    let _ = run_context;
}

#[scenario(
    path = "tests/features/run.feature",
    name = "A stuck snapshot times out without blocking other sources"
)]
fn scenario_stuck_snapshot(run_context: RunContext) {
    let _ = run_context;
}

#[scenario(
    path = "tests/features/run.feature",
    name = "An interrupt during teardown hands the rest to the interrupt handler"
)]
fn scenario_interrupt_during_teardown(run_context: RunContext) {
    let _ = run_context;
}
