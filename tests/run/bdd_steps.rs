//! BDD step definitions for scan runs.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use rstest_bdd_macros::{given, then, when};
use sidescan::naming::{scan_instance_name, snapshot_name};
use sidescan::test_support::{ActionScript, StaticInstaller, output, source_instance};
use sidescan::workdir::DIAGNOSTIC_LOG_NAME;
use sidescan::{ReportRow, RowOutcome};
use tokio::runtime::Runtime;

use super::test_helpers::{INSTALLER_SCRIPT, KEY_NAME, RUN, RunContext, RunResult, RunTestError};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Setup(#[from] RunTestError),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn parse_address(raw: &str) -> Result<Ipv4Addr, StepError> {
    raw.trim()
        .parse()
        .map_err(|err| StepError::Assertion(format!("invalid address {raw}: {err}")))
}

fn row<'a>(run_context: &'a RunContext, source: &str) -> Result<&'a ReportRow, StepError> {
    let report = run_context
        .report()
        .ok_or_else(|| StepError::Assertion(format!("missing report: {:?}", run_context.outcome)))?;
    report
        .rows
        .iter()
        .find(|row| row.source_name == source)
        .ok_or_else(|| StepError::Assertion(format!("no row for {source}")))
}

fn diagnostic_log(run_context: &RunContext) -> Result<String, StepError> {
    run_context
        .workdir()?
        .read_to_string(DIAGNOSTIC_LOG_NAME)
        .map_err(|err| StepError::Assertion(format!("diagnostic log: {err}")))
}

#[given("source instances \"{names}\"")]
fn source_instances(mut run_context: RunContext, names: String) -> RunContext {
    for (name, id) in names.split(',').zip(1_u64..) {
        let source = run_context
            .provider
            .add_instance(source_instance(id, name.trim()));
        run_context.sources.push(source);
    }
    run_context
}

#[given("the scan instance for \"{source}\" is reachable at \"{address}\"")]
fn scan_instance_reachable(
    run_context: RunContext,
    source: String,
    address: String,
) -> Result<RunContext, StepError> {
    let ip = parse_address(&address)?;
    let name = scan_instance_name(&snapshot_name(source.trim(), RUN));
    run_context.provider.pin_address(&name, IpAddr::V4(ip));
    Ok(run_context)
}

#[given("the installer on \"{address}\" prints \"{text}\"")]
fn installer_prints(run_context: RunContext, address: String, text: String) -> RunContext {
    run_context.runner.push_routed(
        &format!("root@{address} bash -s"),
        output(0, &format!("{text}\n"), ""),
    );
    run_context
}

#[given("the installer on \"{address}\" fails with \"{stderr}\"")]
fn installer_fails(run_context: RunContext, address: String, stderr: String) -> RunContext {
    run_context
        .runner
        .push_routed(&format!("root@{address} bash -s"), output(1, "", &stderr));
    run_context
}

#[given("the scanner on \"{address}\" prints \"{text}\"")]
fn scanner_prints(run_context: RunContext, address: String, text: String) -> RunContext {
    run_context
        .runner
        .push_routed(&format!("root@{address} ./bin/grype"), output(0, &text, ""));
    run_context
}

#[given("the installer URL answers with status \"{status}\"")]
fn installer_url_fails(mut run_context: RunContext, status: u16) -> RunContext {
    run_context.installer = StaticInstaller::failing(status);
    run_context
}

#[given("the snapshot listing lags by \"{calls}\" calls")]
fn listing_lags(run_context: RunContext, calls: u32) -> RunContext {
    run_context.provider.set_snapshot_listing_lag(calls);
    run_context
}

#[given("the snapshot of \"{source}\" never finishes")]
fn snapshot_never_finishes(
    run_context: RunContext,
    source: String,
) -> Result<RunContext, StepError> {
    let id = run_context
        .source_id(source.trim())
        .ok_or_else(|| StepError::Assertion(format!("unknown source {source}")))?;
    run_context
        .provider
        .script_snapshot_of(id, ActionScript::never_finish());
    Ok(run_context)
}

#[given("instance destroys take \"{millis}\" milliseconds")]
fn slow_destroys(run_context: RunContext, millis: u64) -> RunContext {
    run_context
        .provider
        .set_destroy_latency(Duration::from_millis(millis));
    run_context
}

#[when("I run a scan")]
fn run_scan(mut run_context: RunContext) -> Result<RunContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let orchestrator = run_context.build_orchestrator()?;
    let sources = run_context.sources.clone();
    let result = runtime.block_on(async move { orchestrator.run_with_id(&sources, RUN).await });

    run_context.outcome = Some(match result {
        Ok(report) => RunResult::Report(report),
        Err(err) => RunResult::Failure(err.to_string()),
    });
    Ok(run_context)
}

#[when("the run is interrupted once teardown starts")]
fn interrupt_teardown(mut run_context: RunContext) -> Result<RunContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let orchestrator = Arc::new(run_context.build_orchestrator()?);
    let provider = run_context.provider.clone();
    let sources = run_context.sources.clone();
    let running = Arc::clone(&orchestrator);

    let finished = runtime.block_on(async move {
        tokio::select! {
            outcome = running.run_with_id(&sources, RUN) => Some(outcome),
            () = provider.instance_destroys_started(1) => None,
        }
    });
    if let Some(outcome) = finished {
        return Err(StepError::Assertion(format!(
            "run finished before teardown was interrupted: {outcome:?}"
        )));
    }

    run_context.orchestrator = Some(orchestrator);
    run_context.outcome = Some(RunResult::Interrupted);
    Ok(run_context)
}

#[when("the interrupt handler cleans up")]
fn interrupt_handler_cleans_up(mut run_context: RunContext) -> Result<RunContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let orchestrator = run_context
        .orchestrator
        .clone()
        .ok_or_else(|| StepError::Assertion(String::from("no interrupted run")))?;
    let report = runtime.block_on(async move { orchestrator.cleanup_tracked().await });
    run_context.interrupt_cleanup = Some(report);
    Ok(run_context)
}

#[then("the report is clean")]
fn report_is_clean(run_context: &RunContext) -> Result<(), StepError> {
    match run_context.report() {
        Some(report) if report.is_clean() => Ok(()),
        _ => Err(StepError::Assertion(format!(
            "expected a clean report, got {:?}",
            run_context.outcome
        ))),
    }
}

#[then("the row for \"{source}\" shows \"{critical}\" critical and \"{medium}\" medium findings")]
fn row_shows_findings(
    run_context: &RunContext,
    source: String,
    critical: u64,
    medium: u64,
) -> Result<(), StepError> {
    let found = row(run_context, &source)?;
    let RowOutcome::Tally(tally) = &found.outcome else {
        return Err(StepError::Assertion(format!("{source} has no tally: {:?}", found.outcome)));
    };
    if tally.get("Critical") == critical && tally.get("Medium") == medium {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("unexpected tally for {source}: {tally:?}")))
    }
}

#[then("every scan instance was created with size \"{size}\" in region \"{region}\"")]
fn scan_instances_shaped(
    run_context: &RunContext,
    size: String,
    region: String,
) -> Result<(), StepError> {
    let specs = run_context.provider.created_specs();
    let tag = String::from("snapshot-droplet");
    if !specs.is_empty()
        && specs
            .iter()
            .all(|spec| spec.size == size && spec.region == region && spec.tags.contains(&tag))
    {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("unexpected create requests: {specs:?}")))
    }
}

#[then("no run resources remain")]
fn nothing_leaked(run_context: &RunContext) -> Result<(), StepError> {
    let instances = run_context.provider.instances();
    if instances != run_context.sources {
        return Err(StepError::Assertion(format!("instances leaked: {instances:?}")));
    }
    let snapshots = run_context.provider.snapshots();
    if !snapshots.is_empty() {
        return Err(StepError::Assertion(format!("snapshots leaked: {snapshots:?}")));
    }
    let keys = run_context.provider.keys();
    if !keys.is_empty() {
        return Err(StepError::Assertion(format!("keys leaked: {keys:?}")));
    }
    let workdir = run_context.workdir()?;
    if workdir.contains(KEY_NAME) || workdir.contains(&format!("{KEY_NAME}.pub")) {
        return Err(StepError::Assertion(String::from("run key left on disk")));
    }
    Ok(())
}

#[then("the diagnostic log contains \"{text}\"")]
fn log_contains(run_context: &RunContext, text: String) -> Result<(), StepError> {
    let log = diagnostic_log(run_context)?;
    if log.contains(&text) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("diagnostic log lacks {text:?}: {log}")))
    }
}

#[then("the diagnostic log does not contain \"{text}\"")]
fn log_lacks(run_context: &RunContext, text: String) -> Result<(), StepError> {
    let log = diagnostic_log(run_context)?;
    if log.contains(&text) {
        Err(StepError::Assertion(format!("diagnostic log should not contain {text:?}")))
    } else {
        Ok(())
    }
}

#[then("the installer on \"{address}\" received the installer script on stdin")]
fn installer_received_script(run_context: &RunContext, address: String) -> Result<(), StepError> {
    let calls = run_context
        .runner
        .invocations_matching(&format!("root@{address} bash -s"));
    let stdin = calls
        .first()
        .and_then(|call| call.stdin.clone())
        .ok_or_else(|| StepError::Assertion(String::from("installer got no stdin")))?;
    if stdin == INSTALLER_SCRIPT.as_bytes() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "unexpected installer stdin: {}",
            String::from_utf8_lossy(&stdin)
        )))
    }
}

#[then("the row for \"{source}\" succeeded")]
fn row_succeeded(run_context: &RunContext, source: String) -> Result<(), StepError> {
    let found = row(run_context, &source)?;
    if found.is_success() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("{source} failed: {:?}", found.outcome)))
    }
}

#[then("the row for \"{source}\" failed at the \"{stage}\" stage")]
fn row_failed_at(run_context: &RunContext, source: String, stage: String) -> Result<(), StepError> {
    match &row(run_context, &source)?.outcome {
        RowOutcome::Failed { stage: actual, .. } if actual.to_string() == stage => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected {source} to fail at {stage}, got {other:?}"
        ))),
    }
}

#[then("the failure for \"{source}\" mentions \"{text}\"")]
fn failure_mentions(
    run_context: &RunContext,
    source: String,
    text: String,
) -> Result<(), StepError> {
    match &row(run_context, &source)?.outcome {
        RowOutcome::Failed { message, .. } if message.contains(&text) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected {source} failure to mention {text:?}, got {other:?}"
        ))),
    }
}

#[then("the scanner never ran on \"{address}\"")]
fn scanner_never_ran(run_context: &RunContext, address: String) -> Result<(), StepError> {
    let calls = run_context
        .runner
        .invocations_matching(&format!("root@{address} ./bin/grype"));
    if calls.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(String::from(
            "scanner must not run after a failed install",
        )))
    }
}

#[then("cleanup reported no failures")]
fn cleanup_clean(run_context: &RunContext) -> Result<(), StepError> {
    match run_context.report() {
        Some(report) if report.cleanup.is_clean() => Ok(()),
        other => Err(StepError::Assertion(format!("expected clean cleanup, got {other:?}"))),
    }
}

#[then("cleanup reports a failure for snapshot \"{name}\"")]
fn cleanup_reports_snapshot(run_context: &RunContext, name: String) -> Result<(), StepError> {
    let report = run_context
        .report()
        .ok_or_else(|| StepError::Assertion(String::from("missing report")))?;
    if report
        .cleanup
        .failures
        .iter()
        .any(|failure| failure.name == name)
    {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "no cleanup failure for {name}: {:?}",
            report.cleanup
        )))
    }
}

#[then("the report warns about snapshot \"{name}\"")]
fn report_warns(run_context: &RunContext, name: String) -> Result<(), StepError> {
    let rendered = run_context
        .report()
        .map(sidescan::RunReport::render)
        .ok_or_else(|| StepError::Assertion(String::from("missing report")))?;
    if rendered.contains(&format!("warning: failed to destroy snapshot {name}")) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("no warning for {name}: {rendered}")))
    }
}

#[then("the interrupt cleanup destroyed \"{count}\" resources")]
fn interrupt_cleanup_destroyed(run_context: &RunContext, count: usize) -> Result<(), StepError> {
    match &run_context.interrupt_cleanup {
        Some(report) if report.is_clean() && report.destroyed == count => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected {count} clean destroys, got {other:?}"
        ))),
    }
}
