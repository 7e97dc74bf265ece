// src/commands/mod.rs
//! Command implementations behind the CLI definitions in `cli`.
//!
//! Each function returns the process exit code. Validation errors from the
//! library surface as `rehome::Error` inside the anyhow chain; `main` maps
//! them to the dedicated exit code.

use anyhow::Context as _;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use rehome::reconcile::LiveHost;
use rehome::{
    capture, manual, normalize, probe, reconcile, verify, Error, ExecutionContext, Mode, Role,
    Snapshot, SystemRunner, TargetStateModel, UnitName, UnitStatus, EXIT_FAILED_ACTIONS, EXIT_OK,
};

/// Build the execution context for the live machine under `root`.
fn live_context(root: &Path, unit_timeout: Duration) -> ExecutionContext {
    let runner = Arc::new(SystemRunner::default());
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/root"));
    let username = std::env::var("USER").unwrap_or_else(|_| String::from("unknown"));
    let hostname = fs::read_to_string(root.join("etc/hostname"))
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| String::from("localhost"));

    let mut ctx = ExecutionContext::new(root, &home, username, hostname, runner.clone());
    ctx.unit_timeout = unit_timeout;
    ctx.caps = probe(root, &home, runner.as_ref());
    ctx
}

fn parse_units(units: &[String]) -> anyhow::Result<BTreeSet<UnitName>> {
    if units.is_empty() {
        return Ok(UnitName::all().into_iter().collect());
    }
    units
        .iter()
        .map(|u| {
            u.parse::<UnitName>()
                .map_err(|_| Error::UnknownUnit(u.clone()).into())
        })
        .collect()
}

fn parse_roles(roles: &[String], model: &TargetStateModel) -> anyhow::Result<BTreeSet<Role>> {
    if roles.is_empty() {
        return Ok(model.roles.keys().copied().collect());
    }
    roles
        .iter()
        .map(|r| {
            r.parse::<Role>()
                .map_err(|_| Error::UnknownRole(r.clone()).into())
        })
        .collect()
}

pub fn capture_cmd(
    output: &Path,
    units: &[String],
    root: &Path,
    timeout_secs: u64,
) -> anyhow::Result<i32> {
    let units = parse_units(units)?;
    let ctx = live_context(root, Duration::from_secs(timeout_secs));

    let snapshot = capture::capture(&ctx, &units)?;
    snapshot
        .write(output)
        .with_context(|| format!("writing snapshot to {}", output.display()))?;

    let findings = snapshot.findings().count();
    println!(
        "captured {} units into {} ({} findings)",
        snapshot.records.len(),
        output.display(),
        findings
    );
    for finding in snapshot.findings() {
        println!("  finding [{}] {}", finding.id, finding.reason);
    }
    Ok(EXIT_OK)
}

pub fn inspect_cmd(snapshot_dir: &Path) -> anyhow::Result<i32> {
    let snapshot = Snapshot::read(snapshot_dir)
        .with_context(|| format!("reading snapshot from {}", snapshot_dir.display()))?;
    let m = &snapshot.manifest;

    println!(
        "snapshot of {}@{} ({}), captured {}",
        m.username,
        m.hostname,
        m.os_version.as_deref().unwrap_or("unknown os"),
        m.date.to_rfc3339()
    );
    for (unit, status) in &m.units {
        let status = match status {
            UnitStatus::Ok => "ok",
            UnitStatus::Failed => "failed",
            UnitStatus::TimedOut => "timed out",
        };
        match snapshot.records.get(unit) {
            Some(record) => println!(
                "{unit:>10}  {status}: {} facts, {} files, {} findings",
                record.facts.len(),
                record.files.len(),
                record.findings.len()
            ),
            None => println!("{unit:>10}  {status}: no record"),
        }
    }
    Ok(EXIT_OK)
}

pub fn normalize_cmd(snapshot_dir: &Path, output: &Path) -> anyhow::Result<i32> {
    let snapshot = Snapshot::read(snapshot_dir)
        .with_context(|| format!("reading snapshot from {}", snapshot_dir.display()))?;
    let state = normalize(&snapshot)?;
    state
        .write(output)
        .with_context(|| format!("writing model to {}", output.display()))?;

    println!(
        "model written to {}: {} roles, {} actions, {} blobs",
        output.display(),
        state.model.roles.len(),
        state.model.action_count(),
        state.blobs.len()
    );
    Ok(EXIT_OK)
}

pub fn apply_cmd(
    model_dir: &Path,
    roles: &[String],
    dry_run: bool,
    root: &Path,
    report_path: Option<&Path>,
) -> anyhow::Result<i32> {
    let (model, blobs) = rehome::NormalizedState::read_dir(model_dir)
        .with_context(|| format!("loading model from {}", model_dir.display()))?;
    let selected = parse_roles(roles, &model)?;

    let ctx = live_context(root, Duration::from_secs(60));
    let host = LiveHost::new(ctx);
    let mode = if dry_run { Mode::DryRun } else { Mode::Apply };

    let report = reconcile(&model, &blobs, &host, &selected, mode, Some(model_dir))?;

    for action in &report.actions {
        match &action.detail {
            Some(detail) => println!(
                "{:>9}  [{}] {}  ({detail})",
                action.outcome.to_string(),
                action.role,
                action.target
            ),
            None => println!(
                "{:>9}  [{}] {}",
                action.outcome.to_string(),
                action.role,
                action.target
            ),
        }
    }
    print_summary(&report);
    if !report.manual_steps.is_empty() {
        println!("\nmanual steps:");
        for step in &report.manual_steps {
            println!("  [{}] {}", step.origin, step.description);
            if let Some(cmd) = &step.suggested_command {
                println!("      try: {cmd}");
            }
        }
    }

    if let Some(path) = report_path {
        report
            .write(path)
            .with_context(|| format!("writing report to {}", path.display()))?;
        info!(path = %path.display(), "run report written");
    }
    Ok(report.exit_code())
}

fn print_summary(report: &rehome::ReconciliationReport) {
    let counts = report.counts();
    let summary: Vec<String> = counts
        .iter()
        .map(|(outcome, n)| format!("{n} {outcome}"))
        .collect();
    println!(
        "\nrun {} ({}): {}",
        report.run_id,
        report.mode,
        summary.join(", ")
    );
}

pub fn verify_cmd(
    model_dir: &Path,
    root: &Path,
    report_path: Option<&Path>,
) -> anyhow::Result<i32> {
    let (model, _blobs) = rehome::NormalizedState::read_dir(model_dir)
        .with_context(|| format!("loading model from {}", model_dir.display()))?;

    let ctx = live_context(root, Duration::from_secs(60));
    let host = LiveHost::new(ctx);
    let report = verify(&model, &host)?;

    for check in &report.checks {
        match &check.detail {
            Some(detail) => println!(
                "{:>20}  [{}] {}  ({detail})",
                check.status.to_string(),
                check.role,
                check.target
            ),
            None => println!(
                "{:>20}  [{}] {}",
                check.status.to_string(),
                check.role,
                check.target
            ),
        }
    }
    let counts = report.counts();
    let summary: Vec<String> = counts
        .iter()
        .map(|(status, n)| format!("{n} {status}"))
        .collect();
    println!("\nverification: {}", summary.join(", "));

    if let Some(path) = report_path {
        report
            .write(path)
            .with_context(|| format!("writing report to {}", path.display()))?;
    }
    if report.is_clean() {
        Ok(EXIT_OK)
    } else {
        Ok(EXIT_FAILED_ACTIONS)
    }
}

pub fn list_roles_cmd(model_dir: &Path) -> anyhow::Result<i32> {
    let model = TargetStateModel::read(model_dir)
        .with_context(|| format!("loading model from {}", model_dir.display()))?;
    for role in model.available_roles() {
        let spec = model.role(role).map(|s| s.actions.len()).unwrap_or(0);
        println!("{role}: {spec} actions");
    }
    Ok(EXIT_OK)
}

pub fn manual_steps_cmd(model_dir: &Path, json: bool) -> anyhow::Result<i32> {
    let model = TargetStateModel::read(model_dir)
        .with_context(|| format!("loading model from {}", model_dir.display()))?;
    let steps = manual::collect(&model);

    if json {
        println!("{}", serde_json::to_string_pretty(&steps)?);
    } else if steps.is_empty() {
        println!("no manual steps; the model converges mechanically");
    } else {
        for step in &steps {
            println!("[{}] {}", step.origin, step.description);
            if let Some(cmd) = &step.suggested_command {
                println!("    try: {cmd}");
            }
        }
    }
    Ok(EXIT_OK)
}
