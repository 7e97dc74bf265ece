// src/capture/mod.rs

//! Capture engine.
//!
//! Walks a fixed set of capture units, each independently producing a
//! [`CaptureRecord`], and assembles them plus a manifest into an immutable
//! [`Snapshot`]. Units are mutually independent (disjoint read sets, no
//! shared mutable state) and run as parallel threads behind a per-unit
//! timeout; a hung external probe becomes a finding, never a hang.
//!
//! Every unit is read-only and declares the source locations it reads; a
//! read failure on one item becomes a [`Finding`] and the unit continues.
//! A unit that fails outright is marked failed in the manifest and the
//! other units still run - capture always completes and always writes a
//! manifest, even degraded.

pub mod audio;
pub mod desktop;
pub mod devtools;
pub mod dotfiles;
pub mod hardware;
pub mod packages;
pub mod repos;
pub mod shell;
pub mod system;
pub mod thirdparty;

use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::sync::mpsc;
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::context::ExecutionContext;
use crate::snapshot::{CaptureRecord, Finding, Manifest, Snapshot, UnitName, UnitStatus};
use crate::Result;

type UnitFn = fn(&ExecutionContext) -> Result<CaptureRecord>;

fn unit_fn(unit: UnitName) -> UnitFn {
    match unit {
        UnitName::Package => packages::capture,
        UnitName::Repo => repos::capture,
        UnitName::Shell => shell::capture,
        UnitName::Desktop => desktop::capture,
        UnitName::Dotfile => dotfiles::capture,
        UnitName::System => system::capture,
        UnitName::Devtool => devtools::capture,
        UnitName::Audio => audio::capture,
        UnitName::Thirdparty => thirdparty::capture,
        UnitName::Hardware => hardware::capture,
    }
}

/// Capture the requested units into a snapshot.
pub fn capture(ctx: &ExecutionContext, units: &BTreeSet<UnitName>) -> Result<Snapshot> {
    let (tx, rx) = mpsc::channel::<(UnitName, Result<CaptureRecord>)>();
    for &unit in units {
        let ctx = ctx.clone();
        let tx = tx.clone();
        thread::spawn(move || {
            debug!(%unit, "capture unit started");
            let result = unit_fn(unit)(&ctx);
            // The receiver may have given up on us after the deadline.
            let _ = tx.send((unit, result));
        });
    }
    drop(tx);

    let deadline = Instant::now() + ctx.unit_timeout;
    let mut records: BTreeMap<UnitName, CaptureRecord> = BTreeMap::new();
    let mut statuses: BTreeMap<UnitName, UnitStatus> = BTreeMap::new();
    let mut pending: BTreeSet<UnitName> = units.clone();

    while !pending.is_empty() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok((unit, Ok(record))) => {
                pending.remove(&unit);
                statuses.insert(unit, UnitStatus::Ok);
                records.insert(unit, record);
            }
            Ok((unit, Err(err))) => {
                warn!(%unit, %err, "capture unit failed");
                pending.remove(&unit);
                statuses.insert(unit, UnitStatus::Failed);
                let mut record = CaptureRecord::new();
                record.push_finding(Finding::new(unit, "capture", err.to_string()));
                records.insert(unit, record);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                for unit in std::mem::take(&mut pending) {
                    warn!(%unit, "capture unit timed out");
                    statuses.insert(unit, UnitStatus::TimedOut);
                    let mut record = CaptureRecord::new();
                    record.push_finding(Finding::new(
                        unit,
                        "capture",
                        format!("timed out after {}s", ctx.unit_timeout.as_secs()),
                    ));
                    records.insert(unit, record);
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                for unit in std::mem::take(&mut pending) {
                    statuses.insert(unit, UnitStatus::Failed);
                    let mut record = CaptureRecord::new();
                    record.push_finding(Finding::new(unit, "capture", "capture thread panicked"));
                    records.insert(unit, record);
                }
            }
        }
    }

    let manifest = build_manifest(ctx, statuses);
    info!(
        units = records.len(),
        findings = records.values().map(|r| r.findings.len()).sum::<usize>(),
        "capture complete"
    );
    Ok(Snapshot { manifest, records })
}

/// Assemble the manifest. Always succeeds; unavailable facts stay `None`.
fn build_manifest(ctx: &ExecutionContext, units: BTreeMap<UnitName, UnitStatus>) -> Manifest {
    Manifest {
        hostname: ctx.hostname.clone(),
        username: ctx.username.clone(),
        home: ctx.home.to_string_lossy().into_owned(),
        date: Utc::now(),
        os_version: os_pretty_name(ctx),
        kernel: command_value(ctx, "uname", &["-r"]),
        arch: command_value(ctx, "uname", &["-m"]),
        desktop: ctx.caps.desktop_shell.map(|d| d.to_string()),
        display_server: ctx.caps.display_server.map(|d| d.to_string()),
        desktop_shell_version: ctx.caps.desktop_shell_version.clone(),
        shell: login_shell(ctx),
        units,
    }
}

fn os_pretty_name(ctx: &ExecutionContext) -> Option<String> {
    let text = fs::read_to_string(ctx.path("/etc/os-release")).ok()?;
    text.lines()
        .find_map(|line| line.strip_prefix("PRETTY_NAME="))
        .map(|v| v.trim_matches('"').to_string())
}

fn command_value(ctx: &ExecutionContext, program: &str, args: &[&str]) -> Option<String> {
    ctx.runner
        .run(program, args)
        .ok()
        .filter(|o| o.success())
        .map(|o| o.stdout.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Login shell of the migrated user, from the passwd database under the
/// context root.
pub(crate) fn login_shell(ctx: &ExecutionContext) -> Option<String> {
    let passwd = fs::read_to_string(ctx.path("/etc/passwd")).ok()?;
    passwd
        .lines()
        .find(|line| line.starts_with(&format!("{}:", ctx.username)))
        .and_then(|line| line.rsplit(':').next())
        .map(str::to_string)
}

/// Capture one declared file into its slot. Absence is normal (the slot is
/// simply not captured); a read failure is a finding.
pub(crate) fn read_file_slot(
    ctx: &ExecutionContext,
    record: &mut CaptureRecord,
    unit: UnitName,
    slot: &str,
) {
    let path = ctx.expand_slot(slot);
    if !path.is_file() {
        return;
    }
    match fs::read(&path) {
        Ok(payload) => record.add_file(slot, payload),
        Err(err) => record.push_finding(Finding::new(unit, slot, err.to_string())),
    }
}

/// Capture every regular file under one declared root. Traversal never
/// leaves the root; unreadable items become findings and the walk continues.
pub(crate) fn read_tree(
    ctx: &ExecutionContext,
    record: &mut CaptureRecord,
    unit: UnitName,
    slot_prefix: &str,
) {
    let root = ctx.expand_slot(slot_prefix);
    if !root.is_dir() {
        return;
    }
    for entry in WalkDir::new(&root).sort_by_file_name() {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                let item = err
                    .path()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_else(|| slot_prefix.to_string());
                record.push_finding(Finding::new(unit, item, err.to_string()));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = match entry.path().strip_prefix(&root) {
            Ok(rel) => rel.to_string_lossy().into_owned(),
            Err(_) => continue,
        };
        let slot = format!("{}/{}", slot_prefix.trim_end_matches('/'), rel);
        match fs::read(entry.path()) {
            Ok(payload) => record.add_file(slot, payload),
            Err(err) => record.push_finding(Finding::new(unit, slot, err.to_string())),
        }
    }
}

/// Run an external probe and return its non-empty output lines, sorted for
/// deterministic snapshots. A failing probe becomes a finding.
pub(crate) fn fact_lines(
    ctx: &ExecutionContext,
    record: &mut CaptureRecord,
    unit: UnitName,
    item: &str,
    program: &str,
    args: &[&str],
) -> Option<Vec<String>> {
    match ctx.runner.run(program, args) {
        Ok(out) if out.success() => {
            let mut lines = out.lines();
            lines.sort();
            lines.dedup();
            Some(lines)
        }
        Ok(out) => {
            record.push_finding(Finding::new(
                unit,
                item,
                format!("{program} exited with status {}: {}", out.status, out.stderr.trim()),
            ));
            None
        }
        Err(err) => {
            record.push_finding(Finding::new(unit, item, err.to_string()));
            None
        }
    }
}

/// Sorted names of the entries directly under a declared directory.
pub(crate) fn list_dir_names(path: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(path)
        .into_iter()
        .flatten()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
