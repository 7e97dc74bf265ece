// src/capture/packages.rs

//! Package unit: the explicitly installed package set.
//!
//! Captures the user-installed package list for the detected package
//! manager variant. The "removed default packages" question (group
//! membership differs across OS point releases) is deliberately a
//! best-effort finding, never a hard error.

use tracing::debug;

use super::fact_lines;
use crate::context::ExecutionContext;
use crate::probe::PackageManagerKind;
use crate::snapshot::{CaptureRecord, Finding, UnitName};
use crate::Result;

const UNIT: UnitName = UnitName::Package;

pub fn capture(ctx: &ExecutionContext) -> Result<CaptureRecord> {
    let mut record = CaptureRecord::new();
    let Some(pm) = ctx.caps.package_manager else {
        debug!("no supported package manager; package unit empty");
        return Ok(record);
    };

    let (program, args): (&str, &[&str]) = match pm {
        PackageManagerKind::Dnf => ("dnf", &["repoquery", "--userinstalled", "--qf", "%{name}"]),
        PackageManagerKind::Apt => ("apt-mark", &["showmanual"]),
        PackageManagerKind::Pacman => ("pacman", &["-Qeq"]),
        PackageManagerKind::Zypper => ("zypper", &["--quiet", "packages", "--userinstalled"]),
    };
    if let Some(packages) = fact_lines(ctx, &mut record, UNIT, "user_installed", program, args) {
        record.set_fact("user_installed", packages);
    }

    if pm == PackageManagerKind::Dnf {
        if let Some(groups) = fact_lines(
            ctx,
            &mut record,
            UNIT,
            "installed_groups",
            "dnf",
            &["group", "list", "--installed", "--quiet"],
        ) {
            if !groups.is_empty() {
                record.set_fact("installed_groups", &groups);
                // Group membership changes across point releases, so removed
                // defaults cannot be re-derived mechanically on the target.
                record.push_finding(Finding::new(
                    UNIT,
                    "removed_defaults",
                    "packages removed from installed groups cannot be re-derived across OS releases; review removals manually",
                ));
            }
        }
    }

    Ok(record)
}
