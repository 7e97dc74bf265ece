// src/capture/repos.rs

//! Repo unit: enabled package repositories and their definition files.

use super::{fact_lines, read_file_slot, read_tree};
use crate::context::ExecutionContext;
use crate::probe::PackageManagerKind;
use crate::snapshot::{CaptureRecord, UnitName};
use crate::Result;

const UNIT: UnitName = UnitName::Repo;

pub fn capture(ctx: &ExecutionContext) -> Result<CaptureRecord> {
    let mut record = CaptureRecord::new();
    let Some(pm) = ctx.caps.package_manager else {
        return Ok(record);
    };

    match pm {
        PackageManagerKind::Dnf => {
            read_tree(ctx, &mut record, UNIT, "/etc/yum.repos.d");
            if let Some(enabled) = fact_lines(
                ctx,
                &mut record,
                UNIT,
                "enabled",
                "dnf",
                &["repolist", "--enabled", "--quiet"],
            ) {
                // First column is the repo id; drop the header line.
                let ids: Vec<String> = enabled
                    .iter()
                    .filter(|l| !l.starts_with("repo id"))
                    .filter_map(|l| l.split_whitespace().next())
                    .map(String::from)
                    .collect();
                record.set_fact("enabled", ids);
            }
        }
        PackageManagerKind::Apt => {
            read_file_slot(ctx, &mut record, UNIT, "/etc/apt/sources.list");
            read_tree(ctx, &mut record, UNIT, "/etc/apt/sources.list.d");
            let enabled: Vec<String> = record
                .files
                .keys()
                .map(|slot| slot.rsplit('/').next().unwrap_or(slot).to_string())
                .collect();
            record.set_fact("enabled", enabled);
        }
        PackageManagerKind::Pacman => {
            read_file_slot(ctx, &mut record, UNIT, "/etc/pacman.conf");
            read_tree(ctx, &mut record, UNIT, "/etc/pacman.d");
            record.set_fact("enabled", Vec::<String>::new());
        }
        PackageManagerKind::Zypper => {
            read_tree(ctx, &mut record, UNIT, "/etc/zypp/repos.d");
            let enabled: Vec<String> = record
                .files
                .keys()
                .filter_map(|slot| slot.rsplit('/').next())
                .filter_map(|name| name.strip_suffix(".repo"))
                .map(String::from)
                .collect();
            record.set_fact("enabled", enabled);
        }
    }

    Ok(record)
}
