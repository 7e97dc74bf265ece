// src/capture/thirdparty.rs

//! Thirdparty unit: software installed outside the OS package manager.
//!
//! Flatpak applications and remotes are re-installable mechanically; opaque
//! binaries under `~/.local/bin` are copied verbatim.

use super::{fact_lines, read_tree};
use crate::context::ExecutionContext;
use crate::snapshot::{CaptureRecord, UnitName};
use crate::Result;

const UNIT: UnitName = UnitName::Thirdparty;

pub fn capture(ctx: &ExecutionContext) -> Result<CaptureRecord> {
    let mut record = CaptureRecord::new();

    if ctx.runner.has_binary("flatpak") {
        if let Some(remotes) = fact_lines(
            ctx,
            &mut record,
            UNIT,
            "flatpak_remotes",
            "flatpak",
            &["remotes", "--columns=name,url"],
        ) {
            record.set_fact("flatpak_remotes", remotes);
        }
        if let Some(apps) = fact_lines(
            ctx,
            &mut record,
            UNIT,
            "flatpak_apps",
            "flatpak",
            &["list", "--app", "--columns=application"],
        ) {
            record.set_fact("flatpak_apps", apps);
        }
    }

    read_tree(ctx, &mut record, UNIT, "~/.local/bin");

    Ok(record)
}
