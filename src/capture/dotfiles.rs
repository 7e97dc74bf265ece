// src/capture/dotfiles.rs

//! Dotfile unit: application configuration under the user's home.
//!
//! Reads only an explicit allow-list of locations - never an open-ended
//! walk of the home directory - to bound run time and avoid capturing
//! unrelated sensitive data. The allow-list mixes single files and glob
//! patterns rooted in the home directory.

use glob::glob;

use super::read_file_slot;
use crate::context::ExecutionContext;
use crate::snapshot::{CaptureRecord, Finding, UnitName};
use crate::Result;

const UNIT: UnitName = UnitName::Dotfile;

/// Single-file slots.
const FILE_SLOTS: &[&str] = &[
    "~/.gitconfig",
    "~/.gitignore_global",
    "~/.tmux.conf",
    "~/.editorconfig",
    "~/.ssh/config",
    "~/.config/starship.toml",
];

/// Glob patterns, home-relative. Matches are captured recursively.
const GLOB_SLOTS: &[&str] = &[
    ".config/nvim/**/*",
    ".config/alacritty/**/*",
    ".config/kitty/**/*",
    ".config/tmux/**/*",
    ".config/git/**/*",
    ".config/helix/**/*",
];

pub fn capture(ctx: &ExecutionContext) -> Result<CaptureRecord> {
    let mut record = CaptureRecord::new();

    for slot in FILE_SLOTS {
        read_file_slot(ctx, &mut record, UNIT, slot);
    }

    for pattern in GLOB_SLOTS {
        let rooted = ctx.home_path("").join(pattern);
        let Some(rooted) = rooted.to_str().map(String::from) else {
            continue;
        };
        let paths = match glob(&rooted) {
            Ok(paths) => paths,
            Err(err) => {
                record.push_finding(Finding::new(UNIT, *pattern, err.to_string()));
                continue;
            }
        };
        let home_root = ctx.home_path("");
        for path in paths {
            let path = match path {
                Ok(p) => p,
                Err(err) => {
                    record.push_finding(Finding::new(UNIT, *pattern, err.to_string()));
                    continue;
                }
            };
            if !path.is_file() {
                continue;
            }
            let Ok(rel) = path.strip_prefix(&home_root) else {
                continue;
            };
            let slot = format!("~/{}", rel.to_string_lossy());
            match std::fs::read(&path) {
                Ok(payload) => record.add_file(slot, payload),
                Err(err) => record.push_finding(Finding::new(UNIT, slot, err.to_string())),
            }
        }
    }

    Ok(record)
}
