// src/capture/audio.rs

//! Audio unit: audio stack configuration under the user's home.
//!
//! Only runs when the probe found an audio stack; its actions carry the
//! `audio` precondition so a target without one skips them.

use super::read_tree;
use crate::context::ExecutionContext;
use crate::snapshot::{CaptureRecord, UnitName};
use crate::Result;

const UNIT: UnitName = UnitName::Audio;

const TREE_SLOTS: &[&str] = &[
    "~/.config/pipewire",
    "~/.config/wireplumber",
    "~/.config/easyeffects",
    "~/.config/pulse",
];

pub fn capture(ctx: &ExecutionContext) -> Result<CaptureRecord> {
    let mut record = CaptureRecord::new();
    let Some(stack) = ctx.caps.audio else {
        return Ok(record);
    };
    record.set_fact("stack", stack);

    for slot in TREE_SLOTS {
        read_tree(ctx, &mut record, UNIT, slot);
    }

    Ok(record)
}
