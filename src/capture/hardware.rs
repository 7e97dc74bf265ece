// src/capture/hardware.rs

//! Hardware unit: device inventory and hardware-adjacent configuration.
//!
//! Inventory facts are informational; the parts that need privileged or
//! vendor-specific work (proprietary GPU drivers) become findings that
//! escalate to manual steps.

use super::{fact_lines, read_tree};
use crate::context::ExecutionContext;
use crate::snapshot::{CaptureRecord, Finding, UnitName};
use crate::Result;

const UNIT: UnitName = UnitName::Hardware;

const TREE_SLOTS: &[&str] = &["/etc/modules-load.d", "/etc/udev/rules.d"];

pub fn capture(ctx: &ExecutionContext) -> Result<CaptureRecord> {
    let mut record = CaptureRecord::new();

    if ctx.runner.has_binary("lspci") {
        if let Some(devices) = fact_lines(ctx, &mut record, UNIT, "pci", "lspci", &[]) {
            record.set_fact("pci", devices);
        }
    }
    if ctx.runner.has_binary("lsusb") {
        if let Some(devices) = fact_lines(ctx, &mut record, UNIT, "usb", "lsusb", &[]) {
            record.set_fact("usb", devices);
        }
    }

    if ctx.runner.has_binary("nvidia-smi") {
        record.set_fact("gpu_driver", "nvidia");
        record.push_finding(Finding::new(
            UNIT,
            "nvidia-driver",
            "proprietary NVIDIA driver detected; install it on the target before relying on the GPU",
        ));
    }

    for slot in TREE_SLOTS {
        read_tree(ctx, &mut record, UNIT, slot);
    }

    Ok(record)
}
