// src/capture/system.rs

//! System unit: enabled services, kernel parameters, and privileged
//! configuration drop-ins.
//!
//! `/etc/sudoers.d` is in the declared read set; when capture runs
//! unprivileged those entries surface as permission-denied findings, which
//! the escalator turns into manual steps.

use std::collections::BTreeMap;

use super::{fact_lines, read_tree};
use crate::context::ExecutionContext;
use crate::snapshot::{CaptureRecord, UnitName};
use crate::Result;

const UNIT: UnitName = UnitName::System;

const TREE_SLOTS: &[&str] = &[
    "/etc/sysctl.d",
    "/etc/sudoers.d",
    "/etc/systemd/system/getty@tty1.service.d",
];

pub fn capture(ctx: &ExecutionContext) -> Result<CaptureRecord> {
    let mut record = CaptureRecord::new();

    if let Some(services) = fact_lines(
        ctx,
        &mut record,
        UNIT,
        "enabled_services",
        "systemctl",
        &[
            "list-unit-files",
            "--state=enabled",
            "--type=service",
            "--no-legend",
        ],
    ) {
        let names: Vec<String> = services
            .iter()
            .filter_map(|l| l.split_whitespace().next())
            .map(String::from)
            .collect();
        record.set_fact("enabled_services", names);
    }

    for slot in TREE_SLOTS {
        read_tree(ctx, &mut record, UNIT, slot);
    }

    // Parse sysctl drop-ins into one key -> value table so each parameter
    // reconciles independently.
    let mut sysctl: BTreeMap<String, String> = BTreeMap::new();
    for (slot, payload) in &record.files {
        if !slot.starts_with("/etc/sysctl.d/") {
            continue;
        }
        let text = String::from_utf8_lossy(payload);
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                sysctl.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
    }
    if !sysctl.is_empty() {
        record.set_fact("sysctl", sysctl);
    }

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::FakeRunner;
    use std::fs;
    use std::sync::Arc;

    #[test]
    fn services_and_sysctl_parsed() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("etc/sysctl.d")).unwrap();
        fs::write(
            tmp.path().join("etc/sysctl.d/99-custom.conf"),
            b"# inotify headroom\nfs.inotify.max_user_watches = 524288\nvm.swappiness=10\n",
        )
        .unwrap();

        let runner = FakeRunner::default().with_output(
            "systemctl list-unit-files --state=enabled --type=service --no-legend",
            "sshd.service            enabled enabled\nsyncthing.service       enabled enabled\n",
        );
        let ctx = ExecutionContext::new(
            tmp.path(),
            "/home/alice",
            "alice",
            "workstation",
            Arc::new(runner),
        );

        let record = capture(&ctx).unwrap();
        assert_eq!(
            record.facts["enabled_services"],
            serde_json::json!(["sshd.service", "syncthing.service"])
        );
        assert_eq!(
            record.facts["sysctl"],
            serde_json::json!({
                "fs.inotify.max_user_watches": "524288",
                "vm.swappiness": "10"
            })
        );
        assert!(record.files.contains_key("/etc/sysctl.d/99-custom.conf"));
    }
}
