// src/capture/desktop.rs

//! Desktop unit: shell settings, extensions, and theme inventory.
//!
//! Settings are captured as a full dconf dump (GNOME) so they can be loaded
//! verbatim on the target. Binary theme and icon assets are inventoried by
//! name only - presence, not payload.

use super::{list_dir_names, read_file_slot};
use crate::context::ExecutionContext;
use crate::probe::DesktopShell;
use crate::snapshot::{CaptureRecord, Finding, UnitName};
use crate::Result;

const UNIT: UnitName = UnitName::Desktop;

/// Where the dconf dump is placed on the target before loading.
pub const DCONF_SLOT: &str = "~/.config/rehome/dconf.ini";

const GTK_SLOTS: &[&str] = &[
    "~/.config/gtk-3.0/settings.ini",
    "~/.config/gtk-4.0/settings.ini",
];

pub fn capture(ctx: &ExecutionContext) -> Result<CaptureRecord> {
    let mut record = CaptureRecord::new();
    let Some(shell) = ctx.caps.desktop_shell else {
        return Ok(record);
    };
    record.set_fact("shell", shell);

    if shell == DesktopShell::Gnome {
        // The dump payload travels as a file; the fact holds the slot the
        // target loads it from.
        match ctx.runner.run("dconf", &["dump", "/"]) {
            Ok(out) if out.success() => {
                record.add_file(DCONF_SLOT, out.stdout.into_bytes());
                record.set_fact("dconf_dump", DCONF_SLOT);
            }
            Ok(out) => record.push_finding(Finding::new(
                UNIT,
                "dconf_dump",
                format!("dconf exited with status {}", out.status),
            )),
            Err(err) => record.push_finding(Finding::new(UNIT, "dconf_dump", err.to_string())),
        }

        let extensions = list_dir_names(&ctx.home_path(".local/share/gnome-shell/extensions"));
        if !extensions.is_empty() {
            record.set_fact("gnome_extensions", extensions);
        }
    }

    for slot in GTK_SLOTS {
        read_file_slot(ctx, &mut record, UNIT, slot);
    }

    // Theme and icon assets are binary; inventory names only.
    let mut themes = list_dir_names(&ctx.home_path(".themes"));
    themes.extend(list_dir_names(&ctx.home_path(".local/share/themes")));
    themes.sort();
    themes.dedup();
    if !themes.is_empty() {
        record.set_fact("themes", &themes);
        record.push_finding(Finding::new(
            UNIT,
            "themes",
            format!("binary theme assets not copied: {}", themes.join(", ")),
        ));
    }
    let mut icons = list_dir_names(&ctx.home_path(".icons"));
    icons.extend(list_dir_names(&ctx.home_path(".local/share/icons")));
    icons.sort();
    icons.dedup();
    if !icons.is_empty() {
        record.set_fact("icons", &icons);
        record.push_finding(Finding::new(
            UNIT,
            "icons",
            format!("binary icon assets not copied: {}", icons.join(", ")),
        ));
    }

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::FakeRunner;
    use crate::probe::CapabilitySet;
    use std::fs;
    use std::sync::Arc;

    #[test]
    fn gnome_settings_and_theme_inventory() {
        let tmp = tempfile::tempdir().unwrap();
        let home = tmp.path().join("home/alice");
        fs::create_dir_all(home.join(".themes/Adwaita-dark")).unwrap();
        fs::create_dir_all(home.join(".local/share/gnome-shell/extensions/dash-to-dock@micxgx.gmail.com"))
            .unwrap();

        let runner = FakeRunner::default()
            .with_output("dconf dump /", "[org/gnome/desktop/interface]\nclock-show-seconds=true\n");
        let mut ctx = ExecutionContext::new(
            tmp.path(),
            "/home/alice",
            "alice",
            "workstation",
            Arc::new(runner),
        );
        ctx.caps = CapabilitySet {
            desktop_shell: Some(DesktopShell::Gnome),
            ..CapabilitySet::default()
        };

        let record = capture(&ctx).unwrap();
        assert_eq!(record.facts["dconf_dump"], serde_json::json!(DCONF_SLOT));
        assert!(String::from_utf8_lossy(&record.files[DCONF_SLOT]).contains("clock-show-seconds"));
        assert_eq!(
            record.facts["gnome_extensions"],
            serde_json::json!(["dash-to-dock@micxgx.gmail.com"])
        );
        assert_eq!(record.facts["themes"], serde_json::json!(["Adwaita-dark"]));
        assert!(record.findings.iter().any(|f| f.id == "desktop:themes"));
    }

    #[test]
    fn no_desktop_shell_means_empty_record() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = ExecutionContext::new(
            tmp.path(),
            "/home/alice",
            "alice",
            "workstation",
            Arc::new(FakeRunner::default()),
        );
        let record = capture(&ctx).unwrap();
        assert!(record.is_empty());
    }
}
