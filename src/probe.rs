// src/probe.rs

//! Capability probe.
//!
//! Detects which optional subsystems are present on the running machine:
//! package manager variant, desktop shell, display server, audio stack,
//! version managers, and whether the process is privileged. The probe is a
//! pure read and never fails the run - an absent capability is a normal
//! value, not an error. Both capture and reconciliation condition on its
//! output to skip irrelevant units and actions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use strum_macros::{Display, EnumIter, EnumString};
use tracing::debug;

use crate::context::CommandRunner;

/// Package manager families the pipeline knows how to drive.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PackageManagerKind {
    Dnf,
    Apt,
    Pacman,
    Zypper,
}

impl PackageManagerKind {
    /// Binary whose presence identifies this variant.
    pub fn binary(&self) -> &'static str {
        match self {
            Self::Dnf => "dnf",
            Self::Apt => "apt-get",
            Self::Pacman => "pacman",
            Self::Zypper => "zypper",
        }
    }
}

/// Desktop shells with capture/reconcile support.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DesktopShell {
    Gnome,
    Plasma,
    Xfce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DisplayServer {
    Wayland,
    X11,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AudioStack {
    Pipewire,
    Pulseaudio,
}

/// Per-language version managers detected on the source machine.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum VersionManager {
    Rustup,
    Nvm,
    Pyenv,
    Sdkman,
}

impl VersionManager {
    /// Helper binary, if the manager installs one.
    pub fn binary(&self) -> Option<&'static str> {
        match self {
            Self::Rustup => Some("rustup"),
            Self::Pyenv => Some("pyenv"),
            // nvm and sdkman are shell functions; detected by home directory.
            Self::Nvm | Self::Sdkman => None,
        }
    }

    /// Home-relative directory whose presence identifies the manager.
    pub fn home_marker(&self) -> &'static str {
        match self {
            Self::Rustup => ".rustup",
            Self::Nvm => ".nvm",
            Self::Pyenv => ".pyenv",
            Self::Sdkman => ".sdkman",
        }
    }
}

/// Everything the probe learned about one machine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySet {
    pub package_manager: Option<PackageManagerKind>,
    pub desktop_shell: Option<DesktopShell>,
    pub desktop_shell_version: Option<String>,
    pub display_server: Option<DisplayServer>,
    pub audio: Option<AudioStack>,
    pub version_managers: BTreeSet<VersionManager>,
    /// Whether the process can mutate system-level state.
    pub privileged: bool,
}

impl CapabilitySet {
    /// Evaluate an action precondition against this set.
    pub fn has(&self, cap: &Capability) -> bool {
        match cap {
            Capability::PackageManager => self.package_manager.is_some(),
            Capability::DesktopShell => self.desktop_shell.is_some(),
            Capability::Audio => self.audio.is_some(),
            Capability::Privileged => self.privileged,
            Capability::VersionManager(vm) => self.version_managers.contains(vm),
        }
    }
}

/// A precondition a convergence action may declare.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Capability {
    PackageManager,
    DesktopShell,
    Audio,
    Privileged,
    VersionManager(VersionManager),
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PackageManager => write!(f, "package-manager"),
            Self::DesktopShell => write!(f, "desktop-shell"),
            Self::Audio => write!(f, "audio"),
            Self::Privileged => write!(f, "privileged"),
            Self::VersionManager(vm) => write!(f, "version-manager:{vm}"),
        }
    }
}

impl std::str::FromStr for Capability {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "package-manager" => Ok(Self::PackageManager),
            "desktop-shell" => Ok(Self::DesktopShell),
            "audio" => Ok(Self::Audio),
            "privileged" => Ok(Self::Privileged),
            other => match other.strip_prefix("version-manager:") {
                Some(vm) => vm
                    .parse()
                    .map(Self::VersionManager)
                    .map_err(|_| crate::Error::Other(format!("unknown capability '{other}'"))),
                None => Err(crate::Error::Other(format!("unknown capability '{other}'"))),
            },
        }
    }
}

impl From<Capability> for String {
    fn from(c: Capability) -> String {
        c.to_string()
    }
}

impl TryFrom<String> for Capability {
    type Error = crate::Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Probe the machine under `root` for optional subsystems.
///
/// Pure read; individual detections that go wrong simply leave their
/// capability absent.
pub fn probe(root: &Path, home: &Path, runner: &dyn CommandRunner) -> CapabilitySet {
    use strum::IntoEnumIterator;

    let mut caps = CapabilitySet::default();

    caps.package_manager =
        PackageManagerKind::iter().find(|pm| runner.has_binary(pm.binary()));

    if runner.has_binary("gnome-shell") {
        caps.desktop_shell = Some(DesktopShell::Gnome);
        caps.desktop_shell_version = runner
            .run("gnome-shell", &["--version"])
            .ok()
            .filter(|o| o.success())
            // "GNOME Shell 47.2" -> "47.2"
            .and_then(|o| o.stdout.split_whitespace().last().map(String::from));
    } else if runner.has_binary("plasmashell") {
        caps.desktop_shell = Some(DesktopShell::Plasma);
        caps.desktop_shell_version = runner
            .run("plasmashell", &["--version"])
            .ok()
            .filter(|o| o.success())
            .and_then(|o| o.stdout.split_whitespace().last().map(String::from));
    } else if runner.has_binary("xfce4-session") {
        caps.desktop_shell = Some(DesktopShell::Xfce);
    }

    // Session type comes from logind, not ambient environment variables.
    if runner.has_binary("loginctl")
        && let Ok(out) = runner.run("loginctl", &["show-session", "self", "-p", "Type", "--value"])
        && out.success()
    {
        caps.display_server = match out.stdout.trim() {
            "wayland" => Some(DisplayServer::Wayland),
            "x11" => Some(DisplayServer::X11),
            _ => None,
        };
    }

    if runner.has_binary("pipewire") {
        caps.audio = Some(AudioStack::Pipewire);
    } else if runner.has_binary("pulseaudio") {
        caps.audio = Some(AudioStack::Pulseaudio);
    }

    let rebase_home = |marker: &str| {
        let abs = home.join(marker);
        match abs.strip_prefix("/") {
            Ok(rel) => root.join(rel),
            Err(_) => root.join(&abs),
        }
    };
    for vm in VersionManager::iter() {
        let by_binary = vm.binary().is_some_and(|b| runner.has_binary(b));
        if by_binary || rebase_home(vm.home_marker()).is_dir() {
            caps.version_managers.insert(vm);
        }
    }

    if let Ok(out) = runner.run("id", &["-u"]) {
        caps.privileged = out.success() && out.stdout.trim() == "0";
    }

    debug!(?caps, "capability probe complete");
    caps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::FakeRunner;
    use std::fs;

    #[test]
    fn absent_capabilities_are_values_not_errors() {
        let runner = FakeRunner::default();
        let caps = probe(Path::new("/nonexistent"), Path::new("/home/alice"), &runner);
        assert_eq!(caps.package_manager, None);
        assert_eq!(caps.desktop_shell, None);
        assert!(caps.version_managers.is_empty());
        assert!(!caps.privileged);
    }

    #[test]
    fn detects_dnf_gnome_pipewire() {
        let runner = FakeRunner::default()
            .with_binary("dnf")
            .with_binary("gnome-shell")
            .with_binary("pipewire")
            .with_binary("loginctl")
            .with_output("gnome-shell --version", "GNOME Shell 47.2\n")
            .with_output("loginctl show-session self -p Type --value", "wayland\n")
            .with_output("id -u", "1000\n");
        let caps = probe(Path::new("/nonexistent"), Path::new("/home/alice"), &runner);
        assert_eq!(caps.package_manager, Some(PackageManagerKind::Dnf));
        assert_eq!(caps.desktop_shell, Some(DesktopShell::Gnome));
        assert_eq!(caps.desktop_shell_version.as_deref(), Some("47.2"));
        assert_eq!(caps.display_server, Some(DisplayServer::Wayland));
        assert_eq!(caps.audio, Some(AudioStack::Pipewire));
        assert!(!caps.privileged);
    }

    #[test]
    fn version_managers_detected_by_home_marker() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("home/alice/.nvm")).unwrap();
        let runner = FakeRunner::default();
        let caps = probe(tmp.path(), Path::new("/home/alice"), &runner);
        assert!(caps.version_managers.contains(&VersionManager::Nvm));
        assert!(!caps.version_managers.contains(&VersionManager::Pyenv));
    }

    #[test]
    fn capability_string_round_trip() {
        for cap in [
            Capability::PackageManager,
            Capability::Audio,
            Capability::Privileged,
            Capability::VersionManager(VersionManager::Rustup),
        ] {
            let s = cap.to_string();
            assert_eq!(s.parse::<Capability>().unwrap(), cap);
        }
        assert!("version-manager:gvm".parse::<Capability>().is_err());
    }
}
