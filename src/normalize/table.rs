// src/normalize/table.rs

//! The fixed fact-to-action lookup table.
//!
//! Each CaptureRecord fact key maps to exactly one convergence action kind
//! through one table entry. Adding a new capturable fact means adding a new
//! entry here, never new control flow in the engine. Facts that exist only
//! to inform a human (device inventory, theme names) have entries that
//! build no actions; a fact key with no entry at all is a schema violation.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::capture::shell::PluginManager;
use crate::model::{ActionKind, ConvergenceAction, Role};
use crate::probe::{Capability, VersionManager};
use crate::snapshot::UnitName;

type BuildResult = Result<Vec<ConvergenceAction>, String>;

pub(crate) struct Rule {
    pub unit: UnitName,
    pub key: &'static str,
    pub role: Role,
    pub build: fn(&Value) -> BuildResult,
}

pub(crate) fn rule_for(unit: UnitName, key: &str) -> Option<&'static Rule> {
    RULES.iter().find(|r| r.unit == unit && r.key == key)
}

macro_rules! rule {
    ($unit:ident, $key:literal, $role:ident, $build:expr) => {
        Rule {
            unit: UnitName::$unit,
            key: $key,
            role: Role::$role,
            build: $build,
        }
    };
}

pub(crate) static RULES: &[Rule] = &[
    rule!(Package, "user_installed", Packages, build_package_set),
    rule!(Package, "installed_groups", Packages, build_nothing),
    rule!(Repo, "enabled", Repos, build_repos_enabled),
    rule!(Shell, "login_shell", Shell, build_login_shell),
    rule!(Shell, "plugin_manager", Shell, build_plugin_manager),
    rule!(Desktop, "shell", Desktop, build_nothing),
    rule!(Desktop, "dconf_dump", Desktop, build_dconf_load),
    rule!(Desktop, "gnome_extensions", Desktop, build_gnome_extensions),
    rule!(Desktop, "themes", Desktop, build_nothing),
    rule!(Desktop, "icons", Desktop, build_nothing),
    rule!(System, "enabled_services", System, build_services),
    rule!(System, "sysctl", System, build_sysctl),
    rule!(Devtool, "version_managers", Devtools, build_version_managers),
    rule!(Devtool, "rustup_toolchains", Devtools, build_rustup_toolchains),
    rule!(Devtool, "pyenv_versions", Devtools, build_pyenv_versions),
    rule!(Devtool, "nvm_node_versions", Devtools, build_nvm_versions),
    rule!(Devtool, "sdkman_candidates", Devtools, build_sdkman_candidates),
    rule!(Devtool, "container_tools", Devtools, build_package_set),
    rule!(Audio, "stack", Audio, build_nothing),
    rule!(Thirdparty, "flatpak_remotes", Thirdparty, build_flatpak_remotes),
    rule!(Thirdparty, "flatpak_apps", Thirdparty, build_flatpak_apps),
    rule!(Hardware, "pci", Hardware, build_nothing),
    rule!(Hardware, "usb", Hardware, build_nothing),
    rule!(Hardware, "gpu_driver", Hardware, build_nothing),
];

fn as_string_array(value: &Value) -> Result<Vec<String>, String> {
    value
        .as_array()
        .ok_or_else(|| "expected array of strings".to_string())?
        .iter()
        .map(|v| {
            v.as_str()
                .map(String::from)
                .ok_or_else(|| "expected array of strings".to_string())
        })
        .collect()
}

fn as_string(value: &Value) -> Result<String, String> {
    value
        .as_str()
        .map(String::from)
        .ok_or_else(|| "expected string".to_string())
}

fn as_string_map(value: &Value) -> Result<BTreeMap<String, String>, String> {
    value
        .as_object()
        .ok_or_else(|| "expected table of strings".to_string())?
        .iter()
        .map(|(k, v)| {
            v.as_str()
                .map(|s| (k.clone(), s.to_string()))
                .ok_or_else(|| "expected table of strings".to_string())
        })
        .collect()
}

fn build_nothing(_value: &Value) -> BuildResult {
    Ok(Vec::new())
}

fn build_package_set(value: &Value) -> BuildResult {
    Ok(as_string_array(value)?
        .into_iter()
        .map(|package| {
            ConvergenceAction::new(
                package.clone(),
                ActionKind::EnsurePackageSet {
                    packages: vec![package],
                },
            )
            .with_precondition(Capability::PackageManager)
        })
        .collect())
}

fn build_repos_enabled(value: &Value) -> BuildResult {
    Ok(as_string_array(value)?
        .into_iter()
        .map(|repo| {
            ConvergenceAction::new(repo.clone(), ActionKind::EnsureRepoEnabled { repo })
                .with_precondition(Capability::PackageManager)
        })
        .collect())
}

fn build_login_shell(value: &Value) -> BuildResult {
    let shell = as_string(value)?;
    Ok(vec![ConvergenceAction::new(
        shell.clone(),
        ActionKind::RunIdempotentCommand {
            command: format!("chsh -s {shell}"),
            check: format!("getent passwd \"$LOGNAME\" | grep -q ':{shell}$'"),
        },
    )])
}

fn build_plugin_manager(value: &Value) -> BuildResult {
    let name = as_string(value)?;
    let pm: PluginManager = name
        .parse()
        .map_err(|_| format!("unknown plugin manager '{name}'"))?;
    Ok(vec![ConvergenceAction::new(
        name,
        ActionKind::RunIdempotentCommand {
            command: pm.install_command().to_string(),
            check: pm.check_command(),
        },
    )])
}

fn build_dconf_load(value: &Value) -> BuildResult {
    let slot = as_string(value)?;
    Ok(vec![ConvergenceAction::new(
        slot.clone(),
        ActionKind::RunIdempotentCommand {
            command: format!("dconf load / < {slot}"),
            // The staged dump file doubles as the convergence witness.
            check: format!("dconf dump / | cmp -s - {slot}"),
        },
    )
    .with_precondition(Capability::DesktopShell)])
}

fn build_gnome_extensions(value: &Value) -> BuildResult {
    Ok(as_string_array(value)?
        .into_iter()
        .map(|ext| {
            ConvergenceAction::new(
                ext.clone(),
                ActionKind::ManualOnly {
                    description: format!(
                        "install GNOME Shell extension '{ext}' from extensions.gnome.org"
                    ),
                    suggested_command: Some(format!("gnome-extensions enable {ext}")),
                },
            )
            .with_precondition(Capability::DesktopShell)
        })
        .collect())
}

fn build_services(value: &Value) -> BuildResult {
    Ok(as_string_array(value)?
        .into_iter()
        .map(|service| {
            ConvergenceAction::new(
                service.clone(),
                ActionKind::EnsureServiceState {
                    service,
                    enabled: true,
                },
            )
            .with_precondition(Capability::Privileged)
        })
        .collect())
}

fn build_sysctl(value: &Value) -> BuildResult {
    Ok(as_string_map(value)?
        .into_iter()
        .map(|(key, value)| {
            ConvergenceAction::new(key.clone(), ActionKind::EnsureSysctlValue { key, value })
                .with_precondition(Capability::Privileged)
        })
        .collect())
}

fn build_version_managers(value: &Value) -> BuildResult {
    as_string_array(value)?
        .into_iter()
        .map(|name| {
            let vm: VersionManager = name
                .parse()
                .map_err(|_| format!("unknown version manager '{name}'"))?;
            let command = match vm {
                VersionManager::Rustup => {
                    "curl --proto '=https' --tlsv1.2 -sSf https://sh.rustup.rs | sh -s -- -y"
                }
                VersionManager::Nvm => {
                    "curl -o- https://raw.githubusercontent.com/nvm-sh/nvm/v0.40.1/install.sh | bash"
                }
                VersionManager::Pyenv => "curl -fsSL https://pyenv.run | bash",
                VersionManager::Sdkman => "curl -s https://get.sdkman.io | bash",
            };
            Ok(ConvergenceAction::new(
                name,
                ActionKind::RunIdempotentCommand {
                    command: command.to_string(),
                    check: format!("test -e ~/{}", vm.home_marker()),
                },
            ))
        })
        .collect()
}

fn build_rustup_toolchains(value: &Value) -> BuildResult {
    Ok(as_string_array(value)?
        .into_iter()
        .map(|tc| {
            ConvergenceAction::new(
                tc.clone(),
                ActionKind::RunIdempotentCommand {
                    command: format!("rustup toolchain install {tc}"),
                    check: format!("rustup toolchain list | grep -q '^{tc}'"),
                },
            )
            .with_precondition(Capability::VersionManager(VersionManager::Rustup))
        })
        .collect())
}

fn build_pyenv_versions(value: &Value) -> BuildResult {
    Ok(as_string_array(value)?
        .into_iter()
        .map(|v| {
            ConvergenceAction::new(
                v.clone(),
                ActionKind::RunIdempotentCommand {
                    command: format!("pyenv install -s {v}"),
                    check: format!("pyenv versions --bare | grep -qx '{v}'"),
                },
            )
            .with_precondition(Capability::VersionManager(VersionManager::Pyenv))
        })
        .collect())
}

fn build_nvm_versions(value: &Value) -> BuildResult {
    Ok(as_string_array(value)?
        .into_iter()
        .map(|v| {
            ConvergenceAction::new(
                v.clone(),
                ActionKind::RunIdempotentCommand {
                    command: format!("bash -lc 'nvm install {v}'"),
                    check: format!("test -d ~/.nvm/versions/node/{v}"),
                },
            )
            .with_precondition(Capability::VersionManager(VersionManager::Nvm))
        })
        .collect())
}

fn build_sdkman_candidates(value: &Value) -> BuildResult {
    Ok(as_string_array(value)?
        .into_iter()
        .map(|candidate| {
            ConvergenceAction::new(
                candidate.clone(),
                ActionKind::ManualOnly {
                    description: format!("reinstall SDKMAN candidate '{candidate}'"),
                    suggested_command: Some(format!("sdk install {candidate}")),
                },
            )
        })
        .collect())
}

fn build_flatpak_remotes(value: &Value) -> BuildResult {
    as_string_array(value)?
        .into_iter()
        .map(|line| {
            let mut parts = line.split_whitespace();
            let (Some(name), Some(url)) = (parts.next(), parts.next()) else {
                return Err(format!("expected 'name url' pair, got '{line}'"));
            };
            Ok(ConvergenceAction::new(
                name.to_string(),
                ActionKind::RunIdempotentCommand {
                    command: format!("flatpak remote-add --if-not-exists {name} {url}"),
                    check: format!("flatpak remotes --columns=name | grep -qx {name}"),
                },
            ))
        })
        .collect()
}

fn build_flatpak_apps(value: &Value) -> BuildResult {
    Ok(as_string_array(value)?
        .into_iter()
        .map(|app| {
            ConvergenceAction::new(
                app.clone(),
                ActionKind::RunIdempotentCommand {
                    command: format!("flatpak install -y --noninteractive {app}"),
                    check: format!("flatpak info {app}"),
                },
            )
        })
        .collect())
}
