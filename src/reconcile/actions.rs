// src/reconcile/actions.rs

//! Per-action decision and mutation.
//!
//! [`decide`] observes the host read-only and reports whether an action
//! would change anything; [`perform`] carries the mutation out. Dry-run,
//! apply, and verify all route through the same [`decide`], so a dry run can
//! never diverge from what a real apply would conclude.

use crate::model::{ActionKind, BlobSource, ConvergenceAction};

use super::host::{Host, HostError, HostResult};

/// What [`decide`] concluded about one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Desired state already holds.
    Unchanged,
    /// A mutation is needed; the string summarizes it for reports.
    Change(String),
}

/// Observe the host and decide whether `action` needs to run. Read-only.
///
/// `ManualOnly` never reaches this function; callers divert it to the
/// manual-step path first.
pub fn decide(
    action: &ConvergenceAction,
    host: &dyn Host,
) -> HostResult<Decision> {
    match &action.kind {
        ActionKind::EnsurePackageSet { packages } => {
            let mut missing = Vec::new();
            for package in packages {
                if !host.package_installed(package)? {
                    missing.push(package.clone());
                }
            }
            if missing.is_empty() {
                Ok(Decision::Unchanged)
            } else {
                Ok(Decision::Change(format!(
                    "install {}",
                    missing.join(", ")
                )))
            }
        }
        ActionKind::EnsureRepoEnabled { repo } => {
            if host.repo_enabled(repo)? {
                Ok(Decision::Unchanged)
            } else {
                Ok(Decision::Change(format!("enable repository {repo}")))
            }
        }
        ActionKind::EnsureFilePresent { path, blob, .. } => {
            let target = host.expand_path(path);
            if host.file_hash(&target)? == Some(*blob) {
                Ok(Decision::Unchanged)
            } else {
                Ok(Decision::Change(format!("write {path}")))
            }
        }
        ActionKind::EnsureServiceState { service, enabled } => {
            if host.service_enabled(service)? == *enabled {
                Ok(Decision::Unchanged)
            } else {
                let verb = if *enabled { "enable" } else { "disable" };
                Ok(Decision::Change(format!("{verb} service {service}")))
            }
        }
        ActionKind::EnsureSysctlValue { key, value } => {
            if host.sysctl_value(key)?.as_deref() == Some(value.as_str()) {
                Ok(Decision::Unchanged)
            } else {
                Ok(Decision::Change(format!("set {key} = {value}")))
            }
        }
        ActionKind::RunIdempotentCommand { command, check } => {
            if host.check_passes(check)? {
                Ok(Decision::Unchanged)
            } else {
                Ok(Decision::Change(format!("run: {command}")))
            }
        }
        ActionKind::ManualOnly { .. } => Ok(Decision::Unchanged),
    }
}

/// Carry out the mutation `decide` called for.
pub fn perform(
    action: &ConvergenceAction,
    host: &dyn Host,
    blobs: &dyn BlobSource,
) -> HostResult<()> {
    match &action.kind {
        ActionKind::EnsurePackageSet { packages } => host.install_packages(packages),
        ActionKind::EnsureRepoEnabled { repo } => host.enable_repo(repo),
        ActionKind::EnsureFilePresent { path, blob, mode } => {
            let bytes = blobs
                .fetch(blob)
                .map_err(|err| HostError::Unsupported(format!("blob store: {err}")))?;
            host.write_file(&host.expand_path(path), &bytes, *mode)
        }
        ActionKind::EnsureServiceState { service, enabled } => {
            host.set_service_enabled(service, *enabled)
        }
        ActionKind::EnsureSysctlValue { key, value } => host.set_sysctl_value(key, value),
        ActionKind::RunIdempotentCommand { command, .. } => host.run_command(command),
        ActionKind::ManualOnly { .. } => Ok(()),
    }
}
