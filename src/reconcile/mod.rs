// src/reconcile/mod.rs

//! Reconciliation engine: converge a target machine toward a model.
//!
//! Roles execute in dependency order; within a role, actions execute in
//! model order. Each action lands on exactly one outcome:
//!
//! - `applied`    - a mutation ran (or, in dry-run, would run)
//! - `unchanged`  - the desired state already held
//! - `skipped`    - a declared precondition capability is absent
//! - `blocked`    - the mutation needs privileges this process lacks
//! - `deferred`   - manual-only; never attempted mechanically
//! - `failed`     - the mutation was attempted and did not succeed
//!
//! A failed action never aborts the run; later actions still execute and
//! the report carries everything. Apply mode takes an exclusive lock so two
//! reconciliations cannot interleave mutations.

pub(crate) mod actions;
mod host;

pub use host::{Host, HostError, HostResult, LiveHost};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::path::Path;
use strum_macros::Display;
use tracing::{info, warn};
use uuid::Uuid;

use crate::manual::ManualStep;
use crate::model::{sort_roles, BlobSource, ConvergenceAction, Role, TargetStateModel};
use crate::{Error, Result, EXIT_FAILED_ACTIONS, EXIT_OK};

use actions::Decision;

/// Lock file name under the apply lock directory.
const LOCK_FILE: &str = "reconcile.lock";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    Apply,
    DryRun,
}

/// Where one action ended up.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Applied,
    Unchanged,
    Skipped,
    Blocked,
    Deferred,
    Failed,
}

/// One action's result within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionReport {
    pub role: Role,
    /// Position within the role's action list.
    pub index: usize,
    pub kind: String,
    pub target: String,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Full record of one reconciliation run, serializable as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub run_id: Uuid,
    pub mode: Mode,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    pub actions: Vec<ActionReport>,
    pub manual_steps: Vec<ManualStep>,
}

impl ReconciliationReport {
    /// Outcome totals for the summary line.
    pub fn counts(&self) -> BTreeMap<Outcome, usize> {
        let mut counts = BTreeMap::new();
        for action in &self.actions {
            *counts.entry(action.outcome).or_insert(0) += 1;
        }
        counts
    }

    pub fn count_of(&self, outcome: Outcome) -> usize {
        self.actions.iter().filter(|a| a.outcome == outcome).count()
    }

    pub fn has_failures(&self) -> bool {
        self.actions.iter().any(|a| a.outcome == Outcome::Failed)
    }

    pub fn exit_code(&self) -> i32 {
        if self.has_failures() {
            EXIT_FAILED_ACTIONS
        } else {
            EXIT_OK
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Persist the report next to other run artifacts.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

/// Reconcile the selected roles of `model` against `host`.
///
/// Dry-run takes the identical decision path and stops short of every
/// mutation; the reported outcomes are what a real apply would produce
/// against the same host state.
pub fn reconcile(
    model: &TargetStateModel,
    blobs: &dyn BlobSource,
    host: &dyn Host,
    selected: &BTreeSet<Role>,
    mode: Mode,
    lock_dir: Option<&Path>,
) -> Result<ReconciliationReport> {
    // Only a real apply excludes concurrent runs; dry-run mutates nothing.
    let _lock = match (mode, lock_dir) {
        (Mode::Apply, Some(dir)) => Some(acquire_lock(dir)?),
        _ => None,
    };

    let run_id = Uuid::new_v4();
    let started = Utc::now();
    let present: BTreeSet<Role> = model
        .roles
        .keys()
        .copied()
        .filter(|r| selected.contains(r))
        .collect();
    let order = sort_roles(&present)?;
    info!(%run_id, %mode, roles = order.len(), "reconciliation started");

    let mut reports = Vec::new();
    let mut manual_steps = Vec::new();

    for role in order {
        let spec = match model.role(role) {
            Some(spec) => spec,
            None => continue,
        };
        for (index, action) in spec.actions.iter().enumerate() {
            let (outcome, detail) =
                run_action(role, action, host, blobs, mode, &mut manual_steps);
            if outcome == Outcome::Failed {
                warn!(
                    %role,
                    target = %action.target,
                    detail = detail.as_deref().unwrap_or(""),
                    "action failed"
                );
            }
            reports.push(ActionReport {
                role,
                index,
                kind: action.kind.name().to_string(),
                target: action.target.clone(),
                outcome,
                detail,
            });
        }
    }

    let report = ReconciliationReport {
        run_id,
        mode,
        started,
        finished: Utc::now(),
        actions: reports,
        manual_steps,
    };
    info!(
        %run_id,
        applied = report.count_of(Outcome::Applied),
        unchanged = report.count_of(Outcome::Unchanged),
        failed = report.count_of(Outcome::Failed),
        manual = report.manual_steps.len(),
        "reconciliation finished"
    );
    Ok(report)
}

fn run_action(
    role: Role,
    action: &ConvergenceAction,
    host: &dyn Host,
    blobs: &dyn BlobSource,
    mode: Mode,
    manual_steps: &mut Vec<ManualStep>,
) -> (Outcome, Option<String>) {
    if action.kind.is_manual() {
        manual_steps.push(ManualStep::from_action(role, action));
        return (Outcome::Deferred, Some(action.description()));
    }

    if let Some(cap) = &action.precondition
        && !host.capabilities().has(cap)
    {
        return (Outcome::Skipped, Some(format!("requires {cap}")));
    }

    let summary = match actions::decide(action, host) {
        Ok(Decision::Unchanged) => return (Outcome::Unchanged, None),
        Ok(Decision::Change(summary)) => summary,
        Err(HostError::PrivilegeRequired(what)) => {
            manual_steps.push(ManualStep::from_action(role, action));
            return (Outcome::Blocked, Some(what));
        }
        Err(err) => return (Outcome::Failed, Some(err.to_string())),
    };

    // Privilege is part of the decision, not the mutation: a dry run must
    // report the same blocked set a real apply would.
    if host.mutation_needs_privilege(&action.kind) && !host.capabilities().privileged {
        manual_steps.push(ManualStep::from_action(role, action));
        return (Outcome::Blocked, Some(format!("needs privilege: {summary}")));
    }

    match mode {
        Mode::DryRun => (Outcome::Applied, Some(format!("would {summary}"))),
        Mode::Apply => match actions::perform(action, host, blobs) {
            Ok(()) => (Outcome::Applied, Some(summary)),
            Err(HostError::PrivilegeRequired(what)) => {
                manual_steps.push(ManualStep::from_action(role, action));
                (Outcome::Blocked, Some(what))
            }
            Err(err) => (Outcome::Failed, Some(err.to_string())),
        },
    }
}

fn acquire_lock(dir: &Path) -> Result<File> {
    fs::create_dir_all(dir)?;
    let path = dir.join(LOCK_FILE);
    let file = File::create(&path)?;
    file.try_lock_exclusive()
        .map_err(|_| Error::LockHeld(path))?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ContentHash;
    use crate::model::{ActionKind, RoleSpec};
    use crate::probe::{Capability, CapabilitySet, PackageManagerKind};
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// In-memory host with just enough state for engine tests.
    #[derive(Default)]
    struct FakeHost {
        caps: CapabilitySet,
        installed: Mutex<BTreeSet<String>>,
        repos: Mutex<BTreeSet<String>>,
        files: Mutex<BTreeMap<PathBuf, ContentHash>>,
        services: Mutex<BTreeMap<String, bool>>,
        sysctl: Mutex<BTreeMap<String, String>>,
        commands: Mutex<Vec<String>>,
        /// command -> check it satisfies once run.
        effects: Mutex<BTreeMap<String, String>>,
        satisfied_checks: Mutex<BTreeSet<String>>,
    }

    impl FakeHost {
        fn with_package_manager() -> Self {
            Self {
                caps: CapabilitySet {
                    package_manager: Some(PackageManagerKind::Dnf),
                    privileged: true,
                    ..CapabilitySet::default()
                },
                ..Self::default()
            }
        }
    }

    impl Host for FakeHost {
        fn capabilities(&self) -> &CapabilitySet {
            &self.caps
        }

        fn package_installed(&self, package: &str) -> HostResult<bool> {
            Ok(self.installed.lock().unwrap().contains(package))
        }

        fn install_packages(&self, packages: &[String]) -> HostResult<()> {
            if !self.caps.privileged {
                return Err(HostError::PrivilegeRequired("installing packages".into()));
            }
            self.installed
                .lock()
                .unwrap()
                .extend(packages.iter().cloned());
            Ok(())
        }

        fn repo_enabled(&self, repo: &str) -> HostResult<bool> {
            Ok(self.repos.lock().unwrap().contains(repo))
        }

        fn enable_repo(&self, repo: &str) -> HostResult<()> {
            if !self.caps.privileged {
                return Err(HostError::PrivilegeRequired("enabling a repository".into()));
            }
            self.repos.lock().unwrap().insert(repo.to_string());
            Ok(())
        }

        fn file_hash(&self, path: &Path) -> HostResult<Option<ContentHash>> {
            Ok(self.files.lock().unwrap().get(path).copied())
        }

        fn write_file(&self, path: &Path, bytes: &[u8], _mode: Option<u32>) -> HostResult<()> {
            self.files
                .lock()
                .unwrap()
                .insert(path.to_path_buf(), ContentHash::of(bytes));
            Ok(())
        }

        fn service_enabled(&self, service: &str) -> HostResult<bool> {
            Ok(*self.services.lock().unwrap().get(service).unwrap_or(&false))
        }

        fn set_service_enabled(&self, service: &str, enabled: bool) -> HostResult<()> {
            if !self.caps.privileged {
                return Err(HostError::PrivilegeRequired("changing service state".into()));
            }
            self.services
                .lock()
                .unwrap()
                .insert(service.to_string(), enabled);
            Ok(())
        }

        fn sysctl_value(&self, key: &str) -> HostResult<Option<String>> {
            Ok(self.sysctl.lock().unwrap().get(key).cloned())
        }

        fn set_sysctl_value(&self, key: &str, value: &str) -> HostResult<()> {
            if !self.caps.privileged {
                return Err(HostError::PrivilegeRequired(
                    "setting a kernel parameter".into(),
                ));
            }
            self.sysctl
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            Ok(())
        }

        fn check_passes(&self, check: &str) -> HostResult<bool> {
            Ok(self.satisfied_checks.lock().unwrap().contains(check))
        }

        fn run_command(&self, command: &str) -> HostResult<()> {
            self.commands.lock().unwrap().push(command.to_string());
            if let Some(check) = self.effects.lock().unwrap().get(command) {
                self.satisfied_checks.lock().unwrap().insert(check.clone());
            }
            Ok(())
        }

        fn mutation_needs_privilege(&self, kind: &ActionKind) -> bool {
            matches!(
                kind,
                ActionKind::EnsurePackageSet { .. }
                    | ActionKind::EnsureRepoEnabled { .. }
                    | ActionKind::EnsureServiceState { .. }
                    | ActionKind::EnsureSysctlValue { .. }
            )
        }

        fn expand_path(&self, slot: &str) -> PathBuf {
            PathBuf::from(slot.replace("~/", "/home/alice/"))
        }
    }

    fn package_action(name: &str) -> ConvergenceAction {
        ConvergenceAction::new(
            name,
            ActionKind::EnsurePackageSet {
                packages: vec![name.to_string()],
            },
        )
        .with_precondition(Capability::PackageManager)
    }

    fn model_with(role: Role, actions: Vec<ConvergenceAction>) -> TargetStateModel {
        let mut model = TargetStateModel::new("workstation");
        model.roles.insert(role, RoleSpec { actions });
        model
    }

    fn all_roles() -> BTreeSet<Role> {
        Role::all().into_iter().collect()
    }

    #[test]
    fn apply_then_reapply_is_idempotent() {
        let host = FakeHost::with_package_manager();
        let blobs = BTreeMap::new();
        let model = model_with(
            Role::Packages,
            vec![package_action("git"), package_action("zsh")],
        );

        let first = reconcile(&model, &blobs, &host, &all_roles(), Mode::Apply, None).unwrap();
        assert_eq!(first.count_of(Outcome::Applied), 2);

        let second = reconcile(&model, &blobs, &host, &all_roles(), Mode::Apply, None).unwrap();
        assert_eq!(second.count_of(Outcome::Applied), 0);
        assert_eq!(second.count_of(Outcome::Unchanged), 2);
        assert_eq!(second.exit_code(), EXIT_OK);
    }

    #[test]
    fn dry_run_mutates_nothing_and_predicts_apply() {
        let host = FakeHost::with_package_manager();
        let blobs = BTreeMap::new();
        let model = model_with(Role::Packages, vec![package_action("git")]);

        let dry = reconcile(&model, &blobs, &host, &all_roles(), Mode::DryRun, None).unwrap();
        assert_eq!(dry.count_of(Outcome::Applied), 1);
        assert_eq!(dry.actions[0].detail.as_deref(), Some("would install git"));
        assert!(host.installed.lock().unwrap().is_empty());

        let real = reconcile(&model, &blobs, &host, &all_roles(), Mode::Apply, None).unwrap();
        for (d, r) in dry.actions.iter().zip(&real.actions) {
            assert_eq!(d.outcome, r.outcome);
        }
    }

    #[test]
    fn repos_execute_before_packages() {
        let host = FakeHost::with_package_manager();
        let blobs = BTreeMap::new();
        let mut model = model_with(Role::Packages, vec![package_action("vlc")]);
        model.roles.insert(
            Role::Repos,
            RoleSpec {
                actions: vec![ConvergenceAction::new(
                    "rpmfusion-free",
                    ActionKind::EnsureRepoEnabled {
                        repo: "rpmfusion-free".into(),
                    },
                )],
            },
        );

        let report = reconcile(&model, &blobs, &host, &all_roles(), Mode::Apply, None).unwrap();
        assert_eq!(report.actions[0].role, Role::Repos);
        assert_eq!(report.actions[1].role, Role::Packages);
    }

    #[test]
    fn absent_precondition_skips_the_action() {
        let host = FakeHost::default();
        let blobs = BTreeMap::new();
        let model = model_with(Role::Packages, vec![package_action("git")]);

        let report = reconcile(&model, &blobs, &host, &all_roles(), Mode::Apply, None).unwrap();
        assert_eq!(report.actions[0].outcome, Outcome::Skipped);
        assert_eq!(
            report.actions[0].detail.as_deref(),
            Some("requires package-manager")
        );
    }

    #[test]
    fn privilege_miss_blocks_and_escalates() {
        let mut host = FakeHost::with_package_manager();
        host.caps.privileged = false;
        let blobs = BTreeMap::new();
        let model = model_with(Role::Packages, vec![package_action("git")]);

        let report = reconcile(&model, &blobs, &host, &all_roles(), Mode::Apply, None).unwrap();
        assert_eq!(report.actions[0].outcome, Outcome::Blocked);
        assert_eq!(report.manual_steps.len(), 1);
        assert!(report.manual_steps[0].description.contains("git"));
        // Blocked is not failed; the run still exits clean.
        assert_eq!(report.exit_code(), EXIT_OK);
    }

    #[test]
    fn dry_run_reports_blocked_exactly_where_apply_would() {
        let mut host = FakeHost::with_package_manager();
        host.caps.privileged = false;
        let blobs = BTreeMap::new();
        let model = model_with(Role::Packages, vec![package_action("git")]);

        let dry = reconcile(&model, &blobs, &host, &all_roles(), Mode::DryRun, None).unwrap();
        assert_eq!(dry.actions[0].outcome, Outcome::Blocked);
        assert_eq!(dry.manual_steps.len(), 1);

        let real = reconcile(&model, &blobs, &host, &all_roles(), Mode::Apply, None).unwrap();
        assert!(host.installed.lock().unwrap().is_empty());
        for (d, r) in dry.actions.iter().zip(&real.actions) {
            assert_eq!(d.outcome, r.outcome, "dry-run diverged on {}", d.target);
        }
    }

    #[test]
    fn checked_commands_go_unchanged_once_their_state_holds() {
        let host = FakeHost::default();
        let command = "dconf load / < ~/.config/rehome/dconf.ini";
        let check = "dconf dump / | cmp -s - ~/.config/rehome/dconf.ini";
        host.effects
            .lock()
            .unwrap()
            .insert(command.to_string(), check.to_string());
        let blobs = BTreeMap::new();
        let model = model_with(
            Role::Desktop,
            vec![ConvergenceAction::new(
                "~/.config/rehome/dconf.ini",
                ActionKind::RunIdempotentCommand {
                    command: command.into(),
                    check: check.into(),
                },
            )],
        );

        let first = reconcile(&model, &blobs, &host, &all_roles(), Mode::Apply, None).unwrap();
        assert_eq!(first.count_of(Outcome::Applied), 1);
        assert_eq!(host.commands.lock().unwrap().len(), 1);

        let second = reconcile(&model, &blobs, &host, &all_roles(), Mode::Apply, None).unwrap();
        assert_eq!(second.count_of(Outcome::Applied), 0);
        assert_eq!(second.count_of(Outcome::Unchanged), 1);
        assert_eq!(host.commands.lock().unwrap().len(), 1);
    }

    #[test]
    fn manual_only_actions_defer_with_a_step() {
        let host = FakeHost::default();
        let blobs = BTreeMap::new();
        let model = model_with(
            Role::Hardware,
            vec![ConvergenceAction::new(
                "nvidia-driver",
                ActionKind::ManualOnly {
                    description: "install the proprietary NVIDIA driver".into(),
                    suggested_command: None,
                },
            )],
        );

        let report = reconcile(&model, &blobs, &host, &all_roles(), Mode::Apply, None).unwrap();
        assert_eq!(report.actions[0].outcome, Outcome::Deferred);
        assert_eq!(report.manual_steps.len(), 1);
        assert_eq!(report.manual_steps[0].origin, "hardware");
    }

    #[test]
    fn file_actions_fetch_blobs_and_write() {
        let host = FakeHost::default();
        let payload = b"export EDITOR=nvim\n".to_vec();
        let hash = ContentHash::of(&payload);
        let blobs = BTreeMap::from([(hash, payload)]);
        let model = model_with(
            Role::Shell,
            vec![ConvergenceAction::new(
                "~/.zshrc",
                ActionKind::EnsureFilePresent {
                    path: "~/.zshrc".into(),
                    blob: hash,
                    mode: None,
                },
            )],
        );

        let report = reconcile(&model, &blobs, &host, &all_roles(), Mode::Apply, None).unwrap();
        assert_eq!(report.actions[0].outcome, Outcome::Applied);
        assert_eq!(
            host.files
                .lock()
                .unwrap()
                .get(Path::new("/home/alice/.zshrc")),
            Some(&hash)
        );
    }

    #[test]
    fn unselected_roles_do_not_run() {
        let host = FakeHost::with_package_manager();
        let blobs = BTreeMap::new();
        let mut model = model_with(Role::Packages, vec![package_action("git")]);
        model.roles.insert(
            Role::System,
            RoleSpec {
                actions: vec![ConvergenceAction::new(
                    "sshd.service",
                    ActionKind::EnsureServiceState {
                        service: "sshd.service".into(),
                        enabled: true,
                    },
                )],
            },
        );

        let selected: BTreeSet<Role> = [Role::Packages].into_iter().collect();
        let report = reconcile(&model, &blobs, &host, &selected, Mode::Apply, None).unwrap();
        assert_eq!(report.actions.len(), 1);
        assert_eq!(report.actions[0].role, Role::Packages);
    }

    #[test]
    fn second_apply_lock_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let _held = acquire_lock(tmp.path()).unwrap();
        let err = acquire_lock(tmp.path()).unwrap_err();
        assert!(matches!(err, Error::LockHeld(_)));
    }

    #[test]
    fn report_round_trips_through_json() {
        let host = FakeHost::with_package_manager();
        let blobs = BTreeMap::new();
        let model = model_with(Role::Packages, vec![package_action("git")]);
        let report = reconcile(&model, &blobs, &host, &all_roles(), Mode::Apply, None).unwrap();

        let json = report.to_json().unwrap();
        let loaded: ReconciliationReport = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded, report);
    }
}
