// src/model/mod.rs

//! Target-State Model - the declarative description of what the target
//! machine's state ought to be.
//!
//! The model is a mapping from role (one of nine fixed domains) to an
//! ordered list of convergence actions, persisted as a TOML variables file
//! next to a content-addressed blob directory:
//!
//! ```text
//! model/
//!   model.toml     # roles -> actions
//!   blobs/<hex>    # file payloads, keyed by SHA-256
//! ```
//!
//! Roles form a declared acyclic dependency graph used for reconciliation
//! sequencing: repositories are always enabled before packages from those
//! repositories are requested.

mod blobs;

pub use blobs::{BlobSource, BlobStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use strum_macros::{Display, EnumIter, EnumString};

use crate::hash::ContentHash;
use crate::probe::Capability;
use crate::snapshot::UnitName;
use crate::{Error, Result};

/// Model file name inside a model directory.
pub const MODEL_FILE: &str = "model.toml";

/// Blob directory name inside a model directory.
pub const BLOB_DIR: &str = "blobs";

/// The nine reconciled domains of target machine state.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Repos,
    Packages,
    Shell,
    Desktop,
    System,
    Devtools,
    Audio,
    Thirdparty,
    Hardware,
}

impl Role {
    /// Declared dependency edges. The graph is static and acyclic;
    /// [`sort_roles`] still validates it so a future edit cannot silently
    /// introduce a cycle.
    pub fn depends_on(&self) -> &'static [Role] {
        match self {
            Role::Repos => &[],
            Role::Packages => &[Role::Repos],
            Role::Shell => &[Role::Packages],
            Role::Desktop => &[Role::Packages],
            Role::System => &[Role::Packages],
            Role::Devtools => &[Role::Packages, Role::Shell],
            Role::Audio => &[Role::Packages, Role::System],
            Role::Thirdparty => &[Role::Repos, Role::Packages],
            Role::Hardware => &[Role::Packages, Role::System],
        }
    }

    pub fn all() -> Vec<Role> {
        use strum::IntoEnumIterator;
        Self::iter().collect()
    }

    /// The capture unit this role's data comes from.
    pub fn source_unit(&self) -> UnitName {
        match self {
            Role::Repos => UnitName::Repo,
            Role::Packages => UnitName::Package,
            Role::Shell => UnitName::Shell,
            Role::Desktop => UnitName::Desktop,
            Role::System => UnitName::System,
            Role::Devtools => UnitName::Devtool,
            Role::Audio => UnitName::Audio,
            Role::Thirdparty => UnitName::Thirdparty,
            Role::Hardware => UnitName::Hardware,
        }
    }
}

/// Map a capture unit to the role that reconciles it. The dotfile unit
/// folds into the shell role; every other unit has a same-named role.
pub fn role_for_unit(unit: UnitName) -> Role {
    match unit {
        UnitName::Repo => Role::Repos,
        UnitName::Package => Role::Packages,
        UnitName::Shell | UnitName::Dotfile => Role::Shell,
        UnitName::Desktop => Role::Desktop,
        UnitName::System => Role::System,
        UnitName::Devtool => Role::Devtools,
        UnitName::Audio => Role::Audio,
        UnitName::Thirdparty => Role::Thirdparty,
        UnitName::Hardware => Role::Hardware,
    }
}

/// Topologically sort the selected roles by the declared dependency graph.
///
/// A role whose dependencies are outside the selected set still executes;
/// selection never reorders what is selected. The declaration-order tie
/// break keeps the result deterministic.
pub fn sort_roles(selected: &BTreeSet<Role>) -> Result<Vec<Role>> {
    sort_roles_with(selected, Role::depends_on)
}

/// Topological sort with an injectable edge function so cycle detection is
/// testable; the built-in graph is static.
pub(crate) fn sort_roles_with(
    selected: &BTreeSet<Role>,
    deps: impl Fn(&Role) -> &'static [Role] + Copy,
) -> Result<Vec<Role>> {
    fn visit(
        role: Role,
        deps: impl Fn(&Role) -> &'static [Role] + Copy,
        visiting: &mut BTreeSet<Role>,
        done: &mut BTreeSet<Role>,
        order: &mut Vec<Role>,
    ) -> Result<()> {
        if done.contains(&role) {
            return Ok(());
        }
        if !visiting.insert(role) {
            return Err(Error::validation(
                role.to_string(),
                "depends_on",
                "cyclic role dependency",
            ));
        }
        for dep in deps(&role) {
            visit(*dep, deps, visiting, done, order)?;
        }
        visiting.remove(&role);
        done.insert(role);
        order.push(role);
        Ok(())
    }

    let mut order = Vec::new();
    let mut visiting = BTreeSet::new();
    let mut done = BTreeSet::new();
    for role in Role::all() {
        visit(role, deps, &mut visiting, &mut done, &mut order)?;
    }
    Ok(order.into_iter().filter(|r| selected.contains(r)).collect())
}

/// What one convergence action does, with its desired value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ActionKind {
    /// Make sure every named package is installed.
    EnsurePackageSet { packages: Vec<String> },
    /// Make sure a package repository is enabled.
    EnsureRepoEnabled { repo: String },
    /// Place a blob verbatim at a path.
    EnsureFilePresent {
        path: String,
        blob: ContentHash,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<u32>,
    },
    /// Make sure a service is enabled or disabled.
    EnsureServiceState { service: String, enabled: bool },
    /// Make sure a kernel parameter holds a value.
    EnsureSysctlValue { key: String, value: String },
    /// Run a command whose effect is idempotent. Every command carries a
    /// `check`; it passing means the desired state is already achieved, so
    /// re-applies and verification can observe convergence.
    RunIdempotentCommand { command: String, check: String },
    /// Never mutates; only ever produces a manual-step record.
    ManualOnly {
        description: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        suggested_command: Option<String>,
    },
}

impl ActionKind {
    /// Stable kind name for reports.
    pub fn name(&self) -> &'static str {
        match self {
            Self::EnsurePackageSet { .. } => "ensure-package-set",
            Self::EnsureRepoEnabled { .. } => "ensure-repo-enabled",
            Self::EnsureFilePresent { .. } => "ensure-file-present",
            Self::EnsureServiceState { .. } => "ensure-service-state",
            Self::EnsureSysctlValue { .. } => "ensure-sysctl-value",
            Self::RunIdempotentCommand { .. } => "run-idempotent-command",
            Self::ManualOnly { .. } => "manual-only",
        }
    }

    pub fn is_manual(&self) -> bool {
        matches!(self, Self::ManualOnly { .. })
    }
}

/// One idempotent step that brings one piece of target state to a desired
/// value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceAction {
    /// What the action converges: a path, package, service, or repo name.
    pub target: String,
    pub kind: ActionKind,
    /// Capability that must be present on the target; absent capability
    /// means the action is skipped, not failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precondition: Option<Capability>,
    /// Stable id of the capture finding this action carries, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finding_id: Option<String>,
}

impl ConvergenceAction {
    pub fn new(target: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            target: target.into(),
            kind,
            precondition: None,
            finding_id: None,
        }
    }

    pub fn with_precondition(mut self, cap: Capability) -> Self {
        self.precondition = Some(cap);
        self
    }

    pub fn from_finding(finding: &crate::snapshot::Finding) -> Self {
        Self {
            target: finding.item.clone(),
            kind: ActionKind::ManualOnly {
                description: format!("{}: {}", finding.item, finding.reason),
                suggested_command: None,
            },
            precondition: None,
            finding_id: Some(finding.id.clone()),
        }
    }

    /// Human-readable description for reports and manual-step exports.
    pub fn description(&self) -> String {
        match &self.kind {
            ActionKind::EnsurePackageSet { packages } => {
                format!("ensure packages installed: {}", packages.join(", "))
            }
            ActionKind::EnsureRepoEnabled { repo } => format!("ensure repository {repo} enabled"),
            ActionKind::EnsureFilePresent { path, .. } => format!("ensure file {path} present"),
            ActionKind::EnsureServiceState { service, enabled } => {
                let state = if *enabled { "enabled" } else { "disabled" };
                format!("ensure service {service} {state}")
            }
            ActionKind::EnsureSysctlValue { key, value } => {
                format!("ensure sysctl {key} = {value}")
            }
            ActionKind::RunIdempotentCommand { command, .. } => format!("run: {command}"),
            ActionKind::ManualOnly { description, .. } => description.clone(),
        }
    }
}

/// Ordered actions for one role.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleSpec {
    pub actions: Vec<ConvergenceAction>,
}

/// Header of the model file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelHeader {
    pub version: u32,
    pub source_hostname: String,
    pub generated: DateTime<Utc>,
}

/// Supported model file version.
pub const MODEL_VERSION: u32 = 1;

/// The derived, validated target-state configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetStateModel {
    pub model: ModelHeader,
    #[serde(default)]
    pub roles: BTreeMap<Role, RoleSpec>,
}

impl TargetStateModel {
    pub fn new(source_hostname: impl Into<String>) -> Self {
        Self {
            model: ModelHeader {
                version: MODEL_VERSION,
                source_hostname: source_hostname.into(),
                generated: Utc::now(),
            },
            roles: BTreeMap::new(),
        }
    }

    /// Roles present in this model, in dependency order.
    pub fn available_roles(&self) -> Vec<Role> {
        let selected: BTreeSet<Role> = self.roles.keys().copied().collect();
        // The static graph cannot cycle; validated at normalize time.
        sort_roles(&selected).unwrap_or_default()
    }

    pub fn role(&self, role: Role) -> Option<&RoleSpec> {
        self.roles.get(&role)
    }

    /// Total action count across roles.
    pub fn action_count(&self) -> usize {
        self.roles.values().map(|s| s.actions.len()).sum()
    }

    /// Every blob hash any action references.
    pub fn referenced_blobs(&self) -> BTreeSet<ContentHash> {
        self.roles
            .values()
            .flat_map(|spec| spec.actions.iter())
            .filter_map(|action| match &action.kind {
                ActionKind::EnsureFilePresent { blob, .. } => Some(*blob),
                _ => None,
            })
            .collect()
    }

    /// Fail if any referenced blob is missing from the store. Dangling
    /// references are a validation error at normalize time, never an
    /// apply-time surprise.
    pub fn validate_blob_refs(&self, blobs: &dyn BlobSource) -> Result<()> {
        for hash in self.referenced_blobs() {
            if !blobs.contains(&hash) {
                return Err(Error::MissingBlob(hash.to_hex()));
            }
        }
        Ok(())
    }

    /// Write `model.toml` into a model directory.
    pub fn write(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        let text = toml::to_string_pretty(self)?;
        fs::write(dir.join(MODEL_FILE), text)?;
        Ok(())
    }

    /// Load `model.toml` from a model directory.
    pub fn read(dir: &Path) -> Result<Self> {
        let text = fs::read_to_string(dir.join(MODEL_FILE))?;
        let model: Self = toml::from_str(&text)?;
        if model.model.version != MODEL_VERSION {
            return Err(Error::Other(format!(
                "unsupported model version {} (expected {})",
                model.model.version, MODEL_VERSION
            )));
        }
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repos_sort_before_packages_regardless_of_selection_order() {
        let selected: BTreeSet<Role> = [Role::Packages, Role::Repos].into_iter().collect();
        let order = sort_roles(&selected).unwrap();
        assert_eq!(order, vec![Role::Repos, Role::Packages]);
    }

    #[test]
    fn full_order_respects_every_edge() {
        let selected: BTreeSet<Role> = Role::all().into_iter().collect();
        let order = sort_roles(&selected).unwrap();
        assert_eq!(order.len(), 9);
        let pos = |r: Role| order.iter().position(|x| *x == r).unwrap();
        for role in Role::all() {
            for dep in role.depends_on() {
                assert!(pos(*dep) < pos(role), "{dep} must precede {role}");
            }
        }
    }

    #[test]
    fn cyclic_dependency_graph_is_rejected() {
        // Injected edges: repos <-> packages.
        let deps = |role: &Role| -> &'static [Role] {
            match role {
                Role::Repos => &[Role::Packages],
                Role::Packages => &[Role::Repos],
                _ => &[],
            }
        };
        let selected: BTreeSet<Role> = [Role::Repos].into_iter().collect();
        let err = sort_roles_with(&selected, deps).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("cyclic"));
    }

    #[test]
    fn model_toml_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let mut model = TargetStateModel::new("workstation");
        model.roles.insert(
            Role::Packages,
            RoleSpec {
                actions: vec![ConvergenceAction::new(
                    "git",
                    ActionKind::EnsurePackageSet {
                        packages: vec!["git".into()],
                    },
                )
                .with_precondition(Capability::PackageManager)],
            },
        );
        model.roles.insert(
            Role::Shell,
            RoleSpec {
                actions: vec![ConvergenceAction::new(
                    "~/.zshrc",
                    ActionKind::EnsureFilePresent {
                        path: "~/.zshrc".into(),
                        blob: ContentHash::of(b"export EDITOR=nvim\n"),
                        mode: Some(0o644),
                    },
                )],
            },
        );

        model.write(tmp.path()).unwrap();
        let loaded = TargetStateModel::read(tmp.path()).unwrap();
        assert_eq!(loaded, model);
        assert_eq!(loaded.available_roles(), vec![Role::Packages, Role::Shell]);
        assert_eq!(loaded.referenced_blobs().len(), 1);
    }

    #[test]
    fn finding_conversion_preserves_reason_and_id() {
        let finding = crate::snapshot::Finding::new(
            crate::snapshot::UnitName::System,
            "/etc/sudoers.d/custom",
            "permission denied",
        );
        let action = ConvergenceAction::from_finding(&finding);
        assert!(action.kind.is_manual());
        assert_eq!(action.finding_id.as_deref(), Some("system:/etc/sudoers.d/custom"));
        assert!(action.description().contains("permission denied"));
    }
}
