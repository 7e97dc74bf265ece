// src/reconcile/host.rs

//! Target-machine seam for reconciliation.
//!
//! Every read and every mutation the reconciler performs goes through the
//! [`Host`] trait. [`LiveHost`] drives the real machine via the context's
//! command runner; tests substitute an in-memory fake and exercise the full
//! decision path without touching the system.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::context::{CommandOutput, ExecutionContext};
use crate::hash::ContentHash;
use crate::model::ActionKind;
use crate::probe::{CapabilitySet, PackageManagerKind};

/// Why one host operation could not complete.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// The operation needs privileges this process does not have. Escalates
    /// to a manual step instead of failing the run.
    #[error("privilege required: {0}")]
    PrivilegeRequired(String),

    /// The host has no mechanism for this operation.
    #[error("unsupported on this host: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("command '{command}' exited with status {status}: {stderr}")]
    Command {
        command: String,
        status: i32,
        stderr: String,
    },
}

pub type HostResult<T> = std::result::Result<T, HostError>;

/// Everything reconciliation may observe or change on the target.
///
/// Read methods never mutate; `decide` uses only those, which is what makes
/// dry-run share the real decision path.
pub trait Host: Send + Sync {
    fn capabilities(&self) -> &CapabilitySet;

    fn package_installed(&self, package: &str) -> HostResult<bool>;
    fn install_packages(&self, packages: &[String]) -> HostResult<()>;

    fn repo_enabled(&self, repo: &str) -> HostResult<bool>;
    fn enable_repo(&self, repo: &str) -> HostResult<()>;

    /// Hash of the file at `path`, or `None` if it does not exist.
    fn file_hash(&self, path: &Path) -> HostResult<Option<ContentHash>>;
    fn write_file(&self, path: &Path, bytes: &[u8], mode: Option<u32>) -> HostResult<()>;

    fn service_enabled(&self, service: &str) -> HostResult<bool>;
    fn set_service_enabled(&self, service: &str, enabled: bool) -> HostResult<()>;

    fn sysctl_value(&self, key: &str) -> HostResult<Option<String>>;
    fn set_sysctl_value(&self, key: &str, value: &str) -> HostResult<()>;

    /// Run an action's check command; exit 0 means the state is achieved.
    fn check_passes(&self, check: &str) -> HostResult<bool>;
    /// Run an idempotent command to completion.
    fn run_command(&self, command: &str) -> HostResult<()>;

    /// Whether carrying out this action's mutation needs privileges this
    /// host may lack. Part of the decision path, so dry-run and apply report
    /// the same blocked set.
    fn mutation_needs_privilege(&self, kind: &ActionKind) -> bool;

    /// Resolve a model file slot to a concrete path on this host.
    fn expand_path(&self, slot: &str) -> PathBuf;
}

/// The real machine, driven through the context's command runner.
pub struct LiveHost {
    ctx: ExecutionContext,
}

impl LiveHost {
    pub fn new(ctx: ExecutionContext) -> Self {
        Self { ctx }
    }

    fn run(&self, program: &str, args: &[&str]) -> HostResult<CommandOutput> {
        let out = self.ctx.runner.run(program, args)?;
        debug!(program, ?args, status = out.status, "host command");
        Ok(out)
    }

    /// Run and require exit 0.
    fn run_ok(&self, program: &str, args: &[&str]) -> HostResult<()> {
        let out = self.run(program, args)?;
        if out.success() {
            Ok(())
        } else {
            Err(HostError::Command {
                command: format!("{} {}", program, args.join(" ")),
                status: out.status,
                stderr: out.stderr,
            })
        }
    }

    fn package_manager(&self) -> HostResult<PackageManagerKind> {
        self.ctx
            .caps
            .package_manager
            .ok_or_else(|| HostError::Unsupported("no package manager detected".into()))
    }

    fn require_privilege(&self, what: &str) -> HostResult<()> {
        if self.ctx.caps.privileged {
            Ok(())
        } else {
            Err(HostError::PrivilegeRequired(what.to_string()))
        }
    }

    fn is_home_path(&self, path: &Path) -> bool {
        path.starts_with(self.ctx.path(&self.ctx.home))
    }
}

impl Host for LiveHost {
    fn capabilities(&self) -> &CapabilitySet {
        &self.ctx.caps
    }

    fn package_installed(&self, package: &str) -> HostResult<bool> {
        let out = match self.package_manager()? {
            PackageManagerKind::Dnf | PackageManagerKind::Zypper => {
                self.run("rpm", &["-q", package])?
            }
            PackageManagerKind::Apt => self.run("dpkg", &["-s", package])?,
            PackageManagerKind::Pacman => self.run("pacman", &["-Qi", package])?,
        };
        Ok(out.success())
    }

    fn install_packages(&self, packages: &[String]) -> HostResult<()> {
        self.require_privilege("installing packages")?;
        let pm = self.package_manager()?;
        let names: Vec<&str> = packages.iter().map(String::as_str).collect();
        match pm {
            PackageManagerKind::Dnf => {
                let mut args = vec!["install", "-y"];
                args.extend(&names);
                self.run_ok("dnf", &args)
            }
            PackageManagerKind::Apt => {
                let mut args = vec!["install", "-y"];
                args.extend(&names);
                self.run_ok("apt-get", &args)
            }
            PackageManagerKind::Pacman => {
                let mut args = vec!["-S", "--needed", "--noconfirm"];
                args.extend(&names);
                self.run_ok("pacman", &args)
            }
            PackageManagerKind::Zypper => {
                let mut args = vec!["--non-interactive", "install"];
                args.extend(&names);
                self.run_ok("zypper", &args)
            }
        }
    }

    fn repo_enabled(&self, repo: &str) -> HostResult<bool> {
        let out = match self.package_manager()? {
            PackageManagerKind::Dnf => self.run("dnf", &["repolist", "--enabled", "--quiet"])?,
            PackageManagerKind::Zypper => self.run("zypper", &["lr", "-E"])?,
            other => {
                return Err(HostError::Unsupported(format!(
                    "repository management with {other}"
                )));
            }
        };
        Ok(out
            .lines()
            .iter()
            .any(|line| line.split_whitespace().any(|field| field == repo)))
    }

    fn enable_repo(&self, repo: &str) -> HostResult<()> {
        self.require_privilege("enabling a repository")?;
        match self.package_manager()? {
            PackageManagerKind::Dnf => {
                self.run_ok("dnf", &["config-manager", "--set-enabled", repo])
            }
            PackageManagerKind::Zypper => self.run_ok("zypper", &["modifyrepo", "--enable", repo]),
            other => Err(HostError::Unsupported(format!(
                "repository management with {other}"
            ))),
        }
    }

    fn file_hash(&self, path: &Path) -> HostResult<Option<ContentHash>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(ContentHash::of(&bytes))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn write_file(&self, path: &Path, bytes: &[u8], mode: Option<u32>) -> HostResult<()> {
        if !self.is_home_path(path) {
            self.require_privilege(&format!("writing {}", path.display()))?;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)?;
        if let Some(mode) = mode {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        }
        Ok(())
    }

    fn service_enabled(&self, service: &str) -> HostResult<bool> {
        let out = self.run("systemctl", &["is-enabled", service])?;
        Ok(out.success())
    }

    fn set_service_enabled(&self, service: &str, enabled: bool) -> HostResult<()> {
        self.require_privilege("changing service state")?;
        let verb = if enabled { "enable" } else { "disable" };
        self.run_ok("systemctl", &[verb, service])
    }

    fn sysctl_value(&self, key: &str) -> HostResult<Option<String>> {
        let out = self.run("sysctl", &["-n", key])?;
        if out.success() {
            Ok(Some(out.stdout.trim().to_string()))
        } else {
            Ok(None)
        }
    }

    fn set_sysctl_value(&self, key: &str, value: &str) -> HostResult<()> {
        self.require_privilege("setting a kernel parameter")?;
        self.run_ok("sysctl", &["-w", &format!("{key}={value}")])
    }

    fn check_passes(&self, check: &str) -> HostResult<bool> {
        let out = self.run("sh", &["-c", check])?;
        Ok(out.success())
    }

    fn run_command(&self, command: &str) -> HostResult<()> {
        self.run_ok("sh", &["-c", command])
    }

    fn mutation_needs_privilege(&self, kind: &ActionKind) -> bool {
        match kind {
            ActionKind::EnsurePackageSet { .. }
            | ActionKind::EnsureRepoEnabled { .. }
            | ActionKind::EnsureServiceState { .. }
            | ActionKind::EnsureSysctlValue { .. } => true,
            ActionKind::EnsureFilePresent { path, .. } => {
                !self.is_home_path(&self.expand_path(path))
            }
            ActionKind::RunIdempotentCommand { .. } | ActionKind::ManualOnly { .. } => false,
        }
    }

    fn expand_path(&self, slot: &str) -> PathBuf {
        self.ctx.expand_slot(slot)
    }
}
