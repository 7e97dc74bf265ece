// tests/common/mod.rs
//! Shared fixtures: a canned command runner for capture and an in-memory
//! host for reconciliation. Both let the full pipeline run against a temp
//! directory instead of a live machine.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rehome::reconcile::{Host, HostError, HostResult};
use rehome::{
    ActionKind, CapabilitySet, CommandOutput, CommandRunner, ContentHash, TargetStateModel,
};

/// Canned command runner, keyed by "program arg1 arg2 ...".
#[derive(Default)]
pub struct FakeRunner {
    pub binaries: BTreeSet<String>,
    pub outputs: BTreeMap<String, String>,
}

impl FakeRunner {
    pub fn with_binary(mut self, name: &str) -> Self {
        self.binaries.insert(name.to_string());
        self
    }

    pub fn with_output(mut self, invocation: &str, stdout: &str) -> Self {
        self.outputs
            .insert(invocation.to_string(), stdout.to_string());
        self
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput> {
        let key = if args.is_empty() {
            program.to_string()
        } else {
            format!("{} {}", program, args.join(" "))
        };
        match self.outputs.get(&key) {
            Some(stdout) => Ok(CommandOutput {
                status: 0,
                stdout: stdout.clone(),
                stderr: String::new(),
            }),
            None => Ok(CommandOutput {
                status: 1,
                stdout: String::new(),
                stderr: format!("fake runner: no canned output for '{key}'"),
            }),
        }
    }

    fn has_binary(&self, program: &str) -> bool {
        self.binaries.contains(program)
    }
}

/// In-memory target machine. Mutations change the maps; reads observe them,
/// so a second reconcile run sees the state the first one produced.
pub struct FakeHost {
    pub caps: CapabilitySet,
    pub home: PathBuf,
    pub installed: Mutex<BTreeSet<String>>,
    pub repos: Mutex<BTreeSet<String>>,
    pub files: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
    pub modes: Mutex<BTreeMap<PathBuf, u32>>,
    pub services: Mutex<BTreeMap<String, bool>>,
    pub sysctl: Mutex<BTreeMap<String, String>>,
    pub satisfied_checks: Mutex<BTreeSet<String>>,
    /// command -> check that running it satisfies.
    pub command_effects: Mutex<BTreeMap<String, String>>,
    pub commands_run: Mutex<Vec<String>>,
}

impl FakeHost {
    pub fn new(caps: CapabilitySet) -> Self {
        Self {
            caps,
            home: PathBuf::from("/home/alice"),
            installed: Mutex::new(BTreeSet::new()),
            repos: Mutex::new(BTreeSet::new()),
            files: Mutex::new(BTreeMap::new()),
            modes: Mutex::new(BTreeMap::new()),
            services: Mutex::new(BTreeMap::new()),
            sysctl: Mutex::new(BTreeMap::new()),
            satisfied_checks: Mutex::new(BTreeSet::new()),
            command_effects: Mutex::new(BTreeMap::new()),
            commands_run: Mutex::new(Vec::new()),
        }
    }

    /// Declare that running every idempotent command in `model` satisfies
    /// its own check, which is what those commands promise on a real host.
    pub fn link_command_effects(&self, model: &TargetStateModel) {
        let mut effects = self.command_effects.lock().unwrap();
        for spec in model.roles.values() {
            for action in &spec.actions {
                if let ActionKind::RunIdempotentCommand { command, check } = &action.kind {
                    effects.insert(command.clone(), check.clone());
                }
            }
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
        Ok(self
            .files
            .lock()
            .unwrap()
            .get(path)
            .map(|bytes| ContentHash::of(bytes)))
    }

    fn write_file(&self, path: &Path, bytes: &[u8], mode: Option<u32>) -> HostResult<()> {
        if !path.starts_with(&self.home) && !self.caps.privileged {
            return Err(HostError::PrivilegeRequired(format!(
                "writing {}",
                path.display()
            )));
        }
        self.files
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), bytes.to_vec());
        if let Some(mode) = mode {
            self.modes.lock().unwrap().insert(path.to_path_buf(), mode);
        }
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
        self.commands_run.lock().unwrap().push(command.to_string());
        if let Some(check) = self.command_effects.lock().unwrap().get(command) {
            self.satisfied_checks.lock().unwrap().insert(check.clone());
        }
        Ok(())
    }

    fn mutation_needs_privilege(&self, kind: &ActionKind) -> bool {
        match kind {
            ActionKind::EnsurePackageSet { .. }
            | ActionKind::EnsureRepoEnabled { .. }
            | ActionKind::EnsureServiceState { .. }
            | ActionKind::EnsureSysctlValue { .. } => true,
            ActionKind::EnsureFilePresent { path, .. } => {
                !self.expand_path(path).starts_with(&self.home)
            }
            ActionKind::RunIdempotentCommand { .. } | ActionKind::ManualOnly { .. } => false,
        }
    }

    fn expand_path(&self, slot: &str) -> PathBuf {
        match slot.strip_prefix("~/") {
            Some(rel) => self.home.join(rel),
            None => PathBuf::from(slot),
        }
    }
}
