// src/context.rs

//! Execution context threaded through every pipeline stage.
//!
//! Core logic never reads ambient process state (environment variables,
//! current user, `/`): everything it needs arrives in an
//! [`ExecutionContext`] - the filesystem root to operate under, the home
//! directory and identity of the user being migrated, the probed
//! [`CapabilitySet`], and a [`CommandRunner`] for external tools. Tests swap
//! in a fake runner and a temp-dir root and exercise the whole pipeline
//! without a live machine.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use wait_timeout::ChildExt;

use crate::probe::CapabilitySet;

/// Captured output of one external command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Non-empty stdout lines, trimmed, in output order.
    pub fn lines(&self) -> Vec<String> {
        self.stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect()
    }
}

/// Seam between the core and external tools.
///
/// The capture and reconcile stages reach package managers, systemd, and
/// desktop-shell utilities exclusively through this trait.
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion and capture its output.
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput>;

    /// Whether a helper binary is available on this machine.
    fn has_binary(&self, program: &str) -> bool;
}

/// Live runner: spawns real subprocesses with a hang guard.
pub struct SystemRunner {
    /// Kill a probe that exceeds this budget.
    pub timeout: Duration,
}

impl SystemRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput> {
        debug!(program, ?args, "running external command");
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Drain pipes on threads so a chatty command cannot deadlock on a
        // full pipe buffer while we wait.
        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let stdout_reader = std::thread::spawn(move || {
            let mut buf = Vec::new();
            if let Some(ref mut pipe) = stdout_pipe {
                let _ = io::Read::read_to_end(pipe, &mut buf);
            }
            buf
        });
        let stderr_reader = std::thread::spawn(move || {
            let mut buf = Vec::new();
            if let Some(ref mut pipe) = stderr_pipe {
                let _ = io::Read::read_to_end(pipe, &mut buf);
            }
            buf
        });

        let status = match child.wait_timeout(self.timeout)? {
            Some(status) => status,
            None => {
                child.kill()?;
                child.wait()?;
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("{program} exceeded {}s budget", self.timeout.as_secs()),
                ));
            }
        };

        let stdout = stdout_reader.join().unwrap_or_default();
        let stderr = stderr_reader.join().unwrap_or_default();
        Ok(CommandOutput {
            status: status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }

    fn has_binary(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}

/// Everything a pipeline stage is allowed to know about the machine.
#[derive(Clone)]
pub struct ExecutionContext {
    /// Filesystem prefix all reads and writes go under ("/" on a live
    /// machine, a temp dir in tests).
    pub root: PathBuf,
    /// Absolute home directory of the user being migrated.
    pub home: PathBuf,
    pub username: String,
    pub hostname: String,
    /// Capabilities detected by the probe; drives unit and action skipping.
    pub caps: CapabilitySet,
    pub runner: Arc<dyn CommandRunner>,
    /// Budget for one capture unit before it is marked timed out.
    pub unit_timeout: Duration,
}

impl ExecutionContext {
    pub fn new(
        root: impl Into<PathBuf>,
        home: impl Into<PathBuf>,
        username: impl Into<String>,
        hostname: impl Into<String>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            root: root.into(),
            home: home.into(),
            username: username.into(),
            hostname: hostname.into(),
            caps: CapabilitySet::default(),
            runner,
            unit_timeout: Duration::from_secs(60),
        }
    }

    /// Rebase an absolute machine path under this context's root.
    pub fn path(&self, p: impl AsRef<Path>) -> PathBuf {
        let p = p.as_ref();
        match p.strip_prefix("/") {
            Ok(rel) => self.root.join(rel),
            Err(_) => self.root.join(p),
        }
    }

    /// Resolve a path under the user's home, rebased under the root.
    pub fn home_path(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.path(self.home.join(rel.as_ref()))
    }

    /// Expand a file slot from a capture record or model: `~/x` resolves
    /// under the home directory, anything else is treated as absolute.
    pub fn expand_slot(&self, slot: &str) -> PathBuf {
        match slot.strip_prefix("~/") {
            Some(rel) => self.home_path(rel),
            None => self.path(slot),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Canned command runner for unit tests.

    use super::*;
    use std::collections::{BTreeMap, BTreeSet};

    #[derive(Default)]
    pub struct FakeRunner {
        pub binaries: BTreeSet<String>,
        /// Keyed by "program arg1 arg2 ...".
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
}
