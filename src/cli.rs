// src/cli.rs
//! CLI definitions for rehome.
//!
//! This module contains the command-line interface definitions using clap.
//! The actual command implementations are in the `commands` module.
//!
//! - `capture`      - Read this machine into a snapshot directory
//! - `inspect`      - Summarize a snapshot (per-unit status and counts)
//! - `normalize`    - Compile a snapshot into a target-state model
//! - `apply`        - Reconcile this machine against a model (supports --dry-run)
//! - `verify`       - Read-only agreement check between a model and this machine
//! - `list-roles`   - Show the roles a model contains, in execution order
//! - `manual-steps` - List the human work a model implies

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rehome")]
#[command(version)]
#[command(about = "Move a customized workstation to a new machine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Capture this machine's state into a snapshot directory
    Capture {
        /// Directory to write the snapshot into
        #[arg(short, long)]
        output: PathBuf,

        /// Capture only these units (comma separated, default: all)
        #[arg(long, value_delimiter = ',')]
        units: Vec<String>,

        /// Filesystem root to capture under
        #[arg(long, default_value = "/")]
        root: PathBuf,

        /// Per-unit time budget in seconds
        #[arg(long, default_value_t = 60)]
        timeout: u64,
    },

    /// Summarize a snapshot: per-unit status, fact/file/finding counts
    Inspect {
        /// Snapshot directory produced by `capture`
        #[arg(short, long)]
        snapshot: PathBuf,
    },

    /// Compile a snapshot into a target-state model
    Normalize {
        /// Snapshot directory produced by `capture`
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Directory to write the model into
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Reconcile this machine against a model
    Apply {
        /// Model directory produced by `normalize`
        #[arg(short, long)]
        model: PathBuf,

        /// Reconcile only these roles (comma separated, default: all in model)
        #[arg(long, value_delimiter = ',')]
        roles: Vec<String>,

        /// Decide everything, mutate nothing
        #[arg(long)]
        dry_run: bool,

        /// Filesystem root to reconcile under
        #[arg(long, default_value = "/")]
        root: PathBuf,

        /// Write the run report as JSON to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Check this machine against a model without changing anything
    Verify {
        /// Model directory produced by `normalize`
        #[arg(short, long)]
        model: PathBuf,

        /// Filesystem root to verify under
        #[arg(long, default_value = "/")]
        root: PathBuf,

        /// Write the verification report as JSON to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Show the roles a model contains, in execution order
    ListRoles {
        /// Model directory produced by `normalize`
        #[arg(short, long)]
        model: PathBuf,
    },

    /// List the manual steps a model implies
    ManualSteps {
        /// Model directory produced by `normalize`
        #[arg(short, long)]
        model: PathBuf,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
}
