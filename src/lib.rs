// src/lib.rs

//! Rehome - Workstation State Migration
//!
//! Rehome moves one fully customized desktop workstation to another machine
//! without disk cloning. The pipeline has three mutating stages and one
//! read-only stage:
//!
//! - **Capture**: read a live machine into a portable, structured [`snapshot::Snapshot`]
//! - **Normalize**: compile the snapshot into a declarative [`model::TargetStateModel`]
//!   plus a content-addressed blob store
//! - **Reconcile**: apply the model to a different machine, idempotently and in
//!   role dependency order, with dry-run support
//! - **Verify**: re-probe the target and report agreement with the model
//!
//! # Architecture
//!
//! - Capability-first: everything is conditioned on a [`probe::CapabilitySet`]
//! - Convergence, not execution: every action is idempotent by construction
//! - Partial-failure isolation: one unreadable file or one failed action never
//!   aborts a run; it becomes a typed [`snapshot::Finding`] or action outcome
//! - No ambient state: core logic only sees an explicit [`context::ExecutionContext`]

pub mod capture;
pub mod context;
mod error;
pub mod hash;
pub mod manual;
pub mod model;
pub mod normalize;
pub mod probe;
pub mod reconcile;
pub mod snapshot;
pub mod verify;

pub use context::{CommandOutput, CommandRunner, ExecutionContext, SystemRunner};
pub use error::{Error, Result};
pub use hash::ContentHash;
pub use manual::ManualStep;
pub use model::{
    ActionKind, BlobSource, BlobStore, ConvergenceAction, Role, RoleSpec, TargetStateModel,
};
pub use normalize::{normalize, NormalizedState};
pub use probe::{probe, Capability, CapabilitySet};
pub use reconcile::{reconcile, Host, LiveHost, Mode, Outcome, ReconciliationReport};
pub use snapshot::{CaptureRecord, Finding, Manifest, Snapshot, UnitName, UnitStatus};
pub use verify::{verify, VerificationReport, VerifyStatus};

/// Exit code for a clean run: every selected action applied, unchanged, or
/// deferred as expected.
pub const EXIT_OK: i32 = 0;

/// Exit code when at least one action reported `failed`.
pub const EXIT_FAILED_ACTIONS: i32 = 1;

/// Exit code for validation errors raised before any mutation occurred.
pub const EXIT_VALIDATION: i32 = 2;
