// src/verify.rs

//! Verification: read-only agreement check between a model and a machine.
//!
//! Runs after an apply (or instead of one) and reports, per action, whether
//! the machine already holds the desired state. Shares the decision logic
//! with reconciliation, so "verify says match" and "apply says unchanged"
//! can never disagree. Manual-only actions are never silently passed; they
//! always surface as requiring a human check.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use strum_macros::Display;
use tracing::info;

use crate::model::{Role, TargetStateModel};
use crate::reconcile::actions::{decide, Decision};
use crate::reconcile::Host;
use crate::Result;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum VerifyStatus {
    /// The machine holds the desired state.
    Match,
    /// The machine diverges; the detail says how.
    Mismatch,
    /// Manual-only; a human must confirm it.
    RequiresHumanCheck,
    /// Precondition capability absent on this machine.
    Skipped,
    /// The state could not be observed.
    Error,
}

/// One action's verification result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyCheck {
    pub role: Role,
    pub kind: String,
    pub target: String,
    pub status: VerifyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub verified_at: DateTime<Utc>,
    pub checks: Vec<VerifyCheck>,
}

impl VerificationReport {
    pub fn counts(&self) -> BTreeMap<VerifyStatus, usize> {
        let mut counts = BTreeMap::new();
        for check in &self.checks {
            *counts.entry(check.status).or_insert(0) += 1;
        }
        counts
    }

    pub fn count_of(&self, status: VerifyStatus) -> usize {
        self.checks.iter().filter(|c| c.status == status).count()
    }

    /// No mismatches and no observation errors. Human checks may remain.
    pub fn is_clean(&self) -> bool {
        !self
            .checks
            .iter()
            .any(|c| matches!(c.status, VerifyStatus::Mismatch | VerifyStatus::Error))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

/// Check every action of `model` against `host` without mutating anything.
pub fn verify(model: &TargetStateModel, host: &dyn Host) -> Result<VerificationReport> {
    let mut checks = Vec::new();

    for role in model.available_roles() {
        let Some(spec) = model.role(role) else {
            continue;
        };
        for action in &spec.actions {
            let (status, detail) = if action.kind.is_manual() {
                (VerifyStatus::RequiresHumanCheck, Some(action.description()))
            } else if let Some(cap) = &action.precondition
                && !host.capabilities().has(cap)
            {
                (VerifyStatus::Skipped, Some(format!("requires {cap}")))
            } else {
                match decide(action, host) {
                    Ok(Decision::Unchanged) => (VerifyStatus::Match, None),
                    Ok(Decision::Change(summary)) => (VerifyStatus::Mismatch, Some(summary)),
                    Err(err) => (VerifyStatus::Error, Some(err.to_string())),
                }
            };
            checks.push(VerifyCheck {
                role,
                kind: action.kind.name().to_string(),
                target: action.target.clone(),
                status,
                detail,
            });
        }
    }

    let report = VerificationReport {
        verified_at: Utc::now(),
        checks,
    };
    info!(
        matches = report.count_of(VerifyStatus::Match),
        mismatches = report.count_of(VerifyStatus::Mismatch),
        human = report.count_of(VerifyStatus::RequiresHumanCheck),
        "verification finished"
    );
    Ok(report)
}
