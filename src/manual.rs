// src/manual.rs

//! Manual-step escalation.
//!
//! Anything the pipeline cannot converge mechanically ends here: actions
//! born from capture findings, `manual-only` actions from normalize rules,
//! and apply-time privilege misses. The export is a stable, ordered list a
//! user can work through by hand, so nothing captured is ever lost silently.

use serde::{Deserialize, Serialize};

use crate::model::{ActionKind, ConvergenceAction, Role, TargetStateModel};

/// One instruction for the user, exported as JSON and printed by the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualStep {
    /// Capture unit the step originated from, or the reconciled role when
    /// the step arose at apply time.
    pub origin: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_command: Option<String>,
}

impl ManualStep {
    /// Build the step for an action that could not be converged.
    ///
    /// Actions carrying a finding id keep their capture unit as origin;
    /// everything else is attributed to the role it ran under.
    pub fn from_action(role: Role, action: &ConvergenceAction) -> Self {
        let origin = action
            .finding_id
            .as_deref()
            .and_then(|id| id.split(':').next())
            .map(String::from)
            .unwrap_or_else(|| role.to_string());
        let suggested_command = match &action.kind {
            ActionKind::ManualOnly {
                suggested_command, ..
            } => suggested_command.clone(),
            _ => None,
        };
        Self {
            origin,
            description: action.description(),
            suggested_command,
        }
    }
}

/// Every manual-only action in a model, in role dependency order.
///
/// Used by the `manual-steps` subcommand to list the human work a model
/// implies without reconciling anything.
pub fn collect(model: &TargetStateModel) -> Vec<ManualStep> {
    let mut steps = Vec::new();
    for role in model.available_roles() {
        if let Some(spec) = model.role(role) {
            for action in &spec.actions {
                if action.kind.is_manual() {
                    steps.push(ManualStep::from_action(role, action));
                }
            }
        }
    }
    steps
}
