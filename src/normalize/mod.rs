// src/normalize/mod.rs

//! Normalize engine: Snapshot -> Target-State Model.
//!
//! A pure, synchronous, deterministic transform. Facts go through the fixed
//! lookup table in [`table`]; file payloads become content-addressed blobs
//! plus `ensure-file-present` actions; every finding becomes exactly one
//! `manual-only` action carrying the finding's stable id, so nothing a
//! capture could not resolve is ever dropped silently.
//!
//! Normalize either produces a fully valid model or fails with a
//! [`crate::Error::Validation`] naming the offending role and field - the
//! model is never partially valid. A unit absent from the snapshot simply
//! omits its role; a unit present with malformed data is a hard error.

mod table;

use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info};

use crate::hash::ContentHash;
use crate::model::{
    role_for_unit, sort_roles, ActionKind, BlobStore, ConvergenceAction, Role, RoleSpec,
    TargetStateModel, BLOB_DIR,
};
use crate::probe::Capability;
use crate::snapshot::{Snapshot, UnitName};
use crate::{Error, Result};

/// The normalize output: a validated model plus its blob side-table.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedState {
    pub model: TargetStateModel,
    pub blobs: BTreeMap<ContentHash, Vec<u8>>,
}

impl NormalizedState {
    /// Persist as a model directory: `model.toml` + `blobs/`.
    pub fn write(&self, dir: &Path) -> Result<()> {
        self.model.write(dir)?;
        BlobStore::create(dir.join(BLOB_DIR))?.import(&self.blobs)?;
        Ok(())
    }

    /// Load a model directory, re-validating blob references.
    pub fn read_dir(dir: &Path) -> Result<(TargetStateModel, BlobStore)> {
        let model = TargetStateModel::read(dir)?;
        let store = BlobStore::open(dir.join(BLOB_DIR))?;
        model.validate_blob_refs(&store)?;
        Ok((model, store))
    }
}

/// Compile a snapshot into a target-state model.
pub fn normalize(snapshot: &Snapshot) -> Result<NormalizedState> {
    // The role graph is static; validate it anyway so an edit introducing a
    // cycle fails here, before any mutation could ever be planned.
    let all: BTreeSet<Role> = Role::all().into_iter().collect();
    sort_roles(&all)?;

    let mut roles: BTreeMap<Role, Vec<ConvergenceAction>> = BTreeMap::new();
    let mut blobs: BTreeMap<ContentHash, Vec<u8>> = BTreeMap::new();

    for (&unit, record) in &snapshot.records {
        let unit_role = role_for_unit(unit);

        // File payloads first, so staged files precede any fact-derived
        // command that reads them. Hash in parallel, store once per
        // distinct content.
        let mut hashed: Vec<(String, ContentHash)> = record
            .files
            .par_iter()
            .map(|(slot, payload)| (slot.clone(), ContentHash::of(payload)))
            .collect();
        hashed.sort();
        for (slot, hash) in hashed {
            blobs
                .entry(hash)
                .or_insert_with(|| record.files[&slot].clone());
            roles
                .entry(unit_role)
                .or_default()
                .push(file_action(unit, &slot, hash));
        }

        // Facts, through the fixed lookup table.
        for (key, value) in &record.facts {
            let rule = table::rule_for(unit, key).ok_or_else(|| {
                Error::validation(
                    unit_role.to_string(),
                    key,
                    "no normalize rule for this fact",
                )
            })?;
            let actions = (rule.build)(value)
                .map_err(|msg| Error::validation(rule.role.to_string(), key, msg))?;
            debug!(%unit, key, count = actions.len(), "fact normalized");
            roles.entry(rule.role).or_default().extend(actions);
        }

        // Findings: one manual-only action each, id carried through.
        for finding in &record.findings {
            roles
                .entry(role_for_unit(finding.unit))
                .or_default()
                .push(ConvergenceAction::from_finding(finding));
        }
    }

    let mut model = TargetStateModel::new(&snapshot.manifest.hostname);
    model.model.generated = snapshot.manifest.date;
    for (role, actions) in roles {
        if actions.is_empty() {
            continue;
        }
        model.roles.insert(role, RoleSpec { actions });
    }

    model.validate_blob_refs(&blobs)?;
    info!(
        roles = model.roles.len(),
        actions = model.action_count(),
        blobs = blobs.len(),
        "normalize complete"
    );
    Ok(NormalizedState { model, blobs })
}

/// Build the `ensure-file-present` action for one captured payload.
fn file_action(unit: UnitName, slot: &str, hash: ContentHash) -> ConvergenceAction {
    // Executables under ~/.local/bin keep their execute bit; everything
    // else takes the target's default mode.
    let mode = if slot.starts_with("~/.local/bin/") {
        Some(0o755)
    } else {
        None
    };
    let mut action = ConvergenceAction::new(
        slot.to_string(),
        ActionKind::EnsureFilePresent {
            path: slot.to_string(),
            blob: hash,
            mode,
        },
    );
    // System paths need privilege; audio config is pointless without an
    // audio stack.
    if !slot.starts_with("~/") {
        action = action.with_precondition(Capability::Privileged);
    } else if unit == UnitName::Audio {
        action = action.with_precondition(Capability::Audio);
    }
    action
}
