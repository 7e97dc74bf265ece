// src/snapshot/mod.rs

//! Snapshot: the portable, structured image of one machine's state.
//!
//! A snapshot is written once by the capture engine and never mutated. It is
//! the sole contract between the machine that runs capture and the machine
//! that runs normalize, so the on-disk layout is stable:
//!
//! ```text
//! snapshot/
//!   manifest.json          # machine identity + per-unit status
//!   <unit>/
//!     facts.json           # key -> structured value
//!     findings.json        # items capture could not fully resolve
//!     files/<rel-path>     # payloads to place verbatim on the target
//! ```
//!
//! All maps are BTree-ordered so repeated captures of an unchanged machine
//! produce byte-identical snapshots (modulo the manifest timestamp).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use strum_macros::{Display, EnumIter, EnumString};
use walkdir::WalkDir;

use crate::{Error, Result};

/// The closed set of capture units. Unknown unit names in a snapshot
/// directory are rejected on load.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UnitName {
    Package,
    Repo,
    Shell,
    Desktop,
    Dotfile,
    System,
    Devtool,
    Audio,
    Thirdparty,
    Hardware,
}

impl UnitName {
    pub fn all() -> Vec<UnitName> {
        use strum::IntoEnumIterator;
        Self::iter().collect()
    }
}

/// A capture-time fact that could not be fully resolved automatically.
///
/// Findings carry a stable id (`<unit>:<item>`) so the no-silent-loss
/// invariant is checkable: every finding in a snapshot maps to exactly one
/// manual-only action in the normalized model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub unit: UnitName,
    pub item: String,
    pub reason: String,
}

impl Finding {
    pub fn new(unit: UnitName, item: impl Into<String>, reason: impl Into<String>) -> Self {
        let item = item.into();
        Self {
            id: format!("{unit}:{item}"),
            unit,
            item,
            reason: reason.into(),
        }
    }
}

/// Per-unit capture result: verbatim file payloads, structured facts, and
/// findings. Owned exclusively by its snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureRecord {
    /// Relative path slot -> payload bytes. `~/`-prefixed slots resolve
    /// under the target user's home; others are absolute.
    #[serde(skip)]
    pub files: BTreeMap<String, Vec<u8>>,
    pub facts: BTreeMap<String, Value>,
    pub findings: Vec<Finding>,
}

impl CaptureRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, slot: impl Into<String>, payload: Vec<u8>) {
        self.files.insert(slot.into(), payload);
    }

    /// Record a structured fact. Serialization of the closed fact types
    /// cannot fail, so this takes any `Serialize`.
    pub fn set_fact(&mut self, key: impl Into<String>, value: impl Serialize) {
        if let Ok(v) = serde_json::to_value(value) {
            self.facts.insert(key.into(), v);
        }
    }

    pub fn push_finding(&mut self, finding: Finding) {
        self.findings.push(finding);
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.facts.is_empty() && self.findings.is_empty()
    }
}

/// How a unit's capture ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Ok,
    Failed,
    TimedOut,
}

/// Machine identity recorded at capture time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub hostname: String,
    pub username: String,
    pub home: String,
    /// Capture timestamp, UTC ISO-8601. Excluded from content equality.
    pub date: DateTime<Utc>,
    pub os_version: Option<String>,
    pub kernel: Option<String>,
    pub arch: Option<String>,
    pub desktop: Option<String>,
    pub display_server: Option<String>,
    pub desktop_shell_version: Option<String>,
    pub shell: Option<String>,
    /// Per-unit capture status; a degraded capture is self-describing.
    pub units: BTreeMap<UnitName, UnitStatus>,
}

/// Immutable image of one machine, created in a single capture pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub manifest: Manifest,
    pub records: BTreeMap<UnitName, CaptureRecord>,
}

impl Snapshot {
    pub fn record(&self, unit: UnitName) -> Option<&CaptureRecord> {
        self.records.get(&unit)
    }

    /// All findings across units, in unit order.
    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.records.values().flat_map(|r| r.findings.iter())
    }

    /// Equality modulo the manifest timestamp; the capture determinism
    /// property compares snapshots with this.
    pub fn content_equal(&self, other: &Snapshot) -> bool {
        let mut other_manifest = other.manifest.clone();
        other_manifest.date = self.manifest.date;
        self.manifest == other_manifest && self.records == other.records
    }

    /// Persist to a directory. Unit subdirectories are written in sorted
    /// order; payloads land verbatim under `files/`.
    pub fn write(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        let manifest_json = serde_json::to_vec_pretty(&self.manifest)?;
        fs::write(dir.join("manifest.json"), manifest_json)?;

        for (unit, record) in &self.records {
            let unit_dir = dir.join(unit.to_string());
            fs::create_dir_all(&unit_dir)?;
            fs::write(
                unit_dir.join("facts.json"),
                serde_json::to_vec_pretty(&record.facts)?,
            )?;
            fs::write(
                unit_dir.join("findings.json"),
                serde_json::to_vec_pretty(&record.findings)?,
            )?;
            for (slot, payload) in &record.files {
                // Slots must never escape the snapshot directory: home
                // slots land under files/home/, absolute ones under
                // files/root/.
                let rel = match slot.strip_prefix("~/") {
                    Some(rel) => Path::new("home").join(rel),
                    None => Path::new("root").join(slot.trim_start_matches('/')),
                };
                let path = unit_dir.join("files").join(rel);
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(path, payload)?;
            }
        }
        Ok(())
    }

    /// Load a snapshot directory. Directory names that are not capture
    /// units are a schema violation, not something to skip silently.
    pub fn read(dir: &Path) -> Result<Snapshot> {
        let manifest_path = dir.join("manifest.json");
        if !manifest_path.is_file() {
            return Err(Error::MissingManifest(dir.to_path_buf()));
        }
        let manifest: Manifest = serde_json::from_slice(&fs::read(manifest_path)?)?;

        let mut records = BTreeMap::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let unit: UnitName = name
                .parse()
                .map_err(|_| Error::UnknownUnit(name.clone()))?;

            let unit_dir = entry.path();
            let mut record = CaptureRecord::new();
            let facts_path = unit_dir.join("facts.json");
            if facts_path.is_file() {
                record.facts = serde_json::from_slice(&fs::read(facts_path)?)?;
            }
            let findings_path = unit_dir.join("findings.json");
            if findings_path.is_file() {
                record.findings = serde_json::from_slice(&fs::read(findings_path)?)?;
            }
            let files_dir = unit_dir.join("files");
            if files_dir.is_dir() {
                for file in WalkDir::new(&files_dir)
                    .sort_by_file_name()
                    .into_iter()
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().is_file())
                {
                    let rel = file
                        .path()
                        .strip_prefix(&files_dir)
                        .map_err(|e| Error::Other(e.to_string()))?;
                    let slot = if let Ok(home_rel) = rel.strip_prefix("home") {
                        format!("~/{}", home_rel.to_string_lossy())
                    } else if let Ok(root_rel) = rel.strip_prefix("root") {
                        format!("/{}", root_rel.to_string_lossy())
                    } else {
                        return Err(Error::Other(format!(
                            "unexpected file entry '{}' in snapshot",
                            rel.display()
                        )));
                    };
                    record.files.insert(slot, fs::read(file.path())?);
                }
            }
            records.insert(unit, record);
        }

        Ok(Snapshot { manifest, records })
    }
}
