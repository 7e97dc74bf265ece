// src/capture/devtools.rs

//! Devtool unit: version managers and their installed toolchains.

use super::{fact_lines, list_dir_names};
use crate::context::ExecutionContext;
use crate::probe::VersionManager;
use crate::snapshot::{CaptureRecord, UnitName};
use crate::Result;

const UNIT: UnitName = UnitName::Devtool;

pub fn capture(ctx: &ExecutionContext) -> Result<CaptureRecord> {
    let mut record = CaptureRecord::new();
    if ctx.caps.version_managers.is_empty() && !has_container_tool(ctx) {
        return Ok(record);
    }

    let managers: Vec<String> = ctx
        .caps
        .version_managers
        .iter()
        .map(|vm| vm.to_string())
        .collect();
    if !managers.is_empty() {
        record.set_fact("version_managers", managers);
    }

    for vm in &ctx.caps.version_managers {
        match vm {
            VersionManager::Rustup => {
                if let Some(toolchains) = fact_lines(
                    ctx,
                    &mut record,
                    UNIT,
                    "rustup_toolchains",
                    "rustup",
                    &["toolchain", "list"],
                ) {
                    let names: Vec<String> = toolchains
                        .iter()
                        .map(|l| l.trim_end_matches(" (default)").to_string())
                        .collect();
                    record.set_fact("rustup_toolchains", names);
                }
            }
            VersionManager::Pyenv => {
                if let Some(versions) = fact_lines(
                    ctx,
                    &mut record,
                    UNIT,
                    "pyenv_versions",
                    "pyenv",
                    &["versions", "--bare"],
                ) {
                    record.set_fact("pyenv_versions", versions);
                }
            }
            // Shell-function managers keep versions as plain directories.
            VersionManager::Nvm => {
                let versions = list_dir_names(&ctx.home_path(".nvm/versions/node"));
                if !versions.is_empty() {
                    record.set_fact("nvm_node_versions", versions);
                }
            }
            VersionManager::Sdkman => {
                let candidates = list_dir_names(&ctx.home_path(".sdkman/candidates"));
                if !candidates.is_empty() {
                    record.set_fact("sdkman_candidates", candidates);
                }
            }
        }
    }

    let mut containers = Vec::new();
    for tool in ["podman", "docker"] {
        if ctx.runner.has_binary(tool) {
            containers.push(tool.to_string());
        }
    }
    if !containers.is_empty() {
        record.set_fact("container_tools", containers);
    }

    Ok(record)
}

fn has_container_tool(ctx: &ExecutionContext) -> bool {
    ["podman", "docker"].iter().any(|t| ctx.runner.has_binary(t))
}
