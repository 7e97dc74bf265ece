// src/capture/shell.rs

//! Shell unit: login shell, rc files, and the plugin manager.
//!
//! Plugin managers are a closed set of known variants, each carrying its own
//! detection marker and its own idempotent install command; selection is a
//! table lookup over the enum, not a conditional chain.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use super::{login_shell, read_file_slot};
use crate::context::ExecutionContext;
use crate::snapshot::{CaptureRecord, UnitName};
use crate::Result;

const UNIT: UnitName = UnitName::Shell;

/// Rc files the shell unit is allowed to read.
const RC_SLOTS: &[&str] = &[
    "~/.bashrc",
    "~/.bash_profile",
    "~/.profile",
    "~/.zshrc",
    "~/.zprofile",
    "~/.zshenv",
    "~/.aliases",
];

/// The closed set of shell/editor plugin managers the pipeline understands.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum PluginManager {
    OhMyZsh,
    Zinit,
    Antidote,
    VimPlug,
    PackerNvim,
}

impl PluginManager {
    /// Home-relative marker whose presence identifies the manager.
    pub fn marker(&self) -> &'static str {
        match self {
            Self::OhMyZsh => ".oh-my-zsh",
            Self::Zinit => ".local/share/zinit",
            Self::Antidote => ".antidote",
            Self::VimPlug => ".local/share/nvim/site/autoload/plug.vim",
            Self::PackerNvim => ".local/share/nvim/site/pack/packer",
        }
    }

    /// Idempotent command that installs the manager on the target.
    pub fn install_command(&self) -> &'static str {
        match self {
            Self::OhMyZsh => {
                "sh -c \"$(curl -fsSL https://raw.githubusercontent.com/ohmyzsh/ohmyzsh/master/tools/install.sh)\" -- --unattended"
            }
            Self::Zinit => {
                "bash -c \"$(curl -fsSL https://raw.githubusercontent.com/zdharma-continuum/zinit/HEAD/scripts/install.sh)\""
            }
            Self::Antidote => {
                "git clone --depth=1 https://github.com/mattmc3/antidote.git ~/.antidote"
            }
            Self::VimPlug => {
                "curl -fLo ~/.local/share/nvim/site/autoload/plug.vim --create-dirs https://raw.githubusercontent.com/junegunn/vim-plug/master/plug.vim"
            }
            Self::PackerNvim => {
                "git clone --depth=1 https://github.com/wbthomason/packer.nvim ~/.local/share/nvim/site/pack/packer/start/packer.nvim"
            }
        }
    }

    /// Check that proves the manager is already present on the target.
    pub fn check_command(&self) -> String {
        format!("test -e ~/{}", self.marker())
    }

    /// Detect which manager (if any) the source machine uses.
    pub fn detect(ctx: &ExecutionContext) -> Option<PluginManager> {
        use strum::IntoEnumIterator;
        Self::iter().find(|pm| ctx.home_path(pm.marker()).exists())
    }
}

pub fn capture(ctx: &ExecutionContext) -> Result<CaptureRecord> {
    let mut record = CaptureRecord::new();

    if let Some(shell) = login_shell(ctx) {
        record.set_fact("login_shell", shell);
    }
    if let Some(pm) = PluginManager::detect(ctx) {
        record.set_fact("plugin_manager", pm);
    }
    for slot in RC_SLOTS {
        read_file_slot(ctx, &mut record, UNIT, slot);
    }

    Ok(record)
}
