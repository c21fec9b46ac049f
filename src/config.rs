//=============================================
// fiberhost/src/config.rs
//=============================================
// Author: Fiberhost Contributors
// License: MIT
// Goal: Host configuration
// Objective: Load stack, runtime and host settings from TOML with defaults
//=============================================

//! Configuration handling including discovery and defaults.

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::fiber::ContextStack;
use crate::runtime::EntryAbi;

/// Environment variable naming an explicit configuration file.
pub const CONFIG_ENV: &str = "FIBERHOST_CONFIG";

/// File looked up beside the loaded module.
pub const CONFIG_FILE: &str = "fiberhost.toml";

/// Smallest embedded stack accepted.
pub const MIN_STACK_SIZE: usize = 64 * 1024;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct FiberConfig {
    /// Size in bytes of the embedded context's stack.
    pub stack_size: usize,
    pub runtime: RuntimeConfig,
    pub host: HostConfig,
}

impl Default for FiberConfig {
    fn default() -> Self {
        Self {
            stack_size: ContextStack::DEFAULT_SIZE,
            runtime: RuntimeConfig::default(),
            host: HostConfig::default(),
        }
    }
}

/// Where the embedded runtime lives and how its entry is called.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Backing library, relative to the module directory unless absolute.
    pub library: PathBuf,
    pub entry_symbol: String,
    pub abi: EntryAbi,
    /// Arguments after the image path.
    pub args: Vec<String>,
    /// Data folder handed to Windows-style entries.
    pub data_folder: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let (library, entry_symbol) = if cfg!(target_os = "macos") {
            ("UnityPlayer.dylib", "_Z10PlayerMainiPPKc")
        } else if cfg!(windows) {
            ("UnityPlayer.dll", "UnityMain2")
        } else {
            ("UnityPlayer.so", "PlayerMain")
        };
        Self {
            library: PathBuf::from(library),
            entry_symbol: entry_symbol.to_string(),
            abi: EntryAbi::native(),
            args: vec!["-logfile".to_string(), "-".to_string()],
            data_folder: None,
        }
    }
}

/// Behaviour of the hosting process.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct HostConfig {
    /// Replace normal process exit with an immediate `_exit`.
    pub immediate_exit: bool,
    /// Default log directive, overridden by `RUST_LOG`.
    pub log_filter: String,
    /// Tick rate of the standalone host loop.
    pub tick_fps: u32,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            immediate_exit: true,
            log_filter: "info".to_string(),
            tick_fps: 60,
        }
    }
}

impl FiberConfig {
    /// Load configuration from `path`.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading configuration from {}", path.display()))?;
        let cfg: Self = toml::from_str(&data)
            .with_context(|| format!("parsing configuration {}", path.display()))?;
        cfg.validate()
            .with_context(|| format!("validating configuration {}", path.display()))?;
        Ok(cfg)
    }

    /// Locate and load configuration: `FIBERHOST_CONFIG` first, then
    /// `fiberhost.toml` in `module_dir`, otherwise defaults. Returns the
    /// file that was used, if any.
    pub fn discover(module_dir: Option<&Path>) -> anyhow::Result<(Self, Option<PathBuf>)> {
        let explicit = env::var_os(CONFIG_ENV).map(PathBuf::from);
        Self::discover_from(explicit, module_dir)
    }

    fn discover_from(
        explicit: Option<PathBuf>,
        module_dir: Option<&Path>,
    ) -> anyhow::Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            let cfg = Self::load_from_file(&path)?;
            return Ok((cfg, Some(path)));
        }
        match module_dir.map(|dir| dir.join(CONFIG_FILE)) {
            Some(path) if path.is_file() => {
                let cfg = Self::load_from_file(&path)?;
                Ok((cfg, Some(path)))
            }
            _ => Ok((Self::default(), None)),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.stack_size < MIN_STACK_SIZE {
            bail!(
                "stack_size {} is below the minimum of {} bytes",
                self.stack_size,
                MIN_STACK_SIZE
            );
        }
        if self.runtime.entry_symbol.is_empty() {
            bail!("runtime.entry_symbol must not be empty");
        }
        Ok(())
    }

    /// Persist the configuration back to disk.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let serialized = toml::to_string_pretty(self)?;
        fs::write(path, serialized)
            .with_context(|| format!("writing configuration to {}", path.display()))?;
        Ok(())
    }
}
