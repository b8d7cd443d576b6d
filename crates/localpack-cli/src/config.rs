use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use localpack_installer::{InstallLayout, Timeouts};
use serde::Deserialize;

const CONFIG_DIR: &str = "localpack";
const CONFIG_FILE: &str = "config.toml";

/// Optional `config.toml` contents. Every field falls back to the built-in
/// default when absent.
#[derive(Debug, Default, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct Config {
    pub(crate) paths: PathOverrides,
    pub(crate) timeouts: TimeoutOverrides,
}

#[derive(Debug, Default, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct PathOverrides {
    pub(crate) bin_dir: Option<PathBuf>,
    pub(crate) apps_dir: Option<PathBuf>,
    pub(crate) applications_dir: Option<PathBuf>,
    pub(crate) icons_dir: Option<PathBuf>,
    pub(crate) state_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct TimeoutOverrides {
    pub(crate) extract_secs: Option<u64>,
    pub(crate) validate_secs: Option<u64>,
    pub(crate) cache_refresh_secs: Option<u64>,
}

impl Config {
    pub(crate) fn parse(input: &str) -> Result<Self> {
        toml::from_str(input).context("failed to parse localpack config")
    }

    pub(crate) fn apply_layout(&self, layout: InstallLayout) -> InstallLayout {
        let paths = &self.paths;
        let mut layout = layout;
        if let Some(dir) = &paths.bin_dir {
            layout = layout.with_bin_dir(dir);
        }
        if let Some(dir) = &paths.apps_dir {
            layout = layout.with_apps_dir(dir);
        }
        if let Some(dir) = &paths.applications_dir {
            layout = layout.with_applications_dir(dir);
        }
        if let Some(dir) = &paths.icons_dir {
            layout = layout.with_icons_dir(dir);
        }
        if let Some(dir) = &paths.state_dir {
            layout = layout.with_state_dir(dir);
        }
        layout
    }

    pub(crate) fn timeouts(&self) -> Timeouts {
        let defaults = Timeouts::default();
        let secs = |value: Option<u64>, fallback: Duration| {
            value.map(Duration::from_secs).unwrap_or(fallback)
        };
        Timeouts {
            extract: secs(self.timeouts.extract_secs, defaults.extract),
            validate: secs(self.timeouts.validate_secs, defaults.validate),
            cache_refresh: secs(self.timeouts.cache_refresh_secs, defaults.cache_refresh),
        }
    }
}

/// Loads the config file. An explicit `--config` path must exist; the
/// default location is optional.
pub(crate) fn load_config(explicit: Option<&Path>) -> Result<Config> {
    if let Some(path) = explicit {
        return read_config(path);
    }

    let Some(path) = default_config_path(
        std::env::var_os("XDG_CONFIG_HOME").as_deref(),
        std::env::var_os("HOME").as_deref(),
    ) else {
        return Ok(Config::default());
    };
    if !path.exists() {
        return Ok(Config::default());
    }
    read_config(&path)
}

fn read_config(path: &Path) -> Result<Config> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config: {}", path.display()))?;
    Config::parse(&raw).with_context(|| format!("invalid config: {}", path.display()))
}

pub(crate) fn default_config_path(
    xdg_config_home: Option<&OsStr>,
    home: Option<&OsStr>,
) -> Option<PathBuf> {
    let xdg = xdg_config_home
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .filter(|path| path.is_absolute());
    if let Some(base) = xdg {
        return Some(base.join(CONFIG_DIR).join(CONFIG_FILE));
    }
    home.filter(|value| !value.is_empty())
        .map(|home| {
            PathBuf::from(home)
                .join(".config")
                .join(CONFIG_DIR)
                .join(CONFIG_FILE)
        })
}
