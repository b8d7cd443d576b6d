use std::path::PathBuf;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::package::PackageType;

/// How the payload reached its destination.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum InstallMethod {
    /// Single executable copied into the binaries directory.
    Copy,
    /// Archive tree unpacked into the apps directory with a launcher link.
    Extract,
}

impl InstallMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Extract => "extract",
        }
    }
}

/// Display-protocol handling applied to the menu entry's launch command.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum WaylandSupport {
    EnvInjected,
    Unmodified,
    NoDesktopEntry,
}

impl WaylandSupport {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EnvInjected => "env-injected",
            Self::Unmodified => "unmodified",
            Self::NoDesktopEntry => "no-desktop-entry",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordMetadata {
    pub install_method: InstallMethod,
    pub wayland_support: WaylandSupport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec_link: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default)]
    pub icon_files: Vec<PathBuf>,
    #[serde(default)]
    pub categories: Vec<String>,
}

/// Persisted description of one successful install.
///
/// `install_path`, `desktop_files`, `metadata.icon_files` and
/// `metadata.exec_link` only ever name paths the installer created itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallRecord {
    pub install_id: String,
    pub package_type: PackageType,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub installed_at_unix: u64,
    pub original_file: PathBuf,
    pub install_path: PathBuf,
    #[serde(default)]
    pub desktop_files: Vec<PathBuf>,
    pub metadata: RecordMetadata,
}

impl InstallRecord {
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        toml::from_str(input).context("failed to parse install record")
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).with_context(|| {
            format!("failed to serialize install record '{}'", self.install_id)
        })
    }

    /// Every filesystem path this record claims ownership of.
    pub fn owned_paths(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if !self.install_path.as_os_str().is_empty() {
            paths.push(self.install_path.clone());
        }
        if let Some(link) = &self.metadata.exec_link {
            paths.push(link.clone());
        }
        paths.extend(self.desktop_files.iter().cloned());
        paths.extend(self.metadata.icon_files.iter().cloned());
        paths
    }
}
