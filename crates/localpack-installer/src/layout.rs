use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::icons::IconSize;

pub const HICOLOR_THEME: &str = "hicolor";

/// Every directory the installer writes to, resolved once up front and
/// handed to each backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
    bin_dir: PathBuf,
    apps_dir: PathBuf,
    applications_dir: PathBuf,
    icons_dir: PathBuf,
    state_dir: PathBuf,
}

impl InstallLayout {
    pub fn new(
        bin_dir: impl Into<PathBuf>,
        apps_dir: impl Into<PathBuf>,
        applications_dir: impl Into<PathBuf>,
        icons_dir: impl Into<PathBuf>,
        state_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            bin_dir: bin_dir.into(),
            apps_dir: apps_dir.into(),
            applications_dir: applications_dir.into(),
            icons_dir: icons_dir.into(),
            state_dir: state_dir.into(),
        }
    }

    /// Standard per-user locations below `home`, with `data_home`
    /// defaulting to `~/.local/share`.
    pub fn for_home(home: &Path, data_home: Option<&Path>) -> Self {
        let data_home = data_home
            .map(Path::to_path_buf)
            .unwrap_or_else(|| home.join(".local").join("share"));
        Self {
            bin_dir: home.join(".local").join("bin"),
            apps_dir: data_home.join("localpack").join("apps"),
            applications_dir: data_home.join("applications"),
            icons_dir: data_home.join("icons"),
            state_dir: data_home.join("localpack").join("state"),
        }
    }

    /// Single-root layout, mostly useful for tests and portable installs.
    pub fn under_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self::new(
            root.join("bin"),
            root.join("apps"),
            root.join("applications"),
            root.join("icons"),
            root.join("state"),
        )
    }

    pub fn with_bin_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.bin_dir = dir.into();
        self
    }

    pub fn with_apps_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.apps_dir = dir.into();
        self
    }

    pub fn with_applications_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.applications_dir = dir.into();
        self
    }

    pub fn with_icons_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.icons_dir = dir.into();
        self
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    pub fn bin_dir(&self) -> &Path {
        &self.bin_dir
    }

    pub fn apps_dir(&self) -> &Path {
        &self.apps_dir
    }

    pub fn applications_dir(&self) -> &Path {
        &self.applications_dir
    }

    pub fn icons_dir(&self) -> &Path {
        &self.icons_dir
    }

    pub fn hicolor_dir(&self) -> PathBuf {
        self.icons_dir.join(HICOLOR_THEME)
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn installed_state_dir(&self) -> PathBuf {
        self.state_dir.join("installed")
    }

    pub fn tmp_state_dir(&self) -> PathBuf {
        self.state_dir.join("tmp")
    }

    pub fn record_path(&self, install_id: &str) -> PathBuf {
        self.installed_state_dir().join(format!("{install_id}.toml"))
    }

    pub fn binary_path(&self, install_id: &str) -> PathBuf {
        self.bin_dir.join(install_id)
    }

    pub fn app_dir(&self, install_id: &str) -> PathBuf {
        self.apps_dir.join(install_id)
    }

    pub fn desktop_entry_path(&self, install_id: &str) -> PathBuf {
        self.applications_dir.join(format!("{install_id}.desktop"))
    }

    pub fn icon_path(&self, install_id: &str, size: IconSize, extension: &str) -> PathBuf {
        self.hicolor_dir()
            .join(size.dir_name())
            .join("apps")
            .join(format!("{install_id}.{extension}"))
    }

    /// Roots the installer owns artifacts under; uninstall refuses to touch
    /// anything outside them.
    pub fn managed_roots(&self) -> [&Path; 4] {
        [
            &self.bin_dir,
            &self.apps_dir,
            &self.applications_dir,
            &self.icons_dir,
        ]
    }
}

/// Per-user layout from `HOME` and `XDG_DATA_HOME`.
///
/// A missing home directory is reported here, once, instead of at every
/// path lookup.
pub fn default_user_layout() -> Result<InstallLayout> {
    let home = std::env::var_os("HOME")
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .context("HOME is not set; cannot resolve user install locations")?;
    let data_home = std::env::var_os("XDG_DATA_HOME")
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .filter(|path| path.is_absolute());
    Ok(InstallLayout::for_home(&home, data_home.as_deref()))
}
