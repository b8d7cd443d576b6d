use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::layout::InstallLayout;
use crate::runner::{CommandRunner, CommandSpec};

const DESKTOP_VALIDATOR: &str = "desktop-file-validate";
const WAYLAND_ENV: &[&str] = &[
    "GDK_BACKEND=wayland,x11",
    "QT_QPA_PLATFORM=wayland;xcb",
    "SDL_VIDEODRIVER=wayland,x11",
    "ELECTRON_OZONE_PLATFORM_HINT=auto",
];

/// Fields of a generated application-menu entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesktopEntry {
    pub name: String,
    pub exec: String,
    pub icon: Option<String>,
    pub comment: Option<String>,
    pub categories: Vec<String>,
    pub terminal: bool,
}

pub trait DesktopIntegration {
    /// Writes (or overwrites) the menu entry for `install_id`.
    fn write_entry(&self, install_id: &str, entry: &DesktopEntry) -> Result<PathBuf>;

    /// Lints a written entry. Callers treat failures as warnings.
    fn validate_entry(&self, path: &Path) -> Result<()>;
}

pub struct FreedesktopDesktop {
    layout: InstallLayout,
    runner: Arc<dyn CommandRunner>,
    validate_timeout: Duration,
}

impl FreedesktopDesktop {
    pub fn new(
        layout: InstallLayout,
        runner: Arc<dyn CommandRunner>,
        validate_timeout: Duration,
    ) -> Self {
        Self {
            layout,
            runner,
            validate_timeout,
        }
    }
}

impl DesktopIntegration for FreedesktopDesktop {
    fn write_entry(&self, install_id: &str, entry: &DesktopEntry) -> Result<PathBuf> {
        let path = self.layout.desktop_entry_path(install_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create applications dir: {}", parent.display())
            })?;
        }
        fs::write(&path, render_desktop_entry(install_id, entry))
            .with_context(|| format!("failed writing desktop entry: {}", path.display()))?;
        Ok(path)
    }

    fn validate_entry(&self, path: &Path) -> Result<()> {
        if !self.runner.exists(DESKTOP_VALIDATOR) {
            debug!(tool = DESKTOP_VALIDATOR, "validator not installed; skipping");
            return Ok(());
        }
        let spec = CommandSpec::new(DESKTOP_VALIDATOR, self.validate_timeout).arg(path);
        self.runner
            .run(&spec)
            .map(|_| ())
            .map_err(|err| anyhow!(err))
            .with_context(|| format!("desktop entry did not validate: {}", path.display()))
    }
}

pub fn render_desktop_entry(install_id: &str, entry: &DesktopEntry) -> String {
    let mut desktop = String::new();
    desktop.push_str("[Desktop Entry]\n");
    desktop.push_str("Type=Application\n");
    desktop.push_str(&format!("Name={}\n", sanitize_value(&entry.name)));
    desktop.push_str(&format!("Exec={}\n", sanitize_value(&entry.exec)));
    if let Some(icon) = &entry.icon {
        desktop.push_str(&format!("Icon={}\n", sanitize_value(icon)));
    }
    if let Some(comment) = entry.comment.as_deref().filter(|c| !c.trim().is_empty()) {
        desktop.push_str(&format!("Comment={}\n", sanitize_value(comment)));
    }
    let categories = entry
        .categories
        .iter()
        .map(|category| sanitize_list_token(category))
        .filter(|category| !category.is_empty())
        .collect::<Vec<_>>();
    if !categories.is_empty() {
        desktop.push_str(&format!("Categories={};\n", categories.join(";")));
    }
    desktop.push_str(&format!("Terminal={}\n", entry.terminal));
    desktop.push_str(&format!("X-Localpack-Id={install_id}\n"));
    desktop
}

/// `Exec=` value for a materialized executable.
///
/// With `inject_wayland` the command runs through `env` with the toolkit
/// variables that prefer Wayland and fall back to X11.
pub fn launch_command(executable: &Path, inject_wayland: bool) -> String {
    let quoted = format!("\"{}\" %U", escape_exec_arg(&executable.display().to_string()));
    if !inject_wayland {
        return quoted;
    }
    let env = WAYLAND_ENV
        .iter()
        .map(|assignment| {
            if assignment.contains(';') {
                format!("\"{assignment}\"")
            } else {
                (*assignment).to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ");
    format!("env {env} {quoted}")
}

fn escape_exec_arg(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '"' | '`' | '$' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn sanitize_value(value: &str) -> String {
    value
        .chars()
        .map(|ch| if ch == '\n' || ch == '\r' { ' ' } else { ch })
        .collect::<String>()
        .trim()
        .to_string()
}

fn sanitize_list_token(value: &str) -> String {
    value
        .chars()
        .map(|ch| {
            if ch == '\n' || ch == '\r' || ch == ';' {
                '_'
            } else {
                ch
            }
        })
        .collect::<String>()
        .trim()
        .to_string()
}
