use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::runner::{CommandRunner, CommandSpec};

const ICON_CACHE_TOOL: &str = "gtk-update-icon-cache";
const DESKTOP_DATABASE_TOOL: &str = "update-desktop-database";

/// Refreshes desktop-environment caches after icons or menu entries change.
///
/// Implementations never fail an install: problems are logged and swallowed.
pub trait CacheRefresher {
    fn refresh_icon_cache(&self, hicolor_dir: &Path);

    fn refresh_desktop_database(&self, applications_dir: &Path);
}

pub struct SystemCacheRefresher {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl SystemCacheRefresher {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    fn run_tool(&self, tool: &str, spec: CommandSpec) {
        if !self.runner.exists(tool) {
            debug!(tool, "cache tool not installed; skipping refresh");
            return;
        }
        if let Err(err) = self.runner.run(&spec) {
            warn!(tool, error = %err, "cache refresh failed; continuing");
        }
    }
}

impl CacheRefresher for SystemCacheRefresher {
    fn refresh_icon_cache(&self, hicolor_dir: &Path) {
        if !hicolor_dir.is_dir() {
            return;
        }
        let spec = CommandSpec::new(ICON_CACHE_TOOL, self.timeout)
            .args(["-f", "-t"])
            .arg(hicolor_dir);
        self.run_tool(ICON_CACHE_TOOL, spec);
    }

    fn refresh_desktop_database(&self, applications_dir: &Path) {
        if !applications_dir.is_dir() {
            return;
        }
        let spec = CommandSpec::new(DESKTOP_DATABASE_TOOL, self.timeout).arg(applications_dir);
        self.run_tool(DESKTOP_DATABASE_TOOL, spec);
    }
}

pub(crate) fn refresh_all(
    refresher: &dyn CacheRefresher,
    hicolor_dir: &Path,
    applications_dir: &Path,
) {
    refresher.refresh_icon_cache(hicolor_dir);
    refresher.refresh_desktop_database(applications_dir);
}
