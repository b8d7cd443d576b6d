use std::sync::Arc;

use crate::cache::{CacheRefresher, SystemCacheRefresher};
use crate::desktop::{DesktopIntegration, FreedesktopDesktop};
use crate::icons::{HicolorIcons, IconInstaller};
use crate::layout::InstallLayout;
use crate::runner::{CommandRunner, Timeouts};

/// Everything a backend needs, injected by the caller.
#[derive(Clone)]
pub struct InstallContext {
    pub layout: InstallLayout,
    pub timeouts: Timeouts,
    pub runner: Arc<dyn CommandRunner>,
    pub desktop: Arc<dyn DesktopIntegration>,
    pub icons: Arc<dyn IconInstaller>,
    pub cache: Arc<dyn CacheRefresher>,
}

impl InstallContext {
    /// Wires the freedesktop collaborators to `runner`.
    pub fn new(layout: InstallLayout, timeouts: Timeouts, runner: Arc<dyn CommandRunner>) -> Self {
        let desktop = Arc::new(FreedesktopDesktop::new(
            layout.clone(),
            Arc::clone(&runner),
            timeouts.validate,
        ));
        let icons = Arc::new(HicolorIcons::new(layout.clone()));
        let cache = Arc::new(SystemCacheRefresher::new(
            Arc::clone(&runner),
            timeouts.cache_refresh,
        ));
        Self {
            layout,
            timeouts,
            runner,
            desktop,
            icons,
            cache,
        }
    }

    pub fn with_desktop(mut self, desktop: Arc<dyn DesktopIntegration>) -> Self {
        self.desktop = desktop;
        self
    }

    pub fn with_icons(mut self, icons: Arc<dyn IconInstaller>) -> Self {
        self.icons = icons;
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheRefresher>) -> Self {
        self.cache = cache;
        self
    }
}

impl std::fmt::Debug for InstallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallContext")
            .field("layout", &self.layout)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}
