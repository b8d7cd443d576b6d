use localpack_core::InstallRecord;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

use crate::cache::refresh_all;
use crate::context::InstallContext;
use crate::fs_utils::{path_occupied, remove_path_if_exists};
use crate::layout::InstallLayout;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UninstallReport {
    pub removed: Vec<PathBuf>,
    pub warnings: Vec<String>,
}

impl UninstallReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Removes every artifact a record owns. Each removal is independent: a
/// missing path counts as done, and other failures become warnings.
pub fn uninstall_record(ctx: &InstallContext, record: &InstallRecord) -> UninstallReport {
    let mut report = UninstallReport::default();
    for path in record.owned_paths() {
        let Some(path) = owned_path(&ctx.layout, &path) else {
            let warning = format!(
                "refusing to remove {}: outside the managed directories",
                path.display()
            );
            warn!(install_id = %record.install_id, "{warning}");
            report.warnings.push(warning);
            continue;
        };
        if !path_occupied(&path) {
            debug!(path = %path.display(), "already absent");
            continue;
        }
        match remove_path_if_exists(&path) {
            Ok(()) => {
                info!(path = %path.display(), "removed");
                report.removed.push(path);
            }
            Err(err) => {
                let warning = format!("failed to remove {}: {err}", path.display());
                warn!(install_id = %record.install_id, "{warning}");
                report.warnings.push(warning);
            }
        }
    }

    refresh_all(
        ctx.cache.as_ref(),
        &ctx.layout.hicolor_dir(),
        ctx.layout.applications_dir(),
    );
    report
}

/// Accepts only absolute, `..`-free paths strictly below a managed root.
fn owned_path(layout: &InstallLayout, path: &Path) -> Option<PathBuf> {
    if !path.is_absolute() {
        return None;
    }
    if path
        .components()
        .any(|component| matches!(component, Component::ParentDir))
    {
        return None;
    }
    layout
        .managed_roots()
        .iter()
        .any(|root| path != *root && path.starts_with(root))
        .then(|| path.to_path_buf())
}
