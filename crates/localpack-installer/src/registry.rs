use localpack_core::PackageType;
use std::path::Path;
use tracing::{debug, warn};

use crate::backend::{Backend, FormatBackend};
use crate::context::InstallContext;
use crate::error::InstallError;
use crate::formats::{AppImageFormat, BinaryFormat, DebianFormat, RpmFormat, TarballFormat};

/// Fixed, ordered set of backends. AppImage precedes Binary because every
/// AppImage is also a valid ELF executable.
pub struct BackendRegistry {
    backends: Vec<Box<dyn Backend>>,
}

impl BackendRegistry {
    pub fn new(ctx: InstallContext) -> Self {
        let backends: Vec<Box<dyn Backend>> = vec![
            Box::new(FormatBackend::new(AppImageFormat, ctx.clone())),
            Box::new(FormatBackend::new(DebianFormat, ctx.clone())),
            Box::new(FormatBackend::new(RpmFormat, ctx.clone())),
            Box::new(FormatBackend::new(TarballFormat, ctx.clone())),
            Box::new(FormatBackend::new(BinaryFormat, ctx)),
        ];
        Self { backends }
    }

    pub fn backends(&self) -> impl Iterator<Item = &dyn Backend> {
        self.backends.iter().map(|backend| backend.as_ref())
    }

    pub fn backend_for(&self, package_type: PackageType) -> Option<&dyn Backend> {
        self.backends()
            .find(|backend| backend.package_type() == package_type)
    }

    /// First backend, in registry order, that claims `path`.
    pub fn detect_backend(&self, path: &Path) -> Result<&dyn Backend, InstallError> {
        for backend in self.backends() {
            match backend.detect(path) {
                Ok(true) => {
                    debug!(
                        package_type = backend.package_type().as_str(),
                        path = %path.display(),
                        "detected package type"
                    );
                    return Ok(backend);
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(
                        package_type = backend.package_type().as_str(),
                        path = %path.display(),
                        error = %err,
                        "detection probe failed"
                    );
                }
            }
        }

        Err(InstallError::Unsupported {
            file: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            supported: self.supported_types(),
        })
    }

    pub fn supported_types(&self) -> String {
        self.backends()
            .map(|backend| backend.package_type().display_name())
            .collect::<Vec<_>>()
            .join(", ")
    }
}
