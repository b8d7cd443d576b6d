use localpack_core::{normalize_name, validate_identifier, InstallOptions, InstallRecord, PackageType};
use std::path::Path;
use tracing::{info, warn};

use crate::context::InstallContext;
use crate::error::InstallError;
use crate::records::{FileRecordStore, RecordStore};
use crate::registry::BackendRegistry;
use crate::transaction::Transaction;
use crate::uninstall::{uninstall_record, UninstallReport};

/// Entry point tying detection, installation, records and removal
/// together.
pub struct PackageManager {
    ctx: InstallContext,
    registry: BackendRegistry,
    store: Box<dyn RecordStore>,
}

impl PackageManager {
    pub fn new(ctx: InstallContext) -> Self {
        let store = Box::new(FileRecordStore::new(ctx.layout.clone()));
        Self::with_store(ctx, store)
    }

    pub fn with_store(ctx: InstallContext, store: Box<dyn RecordStore>) -> Self {
        Self {
            registry: BackendRegistry::new(ctx.clone()),
            ctx,
            store,
        }
    }

    pub fn context(&self) -> &InstallContext {
        &self.ctx
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn detect(&self, path: &Path) -> Result<PackageType, InstallError> {
        ensure_source_exists(path)?;
        Ok(self.registry.detect_backend(path)?.package_type())
    }

    /// Installs under a transaction: any failure, including failing to
    /// persist the record, rolls back every mutation already applied.
    pub fn install(
        &self,
        path: &Path,
        options: &InstallOptions,
    ) -> Result<InstallRecord, InstallError> {
        ensure_source_exists(path)?;
        let backend = self.registry.detect_backend(path)?;

        let mut tx = Transaction::new(format!("install {}", path.display()));
        let result = backend
            .install(path, options, Some(&mut tx))
            .and_then(|record| {
                self.store.save(&record).map_err(InstallError::Record)?;
                Ok(record)
            });

        match result {
            Ok(record) => {
                tx.commit();
                Ok(record)
            }
            Err(err) => {
                warn!(error = %err, "install failed; rolling back");
                let report = tx.rollback();
                if !report.is_clean() {
                    warn!(
                        failures = report.failures.len(),
                        attempted = report.attempted,
                        "rollback left artifacts behind"
                    );
                }
                Err(err)
            }
        }
    }

    /// Installs without rollback tracking; a failure may leave partial
    /// artifacts behind.
    pub fn install_untracked(
        &self,
        path: &Path,
        options: &InstallOptions,
    ) -> Result<InstallRecord, InstallError> {
        ensure_source_exists(path)?;
        let backend = self.registry.detect_backend(path)?;
        let record = backend.install(path, options, None)?;
        self.store.save(&record).map_err(InstallError::Record)?;
        Ok(record)
    }

    pub fn uninstall(&self, install_id: &str) -> Result<UninstallReport, InstallError> {
        let record = self
            .get(install_id)?
            .ok_or_else(|| InstallError::NotInstalled {
                id: install_id.to_string(),
            })?;

        let report = match self.registry.backend_for(record.package_type) {
            Some(backend) => backend.uninstall(&record),
            None => uninstall_record(&self.ctx, &record),
        };
        self.store
            .remove(&record.install_id)
            .map_err(InstallError::Record)?;
        info!(
            install_id = %record.install_id,
            removed = report.removed.len(),
            warnings = report.warnings.len(),
            "uninstalled"
        );
        Ok(report)
    }

    pub fn list(&self) -> Result<Vec<InstallRecord>, InstallError> {
        self.store.list().map_err(InstallError::Record)
    }

    /// Looks a record up by id, accepting the display name too.
    pub fn get(&self, install_id: &str) -> Result<Option<InstallRecord>, InstallError> {
        for candidate in [install_id.to_string(), normalize_name(install_id)] {
            if validate_identifier(&candidate).is_err() {
                continue;
            }
            if let Some(record) = self.store.load(&candidate).map_err(InstallError::Record)? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }
}

fn ensure_source_exists(path: &Path) -> Result<(), InstallError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(InstallError::NotFound {
            path: path.to_path_buf(),
        })
    }
}
