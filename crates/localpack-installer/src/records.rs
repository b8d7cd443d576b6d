use anyhow::{Context, Result};
use localpack_core::InstallRecord;
use std::fs;
use std::io;
use std::path::PathBuf;

use crate::layout::InstallLayout;

/// Persistent index of installs keyed by install id.
pub trait RecordStore {
    fn save(&self, record: &InstallRecord) -> Result<PathBuf>;

    fn load(&self, install_id: &str) -> Result<Option<InstallRecord>>;

    /// Returns whether a record existed.
    fn remove(&self, install_id: &str) -> Result<bool>;

    fn list(&self) -> Result<Vec<InstallRecord>>;
}

/// One TOML document per install under `state/installed/<id>.toml`.
#[derive(Debug, Clone)]
pub struct FileRecordStore {
    layout: InstallLayout,
}

impl FileRecordStore {
    pub fn new(layout: InstallLayout) -> Self {
        Self { layout }
    }
}

impl RecordStore for FileRecordStore {
    fn save(&self, record: &InstallRecord) -> Result<PathBuf> {
        let dir = self.layout.installed_state_dir();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create record directory: {}", dir.display()))?;

        let path = self.layout.record_path(&record.install_id);
        let staging = path.with_extension("toml.tmp");
        let payload = record.to_toml_string()?;
        fs::write(&staging, payload.as_bytes())
            .with_context(|| format!("failed to write install record: {}", staging.display()))?;
        fs::rename(&staging, &path)
            .with_context(|| format!("failed to move install record into place: {}", path.display()))?;
        Ok(path)
    }

    fn load(&self, install_id: &str) -> Result<Option<InstallRecord>> {
        let path = self.layout.record_path(install_id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read install record: {}", path.display()))
            }
        };
        let record = InstallRecord::from_toml_str(&raw)
            .with_context(|| format!("failed to parse install record: {}", path.display()))?;
        Ok(Some(record))
    }

    fn remove(&self, install_id: &str) -> Result<bool> {
        let path = self.layout.record_path(install_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err)
                .with_context(|| format!("failed to remove install record: {}", path.display())),
        }
    }

    fn list(&self) -> Result<Vec<InstallRecord>> {
        let dir = self.layout.installed_state_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for entry in fs::read_dir(&dir)
            .with_context(|| format!("failed to read record directory: {}", dir.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|v| v.to_str()) != Some("toml") {
                continue;
            }
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read install record: {}", path.display()))?;
            let record = InstallRecord::from_toml_str(&raw)
                .with_context(|| format!("failed to parse install record: {}", path.display()))?;
            records.push(record);
        }

        records.sort_by(|a, b| a.install_id.cmp(&b.install_id));
        Ok(records)
    }
}
