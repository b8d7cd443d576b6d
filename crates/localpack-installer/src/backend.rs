use localpack_core::{InstallOptions, InstallRecord, PackageType};
use std::io;
use std::path::{Path, PathBuf};

use crate::context::InstallContext;
use crate::error::InstallError;
use crate::metadata::{find_bundled_desktop_file, read_desktop_metadata, PackageMetadata};
use crate::transaction::Transaction;
use crate::uninstall::{uninstall_record, UninstallReport};
use crate::workflow::install_with_format;

/// A package format the manager can dispatch to.
pub trait Backend {
    fn package_type(&self) -> PackageType;

    /// Soft classification: `Ok(false)` for missing or foreign files.
    fn detect(&self, path: &Path) -> io::Result<bool>;

    /// Installs `path`; every mutation is registered with `tx` when given.
    fn install(
        &self,
        path: &Path,
        options: &InstallOptions,
        tx: Option<&mut Transaction>,
    ) -> Result<InstallRecord, InstallError>;

    fn uninstall(&self, record: &InstallRecord) -> UninstallReport;
}

/// What a format produced in its private scratch directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// One self-contained executable, copied to the binaries directory.
    File(PathBuf),
    /// An unpacked tree, copied to the apps directory and linked into the
    /// binaries directory.
    Tree(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedPayload {
    pub payload: Payload,
    /// Unpacked content searched for bundled menu entries and icons.
    pub content_root: Option<PathBuf>,
    /// Metadata the container itself carries (control file, rpm header).
    pub intrinsic: PackageMetadata,
}

impl StagedPayload {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            payload: Payload::File(path.into()),
            content_root: None,
            intrinsic: PackageMetadata::default(),
        }
    }

    pub fn tree(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            payload: Payload::Tree(root.clone()),
            content_root: Some(root),
            intrinsic: PackageMetadata::default(),
        }
    }

    pub fn with_content_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.content_root = Some(root.into());
        self
    }

    pub fn with_intrinsic(mut self, metadata: PackageMetadata) -> Self {
        self.intrinsic = metadata;
        self
    }
}

/// The per-format strategy the shared workflow is parameterized by.
pub trait PackageFormat {
    fn package_type(&self) -> PackageType;

    fn detect(&self, path: &Path) -> io::Result<bool>;

    /// Copies or unpacks `source` below `scratch`. Nothing outside
    /// `scratch` may be touched.
    fn stage(
        &self,
        ctx: &InstallContext,
        source: &Path,
        scratch: &Path,
    ) -> Result<StagedPayload, InstallError>;

    /// Best-effort metadata; a bundled menu entry wins over container data.
    fn parse_metadata(&self, staged: &StagedPayload) -> PackageMetadata {
        let bundled = staged
            .content_root
            .as_deref()
            .and_then(find_bundled_desktop_file)
            .map(|path| read_desktop_metadata(&path))
            .unwrap_or_default();
        bundled.merge(staged.intrinsic.clone())
    }
}

/// Adapts a [`PackageFormat`] to the [`Backend`] contract through the
/// shared install workflow.
pub struct FormatBackend<F> {
    format: F,
    ctx: InstallContext,
}

impl<F: PackageFormat> FormatBackend<F> {
    pub fn new(format: F, ctx: InstallContext) -> Self {
        Self { format, ctx }
    }

    pub fn format(&self) -> &F {
        &self.format
    }
}

impl<F: PackageFormat> Backend for FormatBackend<F> {
    fn package_type(&self) -> PackageType {
        self.format.package_type()
    }

    fn detect(&self, path: &Path) -> io::Result<bool> {
        self.format.detect(path)
    }

    fn install(
        &self,
        path: &Path,
        options: &InstallOptions,
        tx: Option<&mut Transaction>,
    ) -> Result<InstallRecord, InstallError> {
        install_with_format(&self.format, &self.ctx, path, options, tx)
    }

    fn uninstall(&self, record: &InstallRecord) -> UninstallReport {
        uninstall_record(&self.ctx, record)
    }
}
