use localpack_core::PackageType;
use std::io;
use std::path::Path;

use crate::backend::{PackageFormat, StagedPayload};
use crate::context::InstallContext;
use crate::detect::is_plain_binary;
use crate::error::InstallError;
use crate::metadata::PackageMetadata;

/// A standalone ELF executable, installed as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryFormat;

impl PackageFormat for BinaryFormat {
    fn package_type(&self) -> PackageType {
        PackageType::Binary
    }

    fn detect(&self, path: &Path) -> io::Result<bool> {
        is_plain_binary(path)
    }

    fn stage(
        &self,
        _ctx: &InstallContext,
        source: &Path,
        _scratch: &Path,
    ) -> Result<StagedPayload, InstallError> {
        Ok(StagedPayload::file(source))
    }

    fn parse_metadata(&self, _staged: &StagedPayload) -> PackageMetadata {
        PackageMetadata::default()
    }
}
