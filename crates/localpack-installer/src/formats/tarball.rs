use anyhow::anyhow;
use localpack_core::PackageType;
use std::io;
use std::path::Path;

use super::collapse_single_dir;
use crate::archive::unpack_tarball;
use crate::backend::{PackageFormat, StagedPayload};
use crate::context::InstallContext;
use crate::detect::{is_tarball, tarball_compression};
use crate::error::{ExtractionError, InstallError};
use crate::extract::{run_tool, ExtractionChain, Strategy};
use crate::runner::CommandSpec;

#[derive(Debug, Clone, Copy, Default)]
pub struct TarballFormat;

impl PackageFormat for TarballFormat {
    fn package_type(&self) -> PackageType {
        PackageType::Tarball
    }

    fn detect(&self, path: &Path) -> io::Result<bool> {
        is_tarball(path)
    }

    fn stage(
        &self,
        ctx: &InstallContext,
        source: &Path,
        scratch: &Path,
    ) -> Result<StagedPayload, InstallError> {
        let compression = tarball_compression(source)
            .map_err(ExtractionError::Scratch)?
            .ok_or(ExtractionError::Malformed {
                format: PackageType::Tarball.display_name(),
                reason: "unrecognized compression".to_string(),
            })?;
        let tree = scratch.join("tree");
        let runner = ctx.runner.as_ref();
        let timeout = ctx.timeouts.extract;

        ExtractionChain::new(PackageType::Tarball.display_name())
            .then(Strategy::in_process("tar reader", |dest| {
                let entries = unpack_tarball(source, compression, dest)?;
                if entries == 0 {
                    return Err(anyhow!("archive is empty").into());
                }
                Ok(())
            }))
            .then(Strategy::external("tar", |dest| {
                let spec = CommandSpec::new("tar", timeout)
                    .arg("-xf")
                    .arg(source)
                    .arg("-C")
                    .arg(dest);
                run_tool(runner, &spec)
            }))
            .run(runner, &tree)?;

        Ok(StagedPayload::tree(collapse_single_dir(&tree)))
    }
}
