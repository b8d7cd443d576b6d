use anyhow::anyhow;
use localpack_core::PackageType;
use std::fs;
use std::io;
use std::path::Path;

use crate::archive::{unpack_squashfs, UnpackResult};
use crate::backend::{PackageFormat, StagedPayload};
use crate::context::InstallContext;
use crate::detect::{is_appimage, squashfs_offset};
use crate::error::{ExtractionError, InstallError};
use crate::extract::{run_tool, ExtractionChain, Strategy};
use crate::runner::CommandSpec;

const RUNTIME_FILE: &str = "package.AppImage";
const EXTRACT_DIR: &str = "squashfs-root";

/// ELF runtime with an appended squashfs image. The file itself is
/// installed; the image is unpacked only to read metadata and icons. The
/// runtime is never executed during install.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppImageFormat;

impl PackageFormat for AppImageFormat {
    fn package_type(&self) -> PackageType {
        PackageType::AppImage
    }

    fn detect(&self, path: &Path) -> io::Result<bool> {
        is_appimage(path)
    }

    fn stage(
        &self,
        ctx: &InstallContext,
        source: &Path,
        scratch: &Path,
    ) -> Result<StagedPayload, InstallError> {
        let runtime = scratch.join(RUNTIME_FILE);
        fs::copy(source, &runtime).map_err(ExtractionError::Scratch)?;

        let offset = squashfs_offset(source).ok().flatten();
        let tree = scratch.join(EXTRACT_DIR);
        let runner = ctx.runner.as_ref();
        let timeout = ctx.timeouts.extract;

        ExtractionChain::new(PackageType::AppImage.display_name())
            .then(Strategy::in_process("squashfs", |dest| {
                let written = unpack_squashfs(&runtime, image_offset(offset)?, dest)?;
                if written == 0 {
                    return Err(anyhow!("squashfs image is empty").into());
                }
                Ok(())
            }))
            .then(Strategy::external("unsquashfs", |dest| {
                let offset = image_offset(offset)?;
                let spec = CommandSpec::new("unsquashfs", timeout)
                    .args(["-f", "-d"])
                    .arg(dest)
                    .arg("-o")
                    .arg(offset.to_string())
                    .arg(&runtime);
                run_tool(runner, &spec)
            }))
            .run(runner, &tree)?;

        Ok(StagedPayload::file(&runtime).with_content_root(tree))
    }
}

fn image_offset(offset: Option<u64>) -> UnpackResult<u64> {
    offset.ok_or_else(|| anyhow!("no squashfs image found in file").into())
}
