use localpack_core::PackageType;
use std::io;
use std::path::Path;
use tracing::debug;

use crate::archive::{read_rpm_header, unpack_rpm_payload};
use crate::backend::{PackageFormat, StagedPayload};
use crate::context::InstallContext;
use crate::detect::is_rpm;
use crate::error::InstallError;
use crate::extract::{run_tool, ExtractionChain, Strategy};
use crate::metadata::PackageMetadata;
use crate::runner::CommandSpec;

/// `.rpm` packages: the cpio payload is unpacked into a private tree; no
/// scriptlets are run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RpmFormat;

impl PackageFormat for RpmFormat {
    fn package_type(&self) -> PackageType {
        PackageType::Rpm
    }

    fn detect(&self, path: &Path) -> io::Result<bool> {
        is_rpm(path)
    }

    fn stage(
        &self,
        ctx: &InstallContext,
        source: &Path,
        scratch: &Path,
    ) -> Result<StagedPayload, InstallError> {
        let tree = scratch.join("tree");
        let runner = ctx.runner.as_ref();
        let timeout = ctx.timeouts.extract;

        ExtractionChain::new(PackageType::Rpm.display_name())
            .then(Strategy::in_process("rpm reader", |dest| {
                unpack_rpm_payload(source, dest).map(|_| ())
            }))
            .then(Strategy::external("bsdtar", |dest| {
                let spec = CommandSpec::new("bsdtar", timeout)
                    .arg("-xf")
                    .arg(source)
                    .arg("-C")
                    .arg(dest);
                run_tool(runner, &spec)
            }))
            .run(runner, &tree)?;

        let header = match read_rpm_header(source) {
            Ok(header) => header.metadata(),
            Err(err) => {
                debug!(error = %err, "rpm header unreadable; continuing without it");
                PackageMetadata::default()
            }
        };
        Ok(StagedPayload::tree(tree).with_intrinsic(header))
    }
}
