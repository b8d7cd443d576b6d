use localpack_core::PackageType;
use std::io;
use std::path::Path;
use tracing::debug;

use crate::archive::{read_deb_control, unpack_deb_data};
use crate::backend::{PackageFormat, StagedPayload};
use crate::context::InstallContext;
use crate::detect::is_debian_package;
use crate::error::InstallError;
use crate::extract::{run_tool, ExtractionChain, Strategy};
use crate::metadata::{parse_debian_control, PackageMetadata};
use crate::runner::CommandSpec;

/// `.deb` packages: the data member is unpacked into a private tree; no
/// maintainer scripts are run.
#[derive(Debug, Clone, Copy, Default)]
pub struct DebianFormat;

impl PackageFormat for DebianFormat {
    fn package_type(&self) -> PackageType {
        PackageType::Debian
    }

    fn detect(&self, path: &Path) -> io::Result<bool> {
        is_debian_package(path)
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

        ExtractionChain::new(PackageType::Debian.display_name())
            .then(Strategy::in_process("ar reader", |dest| {
                unpack_deb_data(source, dest).map(|_| ())
            }))
            .then(Strategy::external("dpkg-deb", |dest| {
                let spec = CommandSpec::new("dpkg-deb", timeout)
                    .arg("-x")
                    .arg(source)
                    .arg(dest);
                run_tool(runner, &spec)
            }))
            .run(runner, &tree)?;

        let control = match read_deb_control(source) {
            Ok(Some(control)) => parse_debian_control(&control),
            Ok(None) => PackageMetadata::default(),
            Err(err) => {
                debug!(error = %err, "control data unreadable; continuing without it");
                PackageMetadata::default()
            }
        };
        Ok(StagedPayload::tree(tree).with_intrinsic(control))
    }
}
