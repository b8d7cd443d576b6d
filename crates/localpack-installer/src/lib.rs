mod archive;
mod backend;
mod cache;
mod context;
mod desktop;
mod detect;
mod error;
mod extract;
mod formats;
mod fs_utils;
mod icons;
mod layout;
mod manager;
mod metadata;
mod records;
mod registry;
mod runner;
mod safety;
mod transaction;
mod uninstall;
mod workflow;

pub use backend::{Backend, FormatBackend, PackageFormat, Payload, StagedPayload};
pub use cache::{CacheRefresher, SystemCacheRefresher};
pub use context::InstallContext;
pub use desktop::{launch_command, render_desktop_entry, DesktopEntry, DesktopIntegration, FreedesktopDesktop};
pub use detect::{
    is_appimage, is_debian_package, is_elf, is_plain_binary, is_rpm, is_tarball,
    squashfs_offset, tarball_compression, Compression,
};
pub use error::{ErrorCategory, ExtractionError, InstallError, SafetyError};
pub use formats::{AppImageFormat, BinaryFormat, DebianFormat, RpmFormat, TarballFormat};
pub use icons::{discover_icons, HicolorIcons, IconCandidate, IconInstaller, IconSize};
pub use layout::{default_user_layout, InstallLayout, HICOLOR_THEME};
pub use manager::PackageManager;
pub use metadata::PackageMetadata;
pub use records::{FileRecordStore, RecordStore};
pub use registry::BackendRegistry;
pub use runner::{
    CancellationToken, CommandError, CommandOutput, CommandRunner, CommandSpec, SystemRunner,
    Timeouts,
};
pub use safety::{validate_extract_path, validate_path, validate_symlink, verify_tree, MAX_PATH_LEN};
pub use transaction::{RollbackFailure, RollbackReport, Transaction, TransactionState};
pub use uninstall::{uninstall_record, UninstallReport};

#[cfg(all(test, unix))]
mod tests;
