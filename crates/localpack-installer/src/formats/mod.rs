//! Per-format strategies plugged into the shared install workflow.

mod appimage;
mod binary;
mod debian;
mod rpm;
mod tarball;

pub use appimage::AppImageFormat;
pub use binary::BinaryFormat;
pub use debian::DebianFormat;
pub use rpm::RpmFormat;
pub use tarball::TarballFormat;

use std::fs;
use std::path::{Path, PathBuf};

/// Archives commonly wrap everything in one `name-version/` directory;
/// that directory becomes the tree root.
pub(crate) fn collapse_single_dir(root: &Path) -> PathBuf {
    let Ok(entries) = fs::read_dir(root) else {
        return root.to_path_buf();
    };
    let entries: Vec<_> = entries.filter_map(|entry| entry.ok()).collect();
    if let [only] = entries.as_slice() {
        if only.file_type().is_ok_and(|file_type| file_type.is_dir()) {
            return only.path();
        }
    }
    root.to_path_buf()
}
