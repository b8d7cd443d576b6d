//! Containment checks for everything unpacked from an untrusted package.
//!
//! Every entry path and symlink target is checked against the extraction
//! root before it is written. Path checks are lexical first. Because
//! earlier entries may already have planted symlinks, writers also check
//! the on-disk components between the root and each target, and symlink
//! targets are resolved through the links that already exist.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{ExtractionError, InstallError, SafetyError};

/// Upper bound on any path handled by the installer, in bytes.
pub const MAX_PATH_LEN: usize = 4096;

/// Baseline sanity check independent of containment: no NUL bytes and no
/// more than [`MAX_PATH_LEN`] bytes.
pub fn validate_path(path: &Path) -> Result<(), SafetyError> {
    let bytes = path.as_os_str().as_encoded_bytes();
    if bytes.contains(&0) {
        return Err(SafetyError::NulByte {
            path: path.to_string_lossy().into_owned(),
        });
    }
    if bytes.len() > MAX_PATH_LEN {
        return Err(SafetyError::TooLong {
            len: bytes.len(),
            max: MAX_PATH_LEN,
        });
    }
    Ok(())
}

/// Checks an archive entry path and returns where it lands under
/// `target_dir`.
///
/// Rejects entries that still contain `..` after cleaning, absolute entries,
/// and anything whose joined form is not `target_dir` or nested below it.
pub fn validate_extract_path(target_dir: &Path, entry: &Path) -> Result<PathBuf, SafetyError> {
    validate_path(entry)?;

    let cleaned = clean(entry);
    if cleaned
        .components()
        .any(|component| component == Component::ParentDir)
    {
        return Err(SafetyError::PathTraversal {
            entry: entry.to_path_buf(),
        });
    }
    if entry.has_root() || entry.is_absolute() {
        return Err(SafetyError::AbsolutePath {
            entry: entry.to_path_buf(),
        });
    }

    let root = absolutize(target_dir);
    let resolved = clean(&root.join(&cleaned));
    if !is_contained(&root, &resolved) {
        return Err(SafetyError::OutsideRoot {
            entry: entry.to_path_buf(),
            root,
        });
    }
    Ok(resolved)
}

/// [`validate_extract_path`] plus the on-disk check: no component between
/// `target_dir` and the entry's parent may be a symlink.
pub fn resolve_entry(target_dir: &Path, entry: &Path) -> Result<PathBuf, SafetyError> {
    let target = validate_extract_path(target_dir, entry)?;
    ensure_no_symlink_ancestors(target_dir, &target)?;
    Ok(target)
}

/// Refuses `target` when an existing component strictly between `root`
/// and `target` is a symlink. The final component is left to the caller.
pub fn ensure_no_symlink_ancestors(root: &Path, target: &Path) -> Result<(), SafetyError> {
    check_components(root, target, false)
}

/// Like [`ensure_no_symlink_ancestors`] but the final component must not
/// be a symlink either.
pub fn ensure_no_symlinks(root: &Path, target: &Path) -> Result<(), SafetyError> {
    check_components(root, target, true)
}

fn check_components(root: &Path, target: &Path, include_final: bool) -> Result<(), SafetyError> {
    let root = absolutize(root);
    let target = absolutize(target);
    let rel = target
        .strip_prefix(&root)
        .map_err(|_| SafetyError::OutsideRoot {
            entry: target.clone(),
            root: root.clone(),
        })?;

    let mut current = root.clone();
    let mut components = rel.components().peekable();
    while let Some(component) = components.next() {
        if components.peek().is_none() && !include_final {
            break;
        }
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(SafetyError::SymlinkParent {
                    entry: rel.to_path_buf(),
                    link: current,
                });
            }
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(uninspectable(current, &err)),
        }
    }
    Ok(())
}

/// Checks that `link_target`, resolved from the directory holding
/// `link_path`, stays inside `target_dir`. `link_path` may be absolute or
/// relative to `target_dir`. Absolute targets are always refused.
///
/// This is the lexical half; [`validate_symlink_in_tree`] also follows the
/// links already present under the root.
pub fn validate_symlink(
    target_dir: &Path,
    link_path: &Path,
    link_target: &Path,
) -> Result<(), SafetyError> {
    validate_path(link_path)?;
    validate_path(link_target)?;

    let root = absolutize(target_dir);
    let escape = || SafetyError::SymlinkEscape {
        link: link_path.to_path_buf(),
        target: link_target.to_path_buf(),
        root: root.clone(),
    };
    if link_target.has_root() {
        return Err(escape());
    }
    let link = clean(&root.join(link_path));
    let link_dir = link.parent().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
    let resolved = clean(&link_dir.join(link_target));
    if !is_contained(&root, &resolved) {
        return Err(escape());
    }
    Ok(())
}

/// Links followed before a target is treated as a loop.
const MAX_SYMLINK_HOPS: usize = 40;

enum Step {
    Up,
    Down(OsString),
}

fn push_steps(pending: &mut Vec<Step>, path: &Path) {
    // `pending` is a stack, so the path's components go on in reverse.
    for component in path.components().rev() {
        match component {
            Component::ParentDir => pending.push(Step::Up),
            Component::Normal(name) => pending.push(Step::Down(name.to_os_string())),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
}

/// Resolves `link_target` component by component from the link's
/// directory, following symlinks that already exist under `target_dir`.
/// Fails if the walk ever climbs above the root, meets an absolute link,
/// or exceeds the hop limit. Missing components resolve lexically.
pub fn validate_symlink_in_tree(
    target_dir: &Path,
    link_path: &Path,
    link_target: &Path,
) -> Result<(), SafetyError> {
    validate_symlink(target_dir, link_path, link_target)?;

    let root = absolutize(target_dir);
    let escape = || SafetyError::SymlinkEscape {
        link: link_path.to_path_buf(),
        target: link_target.to_path_buf(),
        root: root.clone(),
    };
    let link = clean(&root.join(link_path));
    let mut position: Vec<OsString> = link
        .parent()
        .and_then(|parent| parent.strip_prefix(&root).ok())
        .map(|rel| {
            rel.components()
                .map(|component| component.as_os_str().to_os_string())
                .collect()
        })
        .unwrap_or_default();

    let mut pending = Vec::new();
    push_steps(&mut pending, link_target);
    let mut hops = 0;
    while let Some(step) = pending.pop() {
        match step {
            Step::Up => {
                if position.pop().is_none() {
                    return Err(escape());
                }
            }
            Step::Down(name) => {
                position.push(name);
                let current: PathBuf = std::iter::once(root.as_os_str())
                    .chain(position.iter().map(OsString::as_os_str))
                    .collect();
                let meta = match fs::symlink_metadata(&current) {
                    Ok(meta) => meta,
                    Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                    Err(err) => return Err(uninspectable(current, &err)),
                };
                if !meta.file_type().is_symlink() {
                    continue;
                }
                hops += 1;
                if hops > MAX_SYMLINK_HOPS {
                    return Err(escape());
                }
                let next = fs::read_link(&current).map_err(|err| uninspectable(current, &err))?;
                if next.has_root() {
                    return Err(escape());
                }
                position.pop();
                push_steps(&mut pending, &next);
            }
        }
    }
    Ok(())
}

/// Checks a hard link entry and returns its source. The source must be an
/// existing regular file reached without passing through a symlink.
pub fn validate_hard_link(
    target_dir: &Path,
    entry: &Path,
    link_target: &Path,
) -> Result<PathBuf, SafetyError> {
    let source = validate_extract_path(target_dir, link_target)?;
    ensure_no_symlinks(target_dir, &source)?;
    let is_regular = fs::symlink_metadata(&source).is_ok_and(|meta| meta.file_type().is_file());
    if !is_regular {
        return Err(SafetyError::HardLinkSource {
            entry: entry.to_path_buf(),
            source_path: link_target.to_path_buf(),
        });
    }
    Ok(source)
}

fn uninspectable(path: PathBuf, err: &io::Error) -> SafetyError {
    SafetyError::Uninspectable {
        path,
        reason: err.to_string(),
    }
}

/// Walks a tree produced by an external extraction tool and applies the
/// entry and symlink checks to every node, resolving symlinks through the
/// tree itself. Device nodes, FIFOs and
/// sockets are refused. Returns the number of entries checked.
pub fn verify_tree(root: &Path) -> Result<usize, InstallError> {
    let mut checked = 0;
    for entry in WalkDir::new(root).follow_links(false).min_depth(1) {
        let entry = entry.map_err(|err| ExtractionError::Malformed {
            format: "extracted",
            reason: format!("failed to walk {}: {err}", root.display()),
        })?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|_| SafetyError::OutsideRoot {
                entry: entry.path().to_path_buf(),
                root: root.to_path_buf(),
            })?;
        validate_extract_path(root, rel)?;

        let file_type = entry.file_type();
        if file_type.is_symlink() {
            let target =
                fs::read_link(entry.path()).map_err(|err| ExtractionError::Malformed {
                    format: "extracted",
                    reason: format!("failed to read symlink {}: {err}", entry.path().display()),
                })?;
            validate_symlink_in_tree(root, rel, &target)?;
        } else if is_special_file(&file_type) {
            return Err(SafetyError::UnsupportedEntry {
                entry: rel.to_path_buf(),
            }
            .into());
        }
        checked += 1;
    }
    Ok(checked)
}

#[cfg(unix)]
fn is_special_file(file_type: &fs::FileType) -> bool {
    use std::os::unix::fs::FileTypeExt;
    file_type.is_block_device()
        || file_type.is_char_device()
        || file_type.is_fifo()
        || file_type.is_socket()
}

#[cfg(not(unix))]
fn is_special_file(_file_type: &std::fs::FileType) -> bool {
    false
}

fn is_contained(root: &Path, candidate: &Path) -> bool {
    match pathdiff::diff_paths(candidate, root) {
        Some(relative) => !matches!(relative.components().next(), Some(Component::ParentDir)),
        None => false,
    }
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return clean(path);
    }
    let base = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
    clean(&base.join(path))
}

/// Lexical clean: drops `.`, folds `name/..`, keeps leading `..` on
/// relative paths and discards `..` directly below the root.
fn clean(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }
    parts.iter().collect()
}
