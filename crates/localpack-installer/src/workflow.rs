//! The install sequence shared by every package format: resolve identity,
//! materialize with undo registration, integrate, record.

use anyhow::Context;
use localpack_core::{
    derive_name_from_filename, install_id_for, normalize_name, validate_identifier,
    version_from_filename, InstallMethod, InstallOptions, InstallRecord, RecordMetadata,
    WaylandSupport,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::TempDir;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::backend::{PackageFormat, Payload, StagedPayload};
use crate::cache::refresh_all;
use crate::context::InstallContext;
use crate::desktop::{launch_command, DesktopEntry};
use crate::detect::is_elf;
use crate::error::{ExtractionError, InstallError};
use crate::fs_utils::{is_executable_file, path_occupied, remove_path_if_exists, set_executable};
use crate::icons::discover_icons;
use crate::metadata::{exec_program, PackageMetadata};
use crate::safety::{ensure_no_symlinks, resolve_entry, validate_symlink, verify_tree};
use crate::transaction::Transaction;

const BIN_DIR_NAMES: &[&str] = &["bin", "sbin", "usr/bin", "usr/local/bin", "usr/games"];

#[derive(Debug, Clone, PartialEq, Eq)]
struct Identity {
    install_id: String,
    display_name: String,
}

#[derive(Debug)]
struct Destination {
    method: InstallMethod,
    staged: PathBuf,
    install_path: PathBuf,
    executable: PathBuf,
    exec_link: Option<PathBuf>,
}

/// Compensating actions go to the caller's transaction when there is one.
struct UndoLog<'t> {
    tx: Option<&'t mut Transaction>,
}

impl UndoLog<'_> {
    fn remove_on_rollback(&mut self, description: String, path: PathBuf) {
        if let Some(tx) = self.tx.as_deref_mut() {
            tx.add(description, move || {
                remove_path_if_exists(&path)
                    .with_context(|| format!("failed to remove {}", path.display()))
            });
        }
    }
}

pub(crate) fn install_with_format<F>(
    format: &F,
    ctx: &InstallContext,
    source: &Path,
    options: &InstallOptions,
    tx: Option<&mut Transaction>,
) -> Result<InstallRecord, InstallError>
where
    F: PackageFormat + ?Sized,
{
    if !source.is_file() {
        return Err(InstallError::NotFound {
            path: source.to_path_buf(),
        });
    }
    let source = fs::canonicalize(source).unwrap_or_else(|_| source.to_path_buf());
    let package_type = format.package_type();
    info!(package_type = package_type.as_str(), source = %source.display(), "installing");

    let scratch = create_scratch(ctx)?;
    let staged = format.stage(ctx, &source, scratch.path())?;
    let metadata = format.parse_metadata(&staged);
    let identity = resolve_identity(&source, options, &metadata)?;
    debug!(install_id = %identity.install_id, name = %identity.display_name, "resolved identity");

    let destination = plan_destination(ctx, &identity, &staged, &metadata, package_type.display_name())?;
    claim_destination(ctx, &identity, &destination, options)?;

    let icon_root = icon_search_root(&staged, &destination);
    let mut undo = UndoLog { tx };
    materialize(&destination, &mut undo)?;

    let icon_files = install_icons(
        ctx,
        &identity,
        icon_root.as_deref(),
        &metadata,
        options.force,
        &mut undo,
    );
    let (desktop_files, wayland_support) =
        integrate_desktop(ctx, &identity, &destination, &metadata, &icon_files, options, &mut undo)?;

    if !icon_files.is_empty() || !desktop_files.is_empty() {
        refresh_all(
            ctx.cache.as_ref(),
            &ctx.layout.hicolor_dir(),
            ctx.layout.applications_dir(),
        );
    }

    let version = metadata
        .version
        .clone()
        .or_else(|| version_from_filename(&source));
    info!(install_id = %identity.install_id, path = %destination.install_path.display(), "installed");

    Ok(InstallRecord {
        install_id: identity.install_id,
        package_type,
        name: identity.display_name,
        version,
        installed_at_unix: now_unix(),
        original_file: source,
        install_path: destination.install_path,
        desktop_files,
        metadata: RecordMetadata {
            install_method: destination.method,
            wayland_support,
            exec_link: destination.exec_link,
            comment: metadata.comment,
            icon_files,
            categories: metadata.categories,
        },
    })
}

fn create_scratch(ctx: &InstallContext) -> Result<TempDir, InstallError> {
    let base = ctx.layout.tmp_state_dir();
    fs::create_dir_all(&base).map_err(ExtractionError::Scratch)?;
    let scratch = tempfile::Builder::new()
        .prefix("install-")
        .tempdir_in(&base)
        .map_err(ExtractionError::Scratch)?;
    Ok(scratch)
}

/// Display name: explicit override, then embedded metadata, then the file
/// name. The install id is its normalized form and must pass the allow-list.
fn resolve_identity(
    source: &Path,
    options: &InstallOptions,
    metadata: &PackageMetadata,
) -> Result<Identity, InstallError> {
    let display_name = options
        .custom_name()
        .map(str::to_string)
        .or_else(|| metadata.name.clone())
        .unwrap_or_else(|| derive_name_from_filename(source));
    let normalized = normalize_name(&display_name);
    validate_identifier(&normalized).map_err(|err| InstallError::NameValidation {
        name: display_name.clone(),
        reason: format!("{err:#}"),
    })?;
    Ok(Identity {
        install_id: install_id_for(&normalized),
        display_name,
    })
}

fn plan_destination(
    ctx: &InstallContext,
    identity: &Identity,
    staged: &StagedPayload,
    metadata: &PackageMetadata,
    format_name: &'static str,
) -> Result<Destination, InstallError> {
    let layout = &ctx.layout;
    let id = &identity.install_id;
    match &staged.payload {
        Payload::File(path) => {
            let install_path = layout.binary_path(id);
            Ok(Destination {
                method: InstallMethod::Copy,
                staged: path.clone(),
                executable: install_path.clone(),
                install_path,
                exec_link: None,
            })
        }
        Payload::Tree(root) => {
            let relative = locate_executable(root, metadata.exec_hint.as_deref(), id)
                .ok_or(ExtractionError::NoExecutable {
                    format: format_name,
                })?;
            let install_path = layout.app_dir(id);
            Ok(Destination {
                method: InstallMethod::Extract,
                staged: root.clone(),
                executable: install_path.join(relative),
                install_path,
                exec_link: Some(layout.binary_path(id)),
            })
        }
    }
}

/// Collision policy: refuse an occupied destination unless forced; when
/// forced, clear the old artifact, its launcher link and its menu entry.
fn claim_destination(
    ctx: &InstallContext,
    identity: &Identity,
    destination: &Destination,
    options: &InstallOptions,
) -> Result<(), InstallError> {
    let desktop_entry = ctx.layout.desktop_entry_path(&identity.install_id);
    let occupied = std::iter::once(&destination.install_path)
        .chain(destination.exec_link.as_ref())
        .chain((!options.skip_desktop).then_some(&desktop_entry))
        .find(|path| path_occupied(path));
    let Some(occupied) = occupied else {
        return Ok(());
    };
    if !options.force {
        return Err(InstallError::AlreadyInstalled {
            name: identity.install_id.clone(),
            path: occupied.clone(),
        });
    }

    let binary = ctx.layout.binary_path(&identity.install_id);
    let app_dir = ctx.layout.app_dir(&identity.install_id);
    for path in [&destination.install_path, &binary, &app_dir, &desktop_entry] {
        info!(path = %path.display(), "replacing existing installation");
        remove_path_if_exists(path).map_err(|err| InstallError::materialize(path.clone(), err))?;
    }
    Ok(())
}

fn materialize(destination: &Destination, undo: &mut UndoLog<'_>) -> Result<(), InstallError> {
    let target = &destination.install_path;
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|err| InstallError::materialize(parent, err))?;
    }

    undo.remove_on_rollback(format!("remove {}", target.display()), target.clone());
    match destination.method {
        InstallMethod::Copy => {
            fs::copy(&destination.staged, target)
                .map_err(|err| InstallError::materialize(target.clone(), err))?;
            set_executable(target).map_err(|err| InstallError::materialize(target.clone(), err))?;
        }
        InstallMethod::Extract => {
            move_tree(&destination.staged, target)?;
            set_executable(&destination.executable)
                .map_err(|err| InstallError::materialize(destination.executable.clone(), err))?;
        }
    }

    if let Some(link) = &destination.exec_link {
        if let Some(parent) = link.parent() {
            fs::create_dir_all(parent).map_err(|err| InstallError::materialize(parent, err))?;
        }
        undo.remove_on_rollback(format!("remove launcher link {}", link.display()), link.clone());
        create_link(&destination.executable, link)?;
    }
    Ok(())
}

/// Moves a staged tree into place, copying entry by entry when a rename is
/// not possible (e.g. across filesystems).
fn move_tree(staged: &Path, target: &Path) -> Result<(), InstallError> {
    if fs::rename(staged, target).is_ok() {
        return Ok(());
    }
    debug!(from = %staged.display(), to = %target.display(), "rename failed; copying tree");
    fs::create_dir_all(target).map_err(|err| InstallError::materialize(target, err))?;
    for entry in WalkDir::new(staged).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|err| InstallError::materialize(staged, err))?;
        let relative = entry
            .path()
            .strip_prefix(staged)
            .map_err(|err| InstallError::materialize(entry.path(), err))?;
        let dest = resolve_entry(target, relative)?;
        let file_type = entry.file_type();
        if file_type.is_dir() {
            ensure_no_symlinks(target, &dest)?;
            fs::create_dir_all(&dest).map_err(|err| InstallError::materialize(&dest, err))?;
        } else if file_type.is_symlink() {
            let link_target =
                fs::read_link(entry.path()).map_err(|err| InstallError::materialize(&dest, err))?;
            validate_symlink(target, relative, &link_target)?;
            create_link(&link_target, &dest)?;
        } else {
            fs::copy(entry.path(), &dest).map_err(|err| InstallError::materialize(&dest, err))?;
        }
    }
    // Links are only resolved physically once every entry is in place.
    verify_tree(target)?;
    Ok(())
}

fn create_link(target: &Path, link: &Path) -> Result<(), InstallError> {
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(target, link)
            .map_err(|err| InstallError::materialize(link, err))
    }
    #[cfg(not(unix))]
    {
        fs::copy(target, link)
            .map(|_| ())
            .map_err(|err| InstallError::materialize(link, err))
    }
}

/// Where icons are looked up once the payload has been materialized. A
/// staged tree is moved into its app dir, so its content root moves too.
fn icon_search_root(staged: &StagedPayload, destination: &Destination) -> Option<PathBuf> {
    let content_root = staged.content_root.as_ref()?;
    match &staged.payload {
        Payload::Tree(tree) => match content_root.strip_prefix(tree) {
            Ok(relative) => Some(destination.install_path.join(relative)),
            Err(_) => Some(content_root.clone()),
        },
        Payload::File(_) => Some(content_root.clone()),
    }
}

fn install_icons(
    ctx: &InstallContext,
    identity: &Identity,
    root: Option<&Path>,
    metadata: &PackageMetadata,
    force: bool,
    undo: &mut UndoLog<'_>,
) -> Vec<PathBuf> {
    let Some(root) = root else {
        return Vec::new();
    };
    let icon_name = metadata.icon_name.as_deref().map(|icon| {
        Path::new(icon)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(icon)
    });

    let mut installed = Vec::new();
    for candidate in discover_icons(root, icon_name) {
        // Icons this install did not create are never overwritten or
        // claimed, unless the user forces a replacement.
        let target = ctx.icons.icon_destination(&candidate, &identity.install_id);
        if path_occupied(&target) {
            if !force {
                warn!(icon = %target.display(), "icon already exists; leaving it in place");
                continue;
            }
            if let Err(err) = remove_path_if_exists(&target) {
                let error = format!("{err:#}");
                warn!(icon = %target.display(), %error, "cannot replace existing icon");
                continue;
            }
        }
        match ctx.icons.install_icon(&candidate, &identity.install_id) {
            Ok(path) => {
                undo.remove_on_rollback(format!("remove icon {}", path.display()), path.clone());
                installed.push(path);
            }
            Err(err) => {
                let error = format!("{err:#}");
                warn!(icon = %candidate.source.display(), %error, "skipping icon");
            }
        }
    }
    installed
}

fn integrate_desktop(
    ctx: &InstallContext,
    identity: &Identity,
    destination: &Destination,
    metadata: &PackageMetadata,
    icon_files: &[PathBuf],
    options: &InstallOptions,
    undo: &mut UndoLog<'_>,
) -> Result<(Vec<PathBuf>, WaylandSupport), InstallError> {
    if options.skip_desktop {
        return Ok((Vec::new(), WaylandSupport::NoDesktopEntry));
    }

    let inject_wayland = !options.skip_wayland_env;
    let icon = if icon_files.is_empty() {
        metadata
            .icon_name
            .clone()
            .filter(|icon| Path::new(icon).is_absolute())
    } else {
        Some(identity.install_id.clone())
    };
    let entry = DesktopEntry {
        name: identity.display_name.clone(),
        exec: launch_command(&destination.executable, inject_wayland),
        icon,
        comment: metadata.comment.clone(),
        categories: metadata.categories.clone(),
        terminal: metadata.terminal,
    };

    let expected = ctx.layout.desktop_entry_path(&identity.install_id);
    undo.remove_on_rollback(
        format!("remove desktop entry {}", expected.display()),
        expected.clone(),
    );
    let written = ctx
        .desktop
        .write_entry(&identity.install_id, &entry)
        .map_err(|source| InstallError::Integration {
            step: "desktop entry",
            source,
        })?;
    if written != expected {
        undo.remove_on_rollback(
            format!("remove desktop entry {}", written.display()),
            written.clone(),
        );
    }

    if let Err(err) = ctx.desktop.validate_entry(&written) {
        let error = format!("{err:#}");
        warn!(path = %written.display(), %error, "desktop entry validation reported problems");
    }

    let wayland = if inject_wayland {
        WaylandSupport::EnvInjected
    } else {
        WaylandSupport::Unmodified
    };
    Ok((vec![written], wayland))
}

/// Picks the launchable file inside an unpacked tree, relative to `root`.
///
/// Order: the bundled entry's `Exec` program, a file named after the
/// install id (or `AppRun`), a file in a `bin`-like directory, the largest
/// executable.
pub(crate) fn locate_executable(
    root: &Path,
    exec_hint: Option<&str>,
    install_id: &str,
) -> Option<PathBuf> {
    let candidates = executable_candidates(root);
    if candidates.is_empty() {
        return None;
    }

    if let Some(program) = exec_hint.and_then(exec_program) {
        let program_path = Path::new(&program);
        let hit = if program.contains('/') {
            let rerooted = program_path.strip_prefix("/").unwrap_or(program_path);
            candidates
                .iter()
                .find(|(rel, _)| rel == rerooted)
                .or_else(|| {
                    candidates
                        .iter()
                        .find(|(rel, _)| rerooted.ends_with(rel) || rel.ends_with(rerooted))
                })
        } else {
            let named = |(rel, _): &&(PathBuf, u64)| {
                rel.file_name().is_some_and(|name| name == program.as_str())
            };
            candidates
                .iter()
                .filter(named)
                .find(|(rel, _)| in_bin_dir(rel))
                .or_else(|| candidates.iter().find(named))
        };
        if let Some((rel, _)) = hit {
            return Some(rel.clone());
        }
        debug!(program = %program, "Exec hint did not match any executable");
    }

    let named_like_id = |rel: &Path| {
        rel.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| normalize_name(name) == install_id)
    };
    candidates
        .iter()
        .find(|(rel, _)| named_like_id(rel.as_path()) && in_bin_dir(rel))
        .or_else(|| candidates.iter().find(|(rel, _)| named_like_id(rel.as_path())))
        .or_else(|| candidates.iter().find(|(rel, _)| rel == Path::new("AppRun")))
        .or_else(|| candidates.iter().find(|(rel, _)| in_bin_dir(rel)))
        .or_else(|| candidates.iter().max_by_key(|(_, size)| *size))
        .map(|(rel, _)| rel.clone())
}

fn executable_candidates(root: &Path) -> Vec<(PathBuf, u64)> {
    let mut found = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
    {
        if entry.file_type().is_dir() {
            continue;
        }
        let path = entry.path();
        let Ok(rel) = path.strip_prefix(root) else {
            continue;
        };
        if is_shared_library(rel) {
            continue;
        }
        if !(is_executable_file(path) || is_elf(path).unwrap_or(false)) {
            continue;
        }
        let size = fs::metadata(path).map(|meta| meta.len()).unwrap_or(0);
        found.push((rel.to_path_buf(), size));
    }
    found
}

fn in_bin_dir(rel: &Path) -> bool {
    rel.parent().is_some_and(|parent| {
        BIN_DIR_NAMES
            .iter()
            .any(|name| parent == Path::new(name) || parent.ends_with(name))
    })
}

fn is_shared_library(rel: &Path) -> bool {
    rel.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(".so") || name.contains(".so."))
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
