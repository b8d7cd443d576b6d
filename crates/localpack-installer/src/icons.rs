use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::layout::InstallLayout;

const STANDARD_SIZES: [u32; 9] = [16, 22, 24, 32, 48, 64, 128, 256, 512];
const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
const DISCOVERY_DEPTH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IconSize {
    Pixels(u32),
    Scalable,
}

impl IconSize {
    /// Directory name inside a hicolor theme, e.g. `48x48` or `scalable`.
    pub fn dir_name(self) -> String {
        match self {
            Self::Pixels(px) => format!("{px}x{px}"),
            Self::Scalable => "scalable".to_string(),
        }
    }

    /// Nearest standard hicolor size.
    pub fn snap(px: u32) -> Self {
        let nearest = STANDARD_SIZES
            .iter()
            .copied()
            .min_by_key(|size| size.abs_diff(px))
            .unwrap_or(48);
        Self::Pixels(nearest)
    }

    fn from_component(component: &str) -> Option<Self> {
        if component == "scalable" {
            return Some(Self::Scalable);
        }
        let (width, height) = component.split_once('x')?;
        let width = width.parse::<u32>().ok()?;
        let height = height.split('@').next()?.parse::<u32>().ok()?;
        (width == height && width > 0).then(|| Self::snap(width))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IconCandidate {
    pub source: PathBuf,
    pub size: IconSize,
    pub extension: &'static str,
}

/// Installs one discovered icon for an application and returns where it
/// landed.
pub trait IconInstaller {
    /// Where `install_icon` would write this icon.
    fn icon_destination(&self, icon: &IconCandidate, install_id: &str) -> PathBuf;

    fn install_icon(&self, icon: &IconCandidate, install_id: &str) -> Result<PathBuf>;
}

#[derive(Debug, Clone)]
pub struct HicolorIcons {
    layout: InstallLayout,
}

impl HicolorIcons {
    pub fn new(layout: InstallLayout) -> Self {
        Self { layout }
    }
}

impl IconInstaller for HicolorIcons {
    fn icon_destination(&self, icon: &IconCandidate, install_id: &str) -> PathBuf {
        self.layout
            .icon_path(install_id, icon.size, icon.extension)
    }

    fn install_icon(&self, icon: &IconCandidate, install_id: &str) -> Result<PathBuf> {
        let target = self.icon_destination(icon, install_id);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create icon dir: {}", parent.display()))?;
        }
        fs::copy(&icon.source, &target).with_context(|| {
            format!(
                "failed to copy icon {} -> {}",
                icon.source.display(),
                target.display()
            )
        })?;
        Ok(target)
    }
}

/// Finds icons inside an unpacked package, at most one per size.
///
/// Sources are ranked: hicolor-style `<size>/apps/` trees, then root-level
/// AppImage icons (`.DirIcon`, `<name>.png|svg`), then `pixmaps`. When
/// `icon_name` is known, themed icons must carry that file stem.
pub fn discover_icons(root: &Path, icon_name: Option<&str>) -> Vec<IconCandidate> {
    let mut found: BTreeMap<IconSize, IconCandidate> = BTreeMap::new();
    let mut keep = |candidate: IconCandidate| {
        found.entry(candidate.size).or_insert(candidate);
    };

    let mut pixmaps = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(DISCOVERY_DEPTH)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(extension) = image_extension(path) else {
            continue;
        };
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        if is_pixmap(relative) {
            pixmaps.push((path.to_path_buf(), extension));
            continue;
        }
        let Some(size) = themed_size(relative) else {
            continue;
        };
        if !stem_matches(path, icon_name) {
            continue;
        }
        let size = if extension == "svg" {
            IconSize::Scalable
        } else {
            size
        };
        keep(IconCandidate {
            source: path.to_path_buf(),
            size,
            extension,
        });
    }

    for candidate in root_icons(root, icon_name) {
        keep(candidate);
    }

    for (path, extension) in pixmaps {
        if !stem_matches(&path, icon_name) {
            continue;
        }
        if let Some(size) = size_from_content(&path, extension) {
            keep(IconCandidate {
                source: path,
                size,
                extension,
            });
        }
    }

    found.into_values().collect()
}

fn root_icons(root: &Path, icon_name: Option<&str>) -> Vec<IconCandidate> {
    let mut candidates = Vec::new();
    if let Some(name) = icon_name.filter(|name| !name.contains('/')) {
        for extension in ["png", "svg"] {
            let path = root.join(format!("{name}.{extension}"));
            if let Some(size) = size_from_content(&path, extension) {
                candidates.push(IconCandidate {
                    source: path,
                    size,
                    extension,
                });
            }
        }
    }

    let dir_icon = root.join(".DirIcon");
    if let Some(extension) = sniff_image(&dir_icon) {
        if let Some(size) = size_from_content(&dir_icon, extension) {
            candidates.push(IconCandidate {
                source: dir_icon,
                size,
                extension,
            });
        }
    }
    candidates
}

fn image_extension(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "png" => Some("png"),
        "svg" => Some("svg"),
        _ => None,
    }
}

fn stem_matches(path: &Path, icon_name: Option<&str>) -> bool {
    let Some(name) = icon_name else {
        return true;
    };
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .is_some_and(|stem| stem == name)
}

fn is_pixmap(relative: &Path) -> bool {
    relative
        .parent()
        .and_then(|parent| parent.file_name())
        .is_some_and(|name| name == "pixmaps")
}

/// `.../icons/hicolor/48x48/apps/foo.png` style paths.
fn themed_size(relative: &Path) -> Option<IconSize> {
    let components: Vec<&str> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(value) => value.to_str(),
            _ => None,
        })
        .collect();
    let len = components.len();
    if len < 3 || components[len - 2] != "apps" {
        return None;
    }
    IconSize::from_component(components[len - 3])
}

fn sniff_image(path: &Path) -> Option<&'static str> {
    let bytes = fs::read(path).ok()?;
    if bytes.starts_with(PNG_SIGNATURE) {
        return Some("png");
    }
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(512)]).to_ascii_lowercase();
    head.contains("<svg").then_some("svg")
}

fn size_from_content(path: &Path, extension: &str) -> Option<IconSize> {
    if !path.is_file() {
        return None;
    }
    if extension == "svg" {
        return Some(IconSize::Scalable);
    }
    png_width(path).map(IconSize::snap)
}

fn png_width(path: &Path) -> Option<u32> {
    let bytes = fs::read(path).ok()?;
    if !bytes.starts_with(PNG_SIGNATURE) || bytes.get(12..16)? != b"IHDR" {
        return None;
    }
    let width: [u8; 4] = bytes.get(16..20)?.try_into().ok()?;
    Some(u32::from_be_bytes(width))
}
