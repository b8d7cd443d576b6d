use freedesktop_file_parser::{parse, EntryType};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Best-effort facts read from inside a package.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageMetadata {
    pub name: Option<String>,
    pub version: Option<String>,
    pub comment: Option<String>,
    pub icon_name: Option<String>,
    pub exec_hint: Option<String>,
    pub categories: Vec<String>,
    pub terminal: bool,
}

impl PackageMetadata {
    /// Fills fields still unset here from `other`.
    pub fn merge(mut self, other: PackageMetadata) -> Self {
        self.name = self.name.or(other.name);
        self.version = self.version.or(other.version);
        self.comment = self.comment.or(other.comment);
        self.icon_name = self.icon_name.or(other.icon_name);
        self.exec_hint = self.exec_hint.or(other.exec_hint);
        if self.categories.is_empty() {
            self.categories = other.categories;
        }
        self.terminal = self.terminal || other.terminal;
        self
    }
}

/// First bundled menu entry: root level (AppImage layout) before
/// `usr/share/applications` and `share/applications`.
pub fn find_bundled_desktop_file(root: &Path) -> Option<PathBuf> {
    let candidates = [
        root.to_path_buf(),
        root.join("usr").join("share").join("applications"),
        root.join("share").join("applications"),
    ];
    candidates.iter().find_map(|dir| first_desktop_file(dir))
}

fn first_desktop_file(dir: &Path) -> Option<PathBuf> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension().is_some_and(|ext| ext == "desktop")
                && fs::symlink_metadata(path).is_ok_and(|meta| meta.is_file())
        })
        .collect();
    entries.sort();
    entries.into_iter().next()
}

/// Reads a bundled `.desktop` file. Unreadable or malformed entries yield
/// empty metadata.
pub fn read_desktop_metadata(path: &Path) -> PackageMetadata {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "bundled desktop entry unreadable");
            return PackageMetadata::default();
        }
    };
    let desktop_file = match parse(&content) {
        Ok(desktop_file) => desktop_file,
        Err(err) => {
            debug!(path = %path.display(), error = ?err, "bundled desktop entry malformed");
            return PackageMetadata::default();
        }
    };

    let entry = &desktop_file.entry;
    let (exec_hint, categories, terminal) = match &entry.entry_type {
        EntryType::Application(app) => (
            app.exec.clone(),
            app.categories.clone().unwrap_or_default(),
            app.terminal.unwrap_or(false),
        ),
        _ => (None, Vec::new(), false),
    };

    PackageMetadata {
        name: non_empty(entry.name.default.clone()),
        version: desktop_key(&content, "X-AppImage-Version"),
        comment: entry
            .comment
            .as_ref()
            .and_then(|comment| non_empty(comment.default.clone())),
        icon_name: entry
            .icon
            .as_ref()
            .and_then(|icon| non_empty(icon.content.clone())),
        exec_hint,
        categories: categories
            .into_iter()
            .filter(|category| !category.trim().is_empty())
            .collect(),
        terminal,
    }
}

/// Looks up a key inside the `[Desktop Entry]` group.
fn desktop_key(content: &str, key: &str) -> Option<String> {
    let mut in_main_group = false;
    for line in content.lines().map(str::trim) {
        if line.starts_with('[') {
            in_main_group = line == "[Desktop Entry]";
            continue;
        }
        if !in_main_group {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            if k.trim() == key {
                return non_empty(v.trim().to_string());
            }
        }
    }
    None
}

/// Program path from an `Exec=` value, skipping an `env VAR=..` prefix and
/// field codes.
pub fn exec_program(exec: &str) -> Option<String> {
    let mut tokens = split_exec(exec).into_iter().peekable();
    if tokens.peek().is_some_and(|token| token == "env") {
        tokens.next();
        while tokens.peek().is_some_and(|token| token.contains('=')) {
            tokens.next();
        }
    }
    tokens.find(|token| !token.starts_with('%'))
}

fn split_exec(exec: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut escaped = false;
    for ch in exec.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ch if ch.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            ch => current.push(ch),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Reads `Key: value` pairs from a Debian control paragraph.
pub fn parse_debian_control(control: &str) -> PackageMetadata {
    let mut metadata = PackageMetadata::default();
    for line in control.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        match key.trim() {
            "Package" => metadata.name = non_empty(value),
            "Version" => metadata.version = non_empty(value),
            "Description" => metadata.comment = non_empty(value),
            "Section" if metadata.categories.is_empty() => {
                if let Some(category) = section_category(&value) {
                    metadata.categories.push(category.to_string());
                }
            }
            _ => {}
        }
    }
    metadata
}

fn section_category(section: &str) -> Option<&'static str> {
    let section = section.rsplit('/').next().unwrap_or(section);
    match section {
        "games" => Some("Game"),
        "graphics" => Some("Graphics"),
        "sound" | "video" => Some("AudioVideo"),
        "devel" => Some("Development"),
        "net" | "web" | "mail" => Some("Network"),
        "editors" | "text" => Some("Utility"),
        "science" | "math" => Some("Science"),
        "education" => Some("Education"),
        "utils" | "misc" => Some("Utility"),
        _ => None,
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
