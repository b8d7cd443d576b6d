use std::path::Path;

use anyhow::anyhow;

pub const MAX_IDENTIFIER_LEN: usize = 255;

const KNOWN_EXTENSIONS: [&str; 15] = [
    ".appimage",
    ".tar.gz",
    ".tgz",
    ".tar.xz",
    ".txz",
    ".tar.zst",
    ".tzst",
    ".tar.bz2",
    ".tbz2",
    ".tar",
    ".deb",
    ".rpm",
    ".bin",
    ".run",
    ".elf",
];

const ARCH_TOKENS: [&str; 11] = [
    "x86_64", "x86-64", "amd64", "aarch64", "arm64", "armhf", "i386", "i686", "x64", "linux",
    "noarch",
];

/// Lower-cases `name` and maps it onto the identifier alphabet
/// (`a-z`, `0-9`, `.`, `_`, `-`).
///
/// Whitespace and other characters become `-`, runs of `-` collapse, and
/// leading or trailing separators are trimmed. The result may still fail
/// [`validate_identifier`] (for example when nothing survives).
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.trim().chars() {
        let mapped = match ch {
            'a'..='z' | '0'..='9' | '.' | '_' | '-' => ch,
            'A'..='Z' => ch.to_ascii_lowercase(),
            _ => '-',
        };
        if mapped == '-' && out.ends_with('-') {
            continue;
        }
        out.push(mapped);
    }

    out.trim_matches(|ch: char| matches!(ch, '-' | '.' | '_'))
        .to_string()
}

/// Allow-list check applied before an identifier is joined onto any
/// destination directory.
pub fn validate_identifier(id: &str) -> anyhow::Result<()> {
    if id.is_empty() {
        return Err(anyhow!("identifier must not be empty"));
    }
    if id.len() > MAX_IDENTIFIER_LEN {
        return Err(anyhow!(
            "identifier is longer than {MAX_IDENTIFIER_LEN} bytes"
        ));
    }
    if id.contains("..") {
        return Err(anyhow!("identifier '{id}' contains a path traversal sequence"));
    }
    if id.starts_with('/') || id.starts_with('~') || id.contains(":/") {
        return Err(anyhow!("identifier '{id}' looks like an absolute path"));
    }
    if let Some(bad) = id
        .chars()
        .find(|ch: &char| !(ch.is_ascii_alphanumeric() || matches!(*ch, '.' | '_' | '-')))
    {
        return Err(anyhow!(
            "identifier '{id}' contains disallowed character {bad:?}"
        ));
    }
    if id.starts_with('.') || id.starts_with('-') {
        return Err(anyhow!(
            "identifier '{id}' must start with a letter, digit or underscore"
        ));
    }
    Ok(())
}

/// Install ids are the normalized name itself, so the same input always
/// maps onto the same record key.
pub fn install_id_for(normalized_name: &str) -> String {
    normalized_name.to_string()
}

/// Human-facing application name guessed from a package file name:
/// known package extensions are removed and everything from the first
/// version or architecture token onwards is dropped.
pub fn derive_name_from_filename(path: &Path) -> String {
    let stem = file_stem_without_package_extension(path);
    let tokens = split_tokens(&stem);

    let cut = tokens
        .iter()
        .position(|(_, token)| is_version_token(token) || is_arch_token(token));
    match cut {
        Some(0) | None => stem.trim().to_string(),
        Some(index) => {
            let end = tokens[index].0;
            stem[..end]
                .trim_end_matches(|ch: char| matches!(ch, '-' | '_' | ' ' | '.'))
                .to_string()
        }
    }
}

/// First version-looking token of the file name, without a leading `v`.
pub fn version_from_filename(path: &Path) -> Option<String> {
    let stem = file_stem_without_package_extension(path);
    split_tokens(&stem)
        .into_iter()
        .map(|(_, token)| token)
        .find(|token| is_version_token(token))
        .map(|token| {
            token
                .strip_prefix(|ch: char| ch == 'v' || ch == 'V')
                .unwrap_or(token)
                .to_string()
        })
}

fn file_stem_without_package_extension(path: &Path) -> String {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let lower = file_name.to_ascii_lowercase();
    for extension in KNOWN_EXTENSIONS {
        if lower.len() > extension.len() && lower.ends_with(extension) {
            return file_name[..file_name.len() - extension.len()].to_string();
        }
    }
    file_name
}

fn split_tokens(stem: &str) -> Vec<(usize, &str)> {
    let mut tokens = Vec::new();
    let mut start = None;
    for (index, ch) in stem.char_indices() {
        if matches!(ch, '-' | '_' | ' ') {
            if let Some(begin) = start.take() {
                tokens.push((begin, &stem[begin..index]));
            }
        } else if start.is_none() {
            start = Some(index);
        }
    }
    if let Some(begin) = start {
        tokens.push((begin, &stem[begin..]));
    }
    tokens
}

fn is_version_token(token: &str) -> bool {
    let body = token.strip_prefix(|ch: char| ch == 'v' || ch == 'V').unwrap_or(token);
    let Some(first) = body.chars().next() else {
        return false;
    };
    if !first.is_ascii_digit() {
        return false;
    }
    body.contains('.') || body.chars().all(|ch| ch.is_ascii_digit())
}

fn is_arch_token(token: &str) -> bool {
    let lower = token.to_ascii_lowercase();
    ARCH_TOKENS.contains(&lower.as_str())
}
