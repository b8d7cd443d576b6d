use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Why an archive entry was refused.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SafetyError {
    #[error("path traversal in archive entry '{entry}'")]
    PathTraversal { entry: PathBuf },

    #[error("absolute paths are not allowed in archive entries: '{entry}'")]
    AbsolutePath { entry: PathBuf },

    #[error("archive entry '{entry}' resolves outside of '{root}'")]
    OutsideRoot { entry: PathBuf, root: PathBuf },

    #[error("symlink '{link}' -> '{target}' escapes '{root}'")]
    SymlinkEscape {
        link: PathBuf,
        target: PathBuf,
        root: PathBuf,
    },

    #[error("archive entry '{entry}' would be written through symlink '{link}'")]
    SymlinkParent { entry: PathBuf, link: PathBuf },

    #[error("hard link '{entry}' must point at a regular file inside the package, not '{source_path}'")]
    HardLinkSource { entry: PathBuf, source_path: PathBuf },

    #[error("cannot inspect '{path}' while checking containment: {reason}")]
    Uninspectable { path: PathBuf, reason: String },

    #[error("path contains a NUL byte: '{path}'")]
    NulByte { path: String },

    #[error("path is {len} bytes long, the limit is {max}")]
    TooLong { len: usize, max: usize },

    #[error("unsupported archive entry type for '{entry}'")]
    UnsupportedEntry { entry: PathBuf },
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("{format} payload could not be unpacked: {reason}")]
    Malformed { format: &'static str, reason: String },

    #[error(
        "{format} extraction failed ({primary}); fallback tool '{tool}' is not installed, install it and retry"
    )]
    FallbackUnavailable {
        format: &'static str,
        tool: &'static str,
        primary: String,
    },

    #[error("{format} extraction failed ({primary}); fallback '{tool}' also failed: {source}")]
    FallbackFailed {
        format: &'static str,
        tool: &'static str,
        primary: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("no launchable executable found in {format} package")]
    NoExecutable { format: &'static str },

    #[error("failed to prepare scratch space: {0}")]
    Scratch(#[source] io::Error),
}

/// Coarse error buckets surfaced to users and mapped to exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    NotFound,
    Unsupported,
    NameValidation,
    AlreadyInstalled,
    Extraction,
    SafetyViolation,
    Integration,
    Materialize,
    Record,
    NotInstalled,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not-found",
            Self::Unsupported => "unsupported",
            Self::NameValidation => "name-validation",
            Self::AlreadyInstalled => "already-installed",
            Self::Extraction => "extraction",
            Self::SafetyViolation => "safety-violation",
            Self::Integration => "integration",
            Self::Materialize => "materialize",
            Self::Record => "record",
            Self::NotInstalled => "not-installed",
        }
    }
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("package file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("unsupported package type for '{file}'; supported: {supported}")]
    Unsupported { file: String, supported: String },

    #[error("invalid application name '{name}': {reason}")]
    NameValidation { name: String, reason: String },

    #[error("'{name}' is already installed at {}; pass --force to replace it", path.display())]
    AlreadyInstalled { name: String, path: PathBuf },

    #[error("extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("unsafe package content: {0}")]
    SafetyViolation(#[from] SafetyError),

    #[error("desktop integration failed during {step}: {source:#}")]
    Integration {
        step: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to materialize {}: {source:#}", path.display())]
    Materialize {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("install record store failed: {0:#}")]
    Record(#[source] anyhow::Error),

    #[error("no installation recorded for '{id}'")]
    NotInstalled { id: String },
}

impl InstallError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Unsupported { .. } => ErrorCategory::Unsupported,
            Self::NameValidation { .. } => ErrorCategory::NameValidation,
            Self::AlreadyInstalled { .. } => ErrorCategory::AlreadyInstalled,
            Self::Extraction(_) => ErrorCategory::Extraction,
            Self::SafetyViolation(_) => ErrorCategory::SafetyViolation,
            Self::Integration { .. } => ErrorCategory::Integration,
            Self::Materialize { .. } => ErrorCategory::Materialize,
            Self::Record(_) => ErrorCategory::Record,
            Self::NotInstalled { .. } => ErrorCategory::NotInstalled,
        }
    }

    pub(crate) fn materialize(path: impl Into<PathBuf>, source: impl Into<anyhow::Error>) -> Self {
        Self::Materialize {
            path: path.into(),
            source: source.into(),
        }
    }
}
