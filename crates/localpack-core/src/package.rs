use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PackageType {
    AppImage,
    Binary,
    Debian,
    Rpm,
    Tarball,
}

impl PackageType {
    pub const ALL: [PackageType; 5] = [
        Self::AppImage,
        Self::Binary,
        Self::Debian,
        Self::Rpm,
        Self::Tarball,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AppImage => "appimage",
            Self::Binary => "binary",
            Self::Debian => "debian",
            Self::Rpm => "rpm",
            Self::Tarball => "tarball",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::AppImage => "AppImage",
            Self::Binary => "Binary",
            Self::Debian => "Debian",
            Self::Rpm => "RPM",
            Self::Tarball => "Tarball",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "appimage" => Some(Self::AppImage),
            "binary" | "bin" => Some(Self::Binary),
            "debian" | "deb" => Some(Self::Debian),
            "rpm" => Some(Self::Rpm),
            "tarball" | "tar" => Some(Self::Tarball),
            _ => None,
        }
    }

    /// Whether the payload is unpacked into a directory tree rather than
    /// copied as a single executable.
    pub fn is_archive(self) -> bool {
        matches!(self, Self::Debian | Self::Rpm | Self::Tarball)
    }
}

impl std::fmt::Display for PackageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}
