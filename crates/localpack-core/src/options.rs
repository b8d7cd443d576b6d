/// Caller-supplied switches for a single install call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallOptions {
    pub custom_name: Option<String>,
    pub force: bool,
    pub skip_desktop: bool,
    pub skip_wayland_env: bool,
}

impl InstallOptions {
    pub fn with_custom_name(mut self, name: impl Into<String>) -> Self {
        self.custom_name = Some(name.into());
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn skip_desktop(mut self, skip: bool) -> Self {
        self.skip_desktop = skip;
        self
    }

    pub fn skip_wayland_env(mut self, skip: bool) -> Self {
        self.skip_wayland_env = skip;
        self
    }

    /// The explicit name override, ignoring blank values.
    pub fn custom_name(&self) -> Option<&str> {
        self.custom_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}
