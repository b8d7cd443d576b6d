use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use clap_complete::Shell;
use localpack_core::InstallOptions;
use localpack_installer::{
    default_user_layout, CommandRunner, ErrorCategory, InstallContext, InstallError,
    InstallLayout, PackageManager, SystemRunner,
};
use tracing::debug;

use crate::completion::write_completions_script;
use crate::config::{load_config, Config};
use crate::render::{
    format_info_lines, format_install_outcome_lines, format_list_lines, format_uninstall_lines,
    install_summary, TerminalRenderer,
};

#[derive(Parser, Debug)]
#[command(name = "localpack", version)]
#[command(
    about = "Install local Linux application packages into per-user locations",
    long_about = None
)]
pub(crate) struct Cli {
    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub(crate) verbose: u8,
    /// Config file to use instead of the default location.
    #[arg(long, global = true, value_name = "PATH")]
    pub(crate) config: Option<PathBuf>,
    /// Disable badges, colours and spinners.
    #[arg(long, global = true)]
    pub(crate) plain: bool,
    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Install a package file.
    Install {
        file: PathBuf,
        /// Application name to use instead of the detected one.
        #[arg(long, value_name = "NAME")]
        name: Option<String>,
        /// Replace an existing installation with the same id.
        #[arg(long)]
        force: bool,
        #[arg(long)]
        skip_desktop: bool,
        #[arg(long)]
        skip_wayland_env: bool,
    },
    /// Remove an installed package and everything it created.
    Uninstall { id: String },
    /// List installed packages.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show the stored record for an installed package.
    Info { id: String },
    /// Report which package type a file is detected as.
    Detect { file: PathBuf },
    /// Show install locations and external tool availability.
    Doctor,
    /// Print a shell completion script.
    Completions { shell: Shell },
}

pub(crate) fn install_options(
    name: Option<String>,
    force: bool,
    skip_desktop: bool,
    skip_wayland_env: bool,
) -> InstallOptions {
    let options = InstallOptions::default()
        .force(force)
        .skip_desktop(skip_desktop)
        .skip_wayland_env(skip_wayland_env);
    match name {
        Some(name) => options.with_custom_name(name),
        None => options,
    }
}

/// External tools the installer can use, with what each is for.
pub(crate) const DOCTOR_TOOLS: &[(&str, &str)] = &[
    ("unsquashfs", "AppImage extraction fallback"),
    ("tar", "tarball extraction fallback"),
    ("dpkg-deb", "Debian extraction fallback"),
    ("bsdtar", "RPM extraction fallback"),
    ("desktop-file-validate", "desktop entry validation"),
    ("gtk-update-icon-cache", "icon cache refresh"),
    ("update-desktop-database", "menu database refresh"),
];

pub(crate) fn run_cli(cli: Cli, renderer: TerminalRenderer) -> Result<()> {
    match cli.command {
        Commands::Install {
            file,
            name,
            force,
            skip_desktop,
            skip_wayland_env,
        } => {
            let manager = build_manager(cli.config.as_deref())?;
            let options = install_options(name, force, skip_desktop, skip_wayland_env);
            let label = format!("installing {}", display_file_name(&file));
            let spinner = renderer.start_spinner(&label);
            let result = manager.install(&file, &options);
            if let Some(spinner) = spinner {
                spinner.finish_and_clear();
            }
            let record = result?;
            renderer.print_status("ok", &install_summary(&record));
            renderer.print_lines(&format_install_outcome_lines(&record));
        }
        Commands::Uninstall { id } => {
            let manager = build_manager(cli.config.as_deref())?;
            let report = manager.uninstall(&id)?;
            let mut lines = format_uninstall_lines(&id, &report).into_iter();
            if let Some(summary) = lines.next() {
                renderer.print_status("ok", &summary);
            }
            renderer.print_lines(&lines.collect::<Vec<_>>());
            for warning in &report.warnings {
                renderer.print_status("warn", warning);
            }
        }
        Commands::List { json } => {
            let manager = build_manager(cli.config.as_deref())?;
            let records = manager.list()?;
            if json {
                let rendered = serde_json::to_string_pretty(&records)
                    .context("failed to serialize install records")?;
                println!("{rendered}");
            } else {
                renderer.print_lines(&format_list_lines(&records));
            }
        }
        Commands::Info { id } => {
            let manager = build_manager(cli.config.as_deref())?;
            let record = manager
                .get(&id)?
                .ok_or(InstallError::NotInstalled { id })?;
            renderer.print_lines(&format_info_lines(&record));
        }
        Commands::Detect { file } => {
            let manager = build_manager(cli.config.as_deref())?;
            let package_type = manager.detect(&file)?;
            renderer.print_status(
                "ok",
                &format!(
                    "{}: {}",
                    display_file_name(&file),
                    package_type.display_name()
                ),
            );
        }
        Commands::Doctor => {
            let manager = build_manager(cli.config.as_deref())?;
            let ctx = manager.context();
            renderer.print_lines(&doctor_layout_lines(&ctx.layout));
            for (tool, purpose) in DOCTOR_TOOLS {
                let (status, message) = doctor_tool_line(ctx.runner.as_ref(), tool, purpose);
                renderer.print_status(status, &message);
            }
        }
        Commands::Completions { shell } => {
            let mut stdout = std::io::stdout();
            write_completions_script(shell, &mut stdout)?;
        }
    }

    Ok(())
}

fn build_manager(config_path: Option<&Path>) -> Result<PackageManager> {
    let config = load_config(config_path)?;
    let layout = resolve_layout(&config)?;
    debug!(
        config = ?config_path,
        bin = %layout.bin_dir().display(),
        state = %layout.state_dir().display(),
        "resolved install layout"
    );
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new());
    let ctx = InstallContext::new(layout, config.timeouts(), runner);
    Ok(PackageManager::new(ctx))
}

fn resolve_layout(config: &Config) -> Result<InstallLayout> {
    Ok(config.apply_layout(default_user_layout()?))
}

pub(crate) fn doctor_layout_lines(layout: &InstallLayout) -> Vec<String> {
    vec![
        format!("bin: {}", layout.bin_dir().display()),
        format!("apps: {}", layout.apps_dir().display()),
        format!("applications: {}", layout.applications_dir().display()),
        format!("icons: {}", layout.icons_dir().display()),
        format!("state: {}", layout.state_dir().display()),
    ]
}

pub(crate) fn doctor_tool_line(
    runner: &dyn CommandRunner,
    tool: &str,
    purpose: &str,
) -> (&'static str, String) {
    if runner.exists(tool) {
        ("ok", format!("{tool}: found ({purpose})"))
    } else {
        ("warn", format!("{tool}: not found ({purpose} unavailable)"))
    }
}

fn display_file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Process exit status for a failed command. Each user-visible error
/// category keeps its own code.
pub(crate) fn exit_code_for(err: &anyhow::Error) -> u8 {
    let Some(install_err) = err.downcast_ref::<InstallError>() else {
        return 1;
    };
    match install_err.category() {
        ErrorCategory::Unsupported => 3,
        ErrorCategory::NameValidation => 4,
        ErrorCategory::Extraction => 5,
        ErrorCategory::SafetyViolation => 6,
        ErrorCategory::Integration => 7,
        ErrorCategory::AlreadyInstalled => 8,
        ErrorCategory::NotFound => 9,
        ErrorCategory::Materialize | ErrorCategory::Record | ErrorCategory::NotInstalled => 1,
    }
}

/// `EnvFilter` directive: `-v` flags win over `LOCALPACK_LOG`, which wins
/// over the `warn` default.
pub(crate) fn log_filter_directive(verbose: u8, env_value: Option<&str>) -> String {
    match verbose {
        0 => env_value
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or("warn")
            .to_string(),
        1 => "info".to_string(),
        _ => "debug".to_string(),
    }
}
