use std::io::IsTerminal;
use std::time::Duration;

use anstyle::{AnsiColor, Effects, Style};
use indicatif::{ProgressBar, ProgressStyle};
use localpack_core::InstallRecord;
use localpack_installer::UninstallReport;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

pub(crate) fn resolve_output_style(plain_requested: bool, stdout_is_tty: bool) -> OutputStyle {
    if plain_requested || !stdout_is_tty {
        OutputStyle::Plain
    } else {
        OutputStyle::Rich
    }
}

pub(crate) fn current_output_style(plain_requested: bool) -> OutputStyle {
    resolve_output_style(plain_requested, std::io::stdout().is_terminal())
}

/// One status line. Plain output stays unadorned except for warnings and
/// errors, which keep a textual prefix.
pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => match status {
            "warn" => format!("warning: {message}"),
            "err" => format!("error: {message}"),
            _ => message.to_string(),
        },
        OutputStyle::Rich => format!("{} {message}", status_badge(status)),
    }
}

fn status_badge(status: &str) -> &'static str {
    match status {
        "ok" => "[OK]",
        "warn" => "[WARN]",
        "err" => "[ERR]",
        _ => "[..]",
    }
}

fn badge_style(status: &str) -> Style {
    let color = match status {
        "ok" => AnsiColor::BrightGreen,
        "warn" => AnsiColor::BrightYellow,
        "err" => AnsiColor::BrightRed,
        _ => AnsiColor::BrightBlue,
    };
    Style::new()
        .fg_color(Some(color.into()))
        .effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

/// Writes status lines, colouring badges in rich mode. Errors and
/// warnings go to stderr.
#[derive(Copy, Clone, Debug)]
pub(crate) struct TerminalRenderer {
    style: OutputStyle,
}

impl TerminalRenderer {
    pub(crate) fn new(style: OutputStyle) -> Self {
        Self { style }
    }

    pub(crate) fn print_status(self, status: &str, message: &str) {
        let line = self.paint(status, message);
        if matches!(status, "warn" | "err") {
            eprintln!("{line}");
        } else {
            println!("{line}");
        }
    }

    pub(crate) fn print_lines(self, lines: &[String]) {
        for line in lines {
            println!("{line}");
        }
    }

    fn paint(self, status: &str, message: &str) -> String {
        match self.style {
            OutputStyle::Plain => render_status_line(self.style, status, message),
            OutputStyle::Rich => format!(
                "{} {message}",
                colorize(badge_style(status), status_badge(status))
            ),
        }
    }

    /// Spinner shown while an install runs; `None` in plain mode.
    pub(crate) fn start_spinner(self, label: &str) -> Option<ProgressBar> {
        if self.style == OutputStyle::Plain {
            return None;
        }
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan.bold} {msg} {elapsed}") {
            spinner.set_style(style.tick_chars(".oO@* "));
        }
        spinner.set_message(label.to_string());
        spinner.enable_steady_tick(Duration::from_millis(80));
        Some(spinner)
    }
}

pub(crate) fn format_install_outcome_lines(record: &InstallRecord) -> Vec<String> {
    let mut lines = vec![format!(
        "  id: {}  type: {}",
        record.install_id,
        record.package_type.display_name()
    )];
    lines.push(format!("  path: {}", record.install_path.display()));
    if let Some(link) = &record.metadata.exec_link {
        lines.push(format!("  launcher: {}", link.display()));
    }
    for desktop in &record.desktop_files {
        lines.push(format!("  desktop entry: {}", desktop.display()));
    }
    lines
}

pub(crate) fn install_summary(record: &InstallRecord) -> String {
    match &record.version {
        Some(version) => format!("installed {} {version}", record.name),
        None => format!("installed {}", record.name),
    }
}

pub(crate) fn format_list_lines(records: &[InstallRecord]) -> Vec<String> {
    if records.is_empty() {
        return vec!["no packages installed".to_string()];
    }
    let id_width = records
        .iter()
        .map(|record| record.install_id.len())
        .max()
        .unwrap_or(0);
    records
        .iter()
        .map(|record| {
            format!(
                "{:<id_width$}  {:<8}  {:<12}  {}",
                record.install_id,
                record.package_type.display_name(),
                record.version.as_deref().unwrap_or("-"),
                record.name,
            )
            .trim_end()
            .to_string()
        })
        .collect()
}

pub(crate) fn format_info_lines(record: &InstallRecord) -> Vec<String> {
    let meta = &record.metadata;
    let mut lines = vec![
        format!("Name: {}", record.name),
        format!("Id: {}", record.install_id),
        format!("Type: {}", record.package_type.display_name()),
        format!("Version: {}", record.version.as_deref().unwrap_or("unknown")),
        format!("Installed at: {}", record.installed_at_unix),
        format!("Source: {}", record.original_file.display()),
        format!("Path: {}", record.install_path.display()),
        format!("Install method: {}", meta.install_method.as_str()),
        format!("Wayland: {}", meta.wayland_support.as_str()),
    ];
    if let Some(link) = &meta.exec_link {
        lines.push(format!("Launcher: {}", link.display()));
    }
    if let Some(comment) = &meta.comment {
        lines.push(format!("Comment: {comment}"));
    }
    if !meta.categories.is_empty() {
        lines.push(format!("Categories: {}", meta.categories.join(", ")));
    }
    for desktop in &record.desktop_files {
        lines.push(format!("Desktop entry: {}", desktop.display()));
    }
    for icon in &meta.icon_files {
        lines.push(format!("Icon: {}", icon.display()));
    }
    lines
}

pub(crate) fn format_uninstall_lines(install_id: &str, report: &UninstallReport) -> Vec<String> {
    let mut lines = vec![format!(
        "uninstalled {install_id} ({} paths removed)",
        report.removed.len()
    )];
    lines.extend(
        report
            .removed
            .iter()
            .map(|path| format!("  removed {}", path.display())),
    );
    lines
}
