use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod completion;
mod config;
mod dispatch;
mod render;

use dispatch::{exit_code_for, log_filter_directive, run_cli, Cli};
use render::{current_output_style, TerminalRenderer};

const LOG_ENV: &str = "LOCALPACK_LOG";

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let renderer = TerminalRenderer::new(current_output_style(cli.plain));

    match run_cli(cli, renderer) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            renderer.print_status("err", &format!("{err:#}"));
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn init_tracing(verbose: u8) {
    let env_value = std::env::var(LOG_ENV).ok();
    let directive = log_filter_directive(verbose, env_value.as_deref());
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
