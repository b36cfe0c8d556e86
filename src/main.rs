use std::process::ExitCode;

use clap::Parser;
use memget_core::fs_paths::{AppPaths, DesktopPaths};
use memget_lib::cli::Cli;

/// Puts the managed tool directory on `PATH` for every child process.
fn setup_environment() {
    if let Some(bin_dir) = DesktopPaths.bin_dir() {
        let sep = if cfg!(windows) { ";" } else { ":" };
        let current = std::env::var("PATH").unwrap_or_default();
        std::env::set_var("PATH", format!("{}{}{}", bin_dir.display(), sep, current));
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    setup_environment();
    let cli = Cli::parse();
    memget_lib::init_tracing(cli.verbose);

    match memget_lib::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
