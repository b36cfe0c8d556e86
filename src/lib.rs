use tokio_util::sync::CancellationToken;

pub mod cli;
pub mod commands;
pub mod core;
pub mod models;
pub mod storage;

use cli::{Cli, Command};
use commands::Context;

/// `RUST_LOG` wins; otherwise `-v` raises this crate's level.
pub fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "info,memget_lib=debug,memget=debug",
        _ => "debug,memget_lib=trace,memget=trace",
    };
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("[memget] interrupt received; finishing in-flight writes");
            cancel.cancel();
        }
    });
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());
    let ctx = Context::from_cli(&cli, cancel).await;

    match &cli.command {
        Command::All(args) => {
            commands::all::run(&ctx, args).await?;
        }
        Command::Download(args) => {
            commands::download::run(&ctx, args).await?;
        }
        Command::Metadata => {
            commands::metadata::run(&ctx).await?;
        }
        Command::Combine(args) => {
            commands::combine::run(&ctx, args).await?;
        }
        Command::Dedupe(args) => {
            commands::dedupe::run(&ctx, args).await?;
        }
        Command::ClearErrors => {
            commands::clear_errors::run(&ctx).await?;
        }
        Command::Deps => commands::dependencies::run().await?,
        Command::Settings { sub } => commands::settings::run(&ctx, sub).await?,
    }
    Ok(())
}
