pub mod all;
pub mod clear_errors;
pub mod combine;
pub mod dedupe;
pub mod dependencies;
pub mod download;
pub mod metadata;
pub mod settings;

use std::path::PathBuf;

use memget_core::models::record::DownloadRecord;
use memget_core::models::settings::AppSettings;
use tokio_util::sync::CancellationToken;

use crate::cli::Cli;
use crate::core::manifest;
use crate::storage::{self, config, ledger::LedgerHandle};

/// Resolved paths and settings shared by every command.
pub struct Context {
    pub settings: AppSettings,
    pub settings_path: PathBuf,
    pub html_file: PathBuf,
    pub output_dir: PathBuf,
    pub state_dir: PathBuf,
    pub cancel: CancellationToken,
}

impl Context {
    /// Command-line paths win over the settings file.
    pub async fn from_cli(cli: &Cli, cancel: CancellationToken) -> Self {
        let settings_path = cli.config.clone().unwrap_or_else(config::default_settings_path);
        let settings = config::load_settings(&settings_path).await;

        let html_file = cli
            .html
            .clone()
            .unwrap_or_else(|| settings.download.html_file.clone());
        let output_dir = cli
            .output
            .clone()
            .unwrap_or_else(|| settings.download.output_dir.clone());
        let state_dir = cli
            .data_dir
            .clone()
            .unwrap_or_else(|| storage::state_dir_for(&output_dir));

        Self {
            settings,
            settings_path,
            html_file,
            output_dir,
            state_dir,
            cancel,
        }
    }

    pub async fn records(&self) -> anyhow::Result<Vec<DownloadRecord>> {
        manifest::load_manifest(&self.html_file).await
    }

    pub async fn ledger(&self) -> anyhow::Result<LedgerHandle> {
        Ok(LedgerHandle::open(&self.state_dir).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[tokio::test]
    async fn state_dir_follows_output_unless_overridden() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("settings.json");
        let config_arg = config.to_string_lossy().into_owned();

        let cli = Cli::parse_from(["memget", "download", "-o", "out", "--config", &config_arg]);
        let ctx = Context::from_cli(&cli, CancellationToken::new()).await;
        assert_eq!(ctx.output_dir, PathBuf::from("out"));
        assert_eq!(ctx.state_dir, PathBuf::from("out").join(".memget"));
        assert_eq!(ctx.html_file, PathBuf::from("memories_history.html"));

        let cli = Cli::parse_from([
            "memget",
            "download",
            "--data-dir",
            "state",
            "--config",
            &config_arg,
        ]);
        let ctx = Context::from_cli(&cli, CancellationToken::new()).await;
        assert_eq!(ctx.state_dir, PathBuf::from("state"));
        assert_eq!(ctx.settings_path, config);
    }
}
