use std::path::{Path, PathBuf};

use memget_core::fs_paths::{AppPaths, DesktopPaths};
use memget_core::models::settings::AppSettings;

const SETTINGS_FILE: &str = "settings.json";

pub fn default_settings_path() -> PathBuf {
    DesktopPaths.data_dir().join(SETTINGS_FILE)
}

/// Missing file means defaults; an unreadable one is reported and ignored.
pub async fn load_settings(path: &Path) -> AppSettings {
    match super::read_json::<AppSettings>(path).await {
        Ok(Some(settings)) => {
            tracing::debug!("[config] loaded settings from {}", path.display());
            settings
        }
        Ok(None) => AppSettings::default(),
        Err(e) => {
            tracing::warn!(
                "[config] ignoring unreadable settings {}: {}",
                path.display(),
                e
            );
            AppSettings::default()
        }
    }
}

pub async fn save_settings(path: &Path, settings: &AppSettings) -> anyhow::Result<()> {
    super::write_json_atomic(path, settings).await?;
    Ok(())
}
