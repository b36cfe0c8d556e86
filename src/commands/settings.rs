use memget_core::models::settings::AppSettings;

use crate::cli::SettingsCommand;
use crate::storage::config;

use super::Context;

pub async fn run(ctx: &Context, command: &SettingsCommand) -> anyhow::Result<()> {
    let current = match command {
        SettingsCommand::Show => ctx.settings.clone(),
        SettingsCommand::Set { patch } => {
            let updated = apply_patch(&ctx.settings, patch)?;
            config::save_settings(&ctx.settings_path, &updated).await?;
            tracing::info!("[config] saved {}", ctx.settings_path.display());
            updated
        }
        SettingsCommand::Reset => {
            let defaults = AppSettings::default();
            config::save_settings(&ctx.settings_path, &defaults).await?;
            tracing::info!("[config] restored defaults in {}", ctx.settings_path.display());
            defaults
        }
    };
    println!("{}", serde_json::to_string_pretty(&current)?);
    Ok(())
}

/// Deep-merges a JSON object into the settings; keys absent from the patch
/// keep their current value.
pub fn apply_patch(current: &AppSettings, patch: &str) -> anyhow::Result<AppSettings> {
    let patch: serde_json::Value =
        serde_json::from_str(patch).map_err(|e| anyhow::anyhow!("invalid JSON: {}", e))?;
    if !patch.is_object() {
        anyhow::bail!("settings patch must be a JSON object");
    }
    let mut value = serde_json::to_value(current)?;
    merge_json(&mut value, &patch);
    serde_json::from_value(value).map_err(|e| anyhow::anyhow!("invalid settings: {}", e))
}

fn merge_json(base: &mut serde_json::Value, patch: &serde_json::Value) {
    if let (Some(base_obj), Some(patch_obj)) = (base.as_object_mut(), patch.as_object()) {
        for (key, value) in patch_obj {
            let nested = value.is_object() && base_obj.get(key).is_some_and(|v| v.is_object());
            match base_obj.get_mut(key) {
                Some(existing) if nested => merge_json(existing, value),
                _ => {
                    base_obj.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_changes_only_named_fields() {
        let current = AppSettings::default();
        let updated = apply_patch(
            &current,
            r#"{"download": {"max_concurrent_downloads": 12}, "overlay": {"delete_originals": true}}"#,
        )
        .unwrap();
        assert_eq!(updated.download.max_concurrent_downloads, 12);
        assert_eq!(updated.download.max_attempts, current.download.max_attempts);
        assert!(updated.overlay.delete_originals);
        assert_eq!(updated.overlay.jpeg_quality, 95);
    }

    #[test]
    fn patch_with_wrong_type_is_rejected() {
        let err = apply_patch(&AppSettings::default(), r#"{"download": {"max_attempts": "many"}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("invalid settings"));
        assert!(apply_patch(&AppSettings::default(), "[1, 2]").is_err());
    }
}
