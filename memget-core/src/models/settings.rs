use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::fs_paths::{AppPaths, DesktopPaths};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    pub schema_version: u32,
    pub download: DownloadSettings,
    #[serde(default)]
    pub metadata: MetadataSettings,
    #[serde(default)]
    pub overlay: OverlaySettings,
    #[serde(default)]
    pub dedupe: DedupeSettings,
    #[serde(default)]
    pub proxy: ProxySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSettings {
    pub html_file: PathBuf,
    pub output_dir: PathBuf,
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_stall_timeout_secs")]
    pub stall_timeout_secs: u64,
    #[serde(default = "default_test_files_per_worker")]
    pub test_files_per_worker: u32,
    #[serde(default = "default_true")]
    pub extract_archives: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub set_file_times: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlaySettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Remove the base and overlay once their composite exists.
    #[serde(default)]
    pub delete_originals: bool,
    #[serde(default = "default_video_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default = "default_overlay_workers")]
    pub max_concurrent: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupeSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProxySettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_proxy_type")]
    pub proxy_type: String,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_proxy_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

fn default_max_concurrent_downloads() -> u32 {
    5
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_stall_timeout_secs() -> u64 {
    45
}

fn default_test_files_per_worker() -> u32 {
    5
}

fn default_tool_timeout_secs() -> u64 {
    30
}

fn default_video_timeout_secs() -> u64 {
    600
}

fn default_overlay_workers() -> u32 {
    2
}

fn default_jpeg_quality() -> u8 {
    95
}

fn default_true() -> bool {
    true
}

fn default_proxy_type() -> String {
    "http".into()
}

fn default_proxy_port() -> u16 {
    8080
}

impl Default for MetadataSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            tool_timeout_secs: default_tool_timeout_secs(),
            set_file_times: true,
        }
    }
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            delete_originals: false,
            tool_timeout_secs: default_video_timeout_secs(),
            max_concurrent: default_overlay_workers(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for DedupeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            dry_run: false,
        }
    }
}

impl Default for AppSettings {
    fn default() -> Self {
        let paths = DesktopPaths;
        Self {
            schema_version: 1,
            download: DownloadSettings {
                html_file: PathBuf::from("memories_history.html"),
                output_dir: paths.downloads_dir(),
                max_concurrent_downloads: default_max_concurrent_downloads(),
                max_attempts: default_max_attempts(),
                retry_base_delay_ms: default_retry_base_delay_ms(),
                retry_max_delay_ms: default_retry_max_delay_ms(),
                request_timeout_secs: default_request_timeout_secs(),
                stall_timeout_secs: default_stall_timeout_secs(),
                test_files_per_worker: default_test_files_per_worker(),
                extract_archives: true,
            },
            metadata: MetadataSettings::default(),
            overlay: OverlaySettings::default(),
            dedupe: DedupeSettings::default(),
            proxy: ProxySettings::default(),
        }
    }
}
