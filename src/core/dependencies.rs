use std::path::PathBuf;
use std::process::Stdio;

use memget_core::fs_paths::{AppPaths, DesktopPaths};

fn bin_name(tool: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("{}.exe", tool)
    } else {
        tool.to_string()
    }
}

fn version_flag_for(tool: &str) -> &'static str {
    match tool {
        "ffmpeg" | "ffprobe" => "-version",
        "exiftool" => "-ver",
        _ => "--version",
    }
}

/// Locates an external tool: `PATH` first, then the managed bin dir.
pub async fn find_tool(tool: &str) -> Option<PathBuf> {
    let started = std::time::Instant::now();
    let name = bin_name(tool);

    let on_path = crate::core::process::command(&name)
        .arg(version_flag_for(tool))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false);

    let found = if on_path {
        Some(PathBuf::from(&name))
    } else {
        DesktopPaths
            .bin_dir()
            .map(|dir| dir.join(&name))
            .filter(|p| p.exists())
    };

    tracing::debug!("[deps] find_tool({}) = {:?} in {:?}", tool, found, started.elapsed());
    found
}

pub async fn check_version(tool: &str) -> Option<String> {
    let path = find_tool(tool).await?;
    let output = crate::core::process::command(&path)
        .arg(version_flag_for(tool))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let first_line = stdout.lines().next().unwrap_or("");
    if tool == "ffmpeg" || tool == "ffprobe" {
        first_line.split_whitespace().nth(2).map(|s| s.to_string())
    } else {
        Some(first_line.trim().to_string())
    }
}
