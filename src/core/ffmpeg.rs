use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::{dependencies, process};

#[derive(Debug, thiserror::Error)]
pub enum CompositeError {
    #[error("{tool} could not be run: {message}")]
    Spawn { tool: &'static str, message: String },
    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: &'static str,
        status: String,
        stderr: String,
    },
    #[error("no composite was produced")]
    EmptyOutput,
    #[error("image compositing failed: {0}")]
    Image(String),
}

/// Burns an overlay into a base video.
#[async_trait]
pub trait Compositor: Send + Sync {
    async fn composite(&self, base: &Path, overlay: &Path, output: &Path) -> Result<(), CompositeError>;

    fn is_available(&self) -> bool {
        true
    }
}

pub struct NoopCompositor;

#[async_trait]
impl Compositor for NoopCompositor {
    async fn composite(&self, _base: &Path, _overlay: &Path, _output: &Path) -> Result<(), CompositeError> {
        Ok(())
    }

    fn is_available(&self) -> bool {
        false
    }
}

pub struct FfmpegOverlay {
    ffmpeg: PathBuf,
    ffprobe: Option<PathBuf>,
    timeout: Duration,
}

impl FfmpegOverlay {
    pub fn new(ffmpeg: PathBuf, ffprobe: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            ffmpeg,
            ffprobe,
            timeout,
        }
    }

    async fn probe_dimensions(&self, video: &Path) -> Option<(u32, u32)> {
        let ffprobe = self.ffprobe.as_ref()?;
        let mut cmd = process::command(ffprobe);
        cmd.args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height",
            "-of",
            "csv=p=0",
        ])
        .arg(video);
        let output = process::output_with_timeout(cmd, Duration::from_secs(30)).await.ok()?;
        if !output.status.success() {
            return None;
        }
        parse_dimensions(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Looks ffmpeg up once per run.
pub async fn detect_compositor(timeout: Duration) -> Arc<dyn Compositor> {
    match dependencies::find_tool("ffmpeg").await {
        Some(ffmpeg) => {
            let ffprobe = dependencies::find_tool("ffprobe").await;
            if ffprobe.is_none() {
                tracing::debug!("[overlay] ffprobe not found; overlays keep their own size");
            }
            Arc::new(FfmpegOverlay::new(ffmpeg, ffprobe, timeout))
        }
        None => Arc::new(NoopCompositor),
    }
}

#[async_trait]
impl Compositor for FfmpegOverlay {
    async fn composite(&self, base: &Path, overlay: &Path, output: &Path) -> Result<(), CompositeError> {
        let dims = self.probe_dimensions(base).await;
        let mut cmd = process::command(&self.ffmpeg);
        cmd.args(["-y", "-v", "error", "-i"])
            .arg(base)
            .arg("-i")
            .arg(overlay)
            .args(overlay_args(dims))
            .arg(output);

        let result = process::output_with_timeout(cmd, self.timeout)
            .await
            .map_err(|e| CompositeError::Spawn {
                tool: "ffmpeg",
                message: e.to_string(),
            })?;
        if !result.status.success() {
            return Err(CompositeError::Failed {
                tool: "ffmpeg",
                status: result.status.to_string(),
                stderr: process::stderr_tail(&result),
            });
        }

        let size = tokio::fs::metadata(output).await.map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Err(CompositeError::EmptyOutput);
        }
        Ok(())
    }
}

/// Filter graph and encoder arguments. With known base dimensions the overlay
/// is scaled to fit inside the frame and centred.
pub fn overlay_args(dims: Option<(u32, u32)>) -> Vec<String> {
    let filter = match dims {
        Some((w, h)) => format!(
            "[1:v]scale={}:{}:force_original_aspect_ratio=decrease[ov];\
             [0:v][ov]overlay=(main_w-overlay_w)/2:(main_h-overlay_h)/2:format=auto[v]",
            w, h
        ),
        None => "[0:v][1:v]overlay=(main_w-overlay_w)/2:(main_h-overlay_h)/2:format=auto[v]".to_string(),
    };
    [
        "-filter_complex",
        filter.as_str(),
        "-map",
        "[v]",
        "-map",
        "0:a?",
        "-map_metadata",
        "0",
        "-c:a",
        "copy",
        "-c:v",
        "libx264",
        "-preset",
        "medium",
        "-crf",
        "18",
        "-pix_fmt",
        "yuv420p",
        "-movflags",
        "+faststart",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn parse_dimensions(stdout: &str) -> Option<(u32, u32)> {
    let line = stdout.lines().next()?.trim();
    let (w, h) = line.split_once(',')?;
    let w: u32 = w.trim().parse().ok()?;
    let h: u32 = h.trim().trim_end_matches(',').parse().ok()?;
    (w > 0 && h > 0).then_some((w, h))
}
