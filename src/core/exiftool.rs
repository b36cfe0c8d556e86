use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use memget_core::models::record::{GeoPoint, MediaKind};

use crate::core::process;

#[derive(Debug, thiserror::Error)]
pub enum TagError {
    #[error("exiftool could not be run: {0}")]
    Spawn(String),
    #[error("exiftool exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
}

/// What to write into one file.
#[derive(Debug, Clone, PartialEq)]
pub struct TagRequest {
    pub kind: MediaKind,
    pub captured_at: Option<DateTime<Utc>>,
    pub location: Option<GeoPoint>,
}

#[async_trait]
pub trait Tagger: Send + Sync {
    async fn tag(&self, path: &Path, request: &TagRequest) -> Result<(), TagError>;

    /// Copies every writable tag of `source` onto `target`.
    async fn copy_tags(&self, source: &Path, target: &Path) -> Result<(), TagError>;

    fn is_available(&self) -> bool {
        true
    }
}

/// Stand-in used when exiftool is not installed.
pub struct NoopTagger;

#[async_trait]
impl Tagger for NoopTagger {
    async fn tag(&self, _path: &Path, _request: &TagRequest) -> Result<(), TagError> {
        Ok(())
    }

    async fn copy_tags(&self, _source: &Path, _target: &Path) -> Result<(), TagError> {
        Ok(())
    }

    fn is_available(&self) -> bool {
        false
    }
}

pub struct ExifTool {
    program: PathBuf,
    timeout: Duration,
}

impl ExifTool {
    pub fn new(program: PathBuf, timeout: Duration) -> Self {
        Self { program, timeout }
    }

    async fn run(&self, args: Vec<std::ffi::OsString>) -> Result<(), TagError> {
        let mut cmd = process::command(&self.program);
        cmd.args(args);

        let output = process::output_with_timeout(cmd, self.timeout)
            .await
            .map_err(|e| TagError::Spawn(e.to_string()))?;
        if !output.status.success() {
            return Err(TagError::Failed {
                status: output.status.to_string(),
                stderr: process::stderr_tail(&output),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Tagger for ExifTool {
    async fn tag(&self, path: &Path, request: &TagRequest) -> Result<(), TagError> {
        let mut args: Vec<std::ffi::OsString> = tag_args(request).into_iter().map(Into::into).collect();
        args.push(path.into());
        self.run(args).await
    }

    async fn copy_tags(&self, source: &Path, target: &Path) -> Result<(), TagError> {
        self.run(copy_args(source, target)).await
    }
}

/// `-TagsFromFile` invocation that clones all groups of `source` into `target`.
pub fn copy_args(source: &Path, target: &Path) -> Vec<std::ffi::OsString> {
    vec![
        "-overwrite_original".into(),
        "-q".into(),
        "-TagsFromFile".into(),
        source.into(),
        "-all:all".into(),
        target.into(),
    ]
}

/// Command-line arguments for one file, path excluded.
pub fn tag_args(request: &TagRequest) -> Vec<String> {
    let mut args = vec!["-overwrite_original".to_string(), "-q".to_string()];

    if let Some(ts) = request.captured_at {
        let stamp = ts.format("%Y:%m:%d %H:%M:%S+00:00").to_string();
        match request.kind {
            MediaKind::Image => {
                for tag in ["DateTimeOriginal", "CreateDate", "ModifyDate"] {
                    args.push(format!("-{}={}", tag, stamp));
                }
                for tag in ["OffsetTime", "OffsetTimeOriginal", "OffsetTimeDigitized"] {
                    args.push(format!("-{}=+00:00", tag));
                }
            }
            MediaKind::Video => {
                args.push("-api".into());
                args.push("QuickTimeUTC".into());
                for tag in ["CreateDate", "ModifyDate", "TrackCreateDate", "MediaCreateDate"] {
                    args.push(format!("-QuickTime:{}={}", tag, stamp));
                }
            }
        }
    }

    if let Some(loc) = request.location {
        let lat_ref = if loc.latitude >= 0.0 { "N" } else { "S" };
        let lon_ref = if loc.longitude >= 0.0 { "E" } else { "W" };
        args.push(format!("-GPSLatitude={}", loc.latitude));
        args.push(format!("-GPSLatitudeRef={}", lat_ref));
        args.push(format!("-GPSLongitude={}", loc.longitude));
        args.push(format!("-GPSLongitudeRef={}", lon_ref));
        if request.kind == MediaKind::Video {
            args.push(format!("-GPSCoordinates={}, {}", loc.latitude, loc.longitude));
        }
    }

    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 5, 1, 14, 3, 22).unwrap()
    }

    #[test]
    fn image_args_carry_offset_and_gps_refs() {
        let args = tag_args(&TagRequest {
            kind: MediaKind::Image,
            captured_at: Some(at()),
            location: GeoPoint::new(-33.5, 151.25),
        });
        assert!(args.contains(&"-DateTimeOriginal=2023:05:01 14:03:22+00:00".to_string()));
        assert!(args.contains(&"-OffsetTimeOriginal=+00:00".to_string()));
        assert!(args.contains(&"-GPSLatitude=-33.5".to_string()));
        assert!(args.contains(&"-GPSLatitudeRef=S".to_string()));
        assert!(args.contains(&"-GPSLongitudeRef=E".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("-GPSCoordinates")));
        assert!(!args.contains(&"QuickTimeUTC".to_string()));
    }

    #[test]
    fn video_args_use_quicktime_tags() {
        let args = tag_args(&TagRequest {
            kind: MediaKind::Video,
            captured_at: Some(at()),
            location: GeoPoint::new(48.0, -13.0),
        });
        assert!(args.windows(2).any(|w| w == ["-api", "QuickTimeUTC"]));
        assert!(args.contains(&"-QuickTime:MediaCreateDate=2023:05:01 14:03:22+00:00".to_string()));
        assert!(args.contains(&"-GPSLongitudeRef=W".to_string()));
        assert!(args.contains(&"-GPSCoordinates=48, -13".to_string()));
    }

    #[test]
    fn location_only_request_has_no_dates() {
        let args = tag_args(&TagRequest {
            kind: MediaKind::Image,
            captured_at: None,
            location: GeoPoint::new(1.0, 2.0),
        });
        assert!(!args.iter().any(|a| a.contains("Date")));
        assert_eq!(args[0], "-overwrite_original");
    }

    #[tokio::test]
    async fn noop_tagger_reports_unavailable() {
        let tagger = NoopTagger;
        assert!(!tagger.is_available());
        let request = TagRequest {
            kind: MediaKind::Image,
            captured_at: None,
            location: None,
        };
        assert!(tagger.tag(Path::new("x.jpg"), &request).await.is_ok());
        assert!(tagger
            .copy_tags(Path::new("x_base.jpg"), Path::new("x_combined.jpg"))
            .await
            .is_ok());
    }

    #[test]
    fn copy_args_clone_all_groups_from_source() {
        let args = copy_args(Path::new("out/a-main.jpg"), Path::new("out/a_combined.jpg"));
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert!(args.windows(2).any(|w| w == ["-TagsFromFile", "out/a-main.jpg"]));
        assert!(args.contains(&"-all:all".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("out/a_combined.jpg"));
    }
}
