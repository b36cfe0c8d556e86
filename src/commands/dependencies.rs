use serde::Serialize;

use crate::core::dependencies;

#[derive(Debug, Clone, Serialize)]
pub struct DependencyStatus {
    pub name: String,
    pub installed: bool,
    pub version: Option<String>,
    pub needed_for: &'static str,
}

pub async fn check_dependencies() -> Vec<DependencyStatus> {
    let (exiftool, ffmpeg, ffprobe) = tokio::join!(
        dependencies::check_version("exiftool"),
        dependencies::check_version("ffmpeg"),
        dependencies::check_version("ffprobe"),
    );

    [
        ("exiftool", exiftool, "capture dates and locations"),
        ("ffmpeg", ffmpeg, "video overlays"),
        ("ffprobe", ffprobe, "overlay scaling on videos"),
    ]
    .into_iter()
    .map(|(name, version, needed_for)| DependencyStatus {
        name: name.into(),
        installed: version.is_some(),
        version,
        needed_for,
    })
    .collect()
}

pub async fn run() -> anyhow::Result<()> {
    for dep in check_dependencies().await {
        match &dep.version {
            Some(v) => println!("{:<9} {:<12} {}", dep.name, v, dep.needed_for),
            None => println!("{:<9} {:<12} {} (disabled)", dep.name, "missing", dep.needed_for),
        }
    }
    Ok(())
}
