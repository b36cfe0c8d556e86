use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::anyhow;

use crate::core::filename::sanitize_path_component;
use crate::core::media_name::{self, Role};

/// Unpacks a base+overlay bundle next to where the archive was saved and
/// deletes the archive. Members are renamed after `stem` so that the pairing
/// convention holds: `<stem>-main.<ext>`, `<stem>-overlay.<ext>`.
///
/// Returns the extracted file names. On error nothing extracted is left behind
/// and the archive is kept.
pub async fn extract_bundle(
    archive_path: &Path,
    output_dir: &Path,
    stem: &str,
) -> anyhow::Result<Vec<String>> {
    let archive_path = archive_path.to_path_buf();
    let output_dir = output_dir.to_path_buf();
    let stem = stem.to_string();

    let files = tokio::task::spawn_blocking(move || extract_blocking(&archive_path, &output_dir, &stem))
        .await
        .map_err(|e| anyhow!("archive task failed: {}", e))??;

    Ok(files)
}

fn extract_blocking(archive_path: &Path, output_dir: &Path, stem: &str) -> anyhow::Result<Vec<String>> {
    let mut written: Vec<PathBuf> = Vec::new();
    match extract_members(archive_path, output_dir, stem, &mut written) {
        Ok(names) => {
            std::fs::remove_file(archive_path)?;
            Ok(names)
        }
        Err(e) => {
            for path in &written {
                let _ = std::fs::remove_file(path);
            }
            Err(e)
        }
    }
}

fn extract_members(
    archive_path: &Path,
    output_dir: &Path,
    stem: &str,
    written: &mut Vec<PathBuf>,
) -> anyhow::Result<Vec<String>> {
    let file = std::fs::File::open(archive_path)
        .map_err(|e| anyhow!("failed to open archive: {}", e))?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| anyhow!("corrupt archive: {}", e))?;

    let mut names = Vec::new();
    let mut taken: HashSet<String> = HashSet::new();

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| anyhow!("failed to read archive entry: {}", e))?;
        if entry.is_dir() {
            continue;
        }
        let Some(entry_name) = entry
            .enclosed_name()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        else {
            tracing::warn!("[archive] skipping unsafe entry {}", entry.name());
            continue;
        };

        let target = unique_name(&member_target(stem, &entry_name), &mut taken);
        let dest = output_dir.join(&target);
        let tmp = output_dir.join(format!("{}.part", target));

        let mut out = std::fs::File::create(&tmp)?;
        written.push(tmp.clone());
        std::io::copy(&mut entry, &mut out)
            .map_err(|e| anyhow!("failed to extract {}: {}", entry_name, e))?;
        out.flush()?;
        out.sync_all()?;
        drop(out);

        std::fs::rename(&tmp, &dest)?;
        written.pop();
        written.push(dest);
        names.push(target);
    }

    if names.is_empty() {
        return Err(anyhow!("archive contains no files"));
    }
    Ok(names)
}

fn member_target(stem: &str, entry_name: &str) -> String {
    match media_name::parse(entry_name) {
        Ok(parsed) if matches!(parsed.role, Role::Base | Role::Overlay) => {
            media_name::member_name(stem, parsed.role, &parsed.extension)
        }
        _ => format!("{}-{}", stem, sanitize_path_component(entry_name)),
    }
}

fn unique_name(candidate: &str, taken: &mut HashSet<String>) -> String {
    if taken.insert(candidate.to_string()) {
        return candidate.to_string();
    }
    let (base, ext) = candidate.rsplit_once('.').unwrap_or((candidate, ""));
    let mut n = 2;
    loop {
        let next = if ext.is_empty() {
            format!("{}-{}", base, n)
        } else {
            format!("{}-{}.{}", base, n, ext)
        };
        if taken.insert(next.clone()) {
            return next;
        }
        n += 1;
    }
}
