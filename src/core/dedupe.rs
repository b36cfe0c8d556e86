use std::collections::{BTreeMap, HashSet};
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::Context;
use memget_core::core::events::StageSummary;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::core::media_name::{self, Role};
use crate::core::overlay::is_scratch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGroup {
    pub keep: PathBuf,
    pub remove: Vec<PathBuf>,
}

/// Every regular file under `dir`, skipping hidden directories and scratch
/// files. Members of a base+overlay pair with no composite yet are held back
/// so a later combine can still find them. Paths come back sorted, followed
/// by the number of held-back files.
fn collect_files(dir: &Path) -> anyhow::Result<(Vec<(PathBuf, u64)>, usize)> {
    let mut files = Vec::new();
    let mut held = 0usize;
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let entries = std::fs::read_dir(&current)
            .with_context(|| format!("cannot read {}", current.display()))?;
        let mut here = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                if !name.starts_with('.') {
                    pending.push(entry.path());
                }
            } else if file_type.is_file() && !is_scratch(&name) {
                here.push((name, entry.path(), entry.metadata()?.len()));
            }
        }

        let open_pairs = uncombined_pairs(here.iter().map(|(name, ..)| name.as_str()));
        for (name, path, len) in here {
            let held_back = media_name::parse(&name)
                .is_ok_and(|n| n.role != Role::Composite && open_pairs.contains(&n.identity));
            if held_back {
                held += 1;
            } else {
                files.push((path, len));
            }
        }
    }
    files.sort();
    Ok((files, held))
}

/// Identities that have an overlay in this directory but no composite.
fn uncombined_pairs<'a>(names: impl Iterator<Item = &'a str>) -> HashSet<String> {
    let mut overlays = HashSet::new();
    let mut combined = HashSet::new();
    for name in names {
        if let Ok(parsed) = media_name::parse(name) {
            match parsed.role {
                Role::Overlay => {
                    overlays.insert(parsed.identity);
                }
                Role::Composite => {
                    combined.insert(parsed.identity);
                }
                Role::Base => {}
            }
        }
    }
    overlays.retain(|identity| !combined.contains(identity));
    overlays
}

fn hash_file(path: &Path) -> std::io::Result<[u8; 32]> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&hasher.finalize());
    Ok(digest)
}

/// Groups byte-identical files. Only files sharing a size are hashed; the
/// lexicographically first path of each group is the one kept.
pub fn find_duplicates(dir: &Path, cancel: &CancellationToken) -> anyhow::Result<Vec<DuplicateGroup>> {
    let mut by_size: BTreeMap<u64, Vec<PathBuf>> = BTreeMap::new();
    let (files, held) = collect_files(dir)?;
    if held > 0 {
        tracing::info!("[dedupe] {} file(s) of uncombined pairs left out", held);
    }
    for (path, size) in files {
        if size > 0 {
            by_size.entry(size).or_default().push(path);
        }
    }

    let mut groups = Vec::new();
    for (_, paths) in by_size.into_iter().filter(|(_, p)| p.len() > 1) {
        let mut by_hash: BTreeMap<[u8; 32], Vec<PathBuf>> = BTreeMap::new();
        for path in paths {
            if cancel.is_cancelled() {
                return Ok(groups);
            }
            match hash_file(&path) {
                Ok(digest) => by_hash.entry(digest).or_default().push(path),
                Err(e) => tracing::warn!("[dedupe] cannot hash {}: {}", path.display(), e),
            }
        }
        for (_, mut same) in by_hash.into_iter().filter(|(_, p)| p.len() > 1) {
            same.sort();
            let keep = same.remove(0);
            groups.push(DuplicateGroup { keep, remove: same });
        }
    }
    groups.sort_by(|a, b| a.keep.cmp(&b.keep));
    Ok(groups)
}

/// Removes all but one copy of every set of identical files under `dir`.
pub async fn remove_duplicates(
    dir: &Path,
    dry_run: bool,
    cancel: &CancellationToken,
) -> anyhow::Result<StageSummary> {
    let dir_owned = dir.to_path_buf();
    let token = cancel.clone();
    let groups = tokio::task::spawn_blocking(move || find_duplicates(&dir_owned, &token))
        .await
        .context("duplicate scan task failed")??;

    let mut summary = StageSummary::new("dedupe");
    for group in &groups {
        for path in &group.remove {
            summary.processed += 1;
            if dry_run {
                tracing::info!(
                    "[dedupe] would remove {} (same as {})",
                    path.display(),
                    group.keep.display()
                );
                summary.skipped += 1;
                continue;
            }
            match tokio::fs::remove_file(path).await {
                Ok(()) => {
                    tracing::info!("[dedupe] removed {} (kept {})", path.display(), group.keep.display());
                    summary.succeeded += 1;
                }
                Err(e) => {
                    tracing::warn!("[dedupe] could not remove {}: {}", path.display(), e);
                    summary.failed += 1;
                }
            }
        }
    }
    if groups.is_empty() {
        tracing::info!("[dedupe] no duplicates found");
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn identical_files_leave_one_copy() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["c.jpg", "a.jpg", "b.jpg"] {
            std::fs::write(dir.path().join(name), b"same bytes").unwrap();
        }
        let summary = remove_duplicates(dir.path(), false, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.succeeded, 2);
        assert_eq!(names(dir.path()), vec!["a.jpg"]);
    }

    #[tokio::test]
    async fn distinct_files_are_all_kept() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"one").unwrap();
        std::fs::write(dir.path().join("b.jpg"), b"two").unwrap();
        std::fs::write(dir.path().join("c.jpg"), b"three").unwrap();
        let summary = remove_duplicates(dir.path(), false, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.processed, 0);
        assert_eq!(names(dir.path()).len(), 3);
    }

    #[tokio::test]
    async fn dry_run_removes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("b.jpg"), b"x").unwrap();
        let summary = remove_duplicates(dir.path(), true, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(names(dir.path()).len(), 2);
    }

    #[tokio::test]
    async fn uncombined_pairs_are_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a-main.mp4"), b"first video").unwrap();
        std::fs::write(dir.path().join("b-main.mp4"), b"second video").unwrap();
        std::fs::write(dir.path().join("a-overlay.png"), b"same caption").unwrap();
        std::fs::write(dir.path().join("b-overlay.png"), b"same caption").unwrap();

        let summary = remove_duplicates(dir.path(), false, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.processed, 0);
        assert_eq!(names(dir.path()).len(), 4);
    }

    #[tokio::test]
    async fn pair_members_are_deduplicated_once_combined() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a-main.mp4"), b"first video").unwrap();
        std::fs::write(dir.path().join("a-overlay.png"), b"same caption").unwrap();
        std::fs::write(dir.path().join("a_combined.mp4"), b"first composite").unwrap();
        std::fs::write(dir.path().join("b-main.mp4"), b"second video").unwrap();
        std::fs::write(dir.path().join("b-overlay.png"), b"same caption").unwrap();
        std::fs::write(dir.path().join("b_combined.mp4"), b"second composite").unwrap();

        let summary = remove_duplicates(dir.path(), false, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.succeeded, 1);
        assert!(dir.path().join("a-overlay.png").exists());
        assert!(!dir.path().join("b-overlay.png").exists());
    }

    #[test]
    fn scratch_files_and_hidden_dirs_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".memget")).unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("a.jpg.part"), b"x").unwrap();
        std::fs::write(dir.path().join(".memget").join("copy.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("sub").join("z.jpg"), b"x").unwrap();

        let groups = find_duplicates(dir.path(), &CancellationToken::new()).unwrap();
        assert_eq!(
            groups,
            vec![DuplicateGroup {
                keep: dir.path().join("a.jpg"),
                remove: vec![dir.path().join("sub").join("z.jpg")],
            }]
        );
    }
}
