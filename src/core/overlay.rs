use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use futures::stream::{self, StreamExt};
use memget_core::core::events::StageSummary;
use memget_core::models::record::MediaKind;
use tokio_util::sync::CancellationToken;

use crate::core::exiftool::Tagger;
use crate::core::ffmpeg::Compositor;
use crate::core::media_name::{self, MediaName, Role};

#[derive(Debug, Clone)]
pub struct CombineJob {
    pub output_dir: PathBuf,
    pub workers: usize,
    pub delete_originals: bool,
    pub dry_run: bool,
    /// Restricts inputs to these file names (the ledger's completed files).
    /// `None` considers every file in the directory.
    pub only: Option<HashSet<String>>,
}

#[derive(Clone)]
pub struct Compositors {
    pub image: Arc<dyn Compositor>,
    pub video: Arc<dyn Compositor>,
    /// Carries the base's capture date and location over to each composite.
    pub tagger: Arc<dyn Tagger>,
}

impl Compositors {
    fn for_kind(&self, kind: MediaKind) -> &Arc<dyn Compositor> {
        match kind {
            MediaKind::Image => &self.image,
            MediaKind::Video => &self.video,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pair {
    pub identity: String,
    pub kind: MediaKind,
    pub base: String,
    pub overlay: String,
    pub composite: String,
}

#[derive(Debug, Default)]
struct Group {
    bases: Vec<(String, MediaName)>,
    overlays: Vec<String>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PairPlan {
    pub pairs: Vec<Pair>,
    pub orphans: Vec<String>,
    pub conflicts: Vec<String>,
    /// Pairs whose composite is already on disk.
    pub done: Vec<String>,
}

/// Groups file names by identity and decides which pairs need a composite.
pub fn plan_pairs<'a>(
    names: impl IntoIterator<Item = &'a str>,
    only: Option<&HashSet<String>>,
) -> PairPlan {
    let mut groups: BTreeMap<String, Group> = BTreeMap::new();
    let mut composites: HashSet<String> = HashSet::new();

    for name in names {
        let parsed = match media_name::parse(name) {
            Ok(p) => p,
            Err(e) => {
                tracing::trace!("[overlay] ignoring {}", e);
                continue;
            }
        };
        if parsed.role == Role::Composite {
            composites.insert(name.to_string());
            continue;
        }
        if only.is_some_and(|set| !set.contains(name)) {
            continue;
        }
        let group = groups.entry(parsed.identity.clone()).or_default();
        match parsed.role {
            Role::Base => group.bases.push((name.to_string(), parsed)),
            Role::Overlay => group.overlays.push(name.to_string()),
            Role::Composite => {}
        }
    }

    let mut plan = PairPlan::default();
    for (identity, mut group) in groups {
        match (group.bases.len(), group.overlays.len()) {
            (_, 0) => {}
            (0, _) => plan.orphans.extend(group.overlays),
            (1, 1) => {
                let (base, parsed) = group.bases.remove(0);
                let composite = media_name::composite_name(&identity, &parsed.extension);
                if composites.contains(&composite) {
                    plan.done.push(identity);
                    continue;
                }
                plan.pairs.push(Pair {
                    identity,
                    kind: parsed.kind,
                    base,
                    overlay: group.overlays.remove(0),
                    composite,
                });
            }
            _ => plan.conflicts.push(identity),
        }
    }
    plan
}

async fn list_files(dir: &Path) -> anyhow::Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("cannot read {}", dir.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_scratch(&name) {
            continue;
        }
        names.push(name);
    }
    Ok(names)
}

pub(crate) fn is_scratch(name: &str) -> bool {
    name.ends_with(".part") || name.ends_with(".tmp") || name.contains(".tmp.")
}

fn temp_name(pair: &Pair) -> String {
    match pair.composite.rsplit_once('.') {
        Some((stem, ext)) => format!("{}.tmp.{}", stem, ext),
        None => format!("{}.tmp", pair.composite),
    }
}

/// Produces one `<identity>_combined.<ext>` for every complete base+overlay
/// pair in the output directory.
pub async fn combine_overlays(
    job: &CombineJob,
    compositors: &Compositors,
    cancel: &CancellationToken,
) -> anyhow::Result<StageSummary> {
    let mut summary = StageSummary::new("overlay");
    let names = list_files(&job.output_dir).await?;
    let plan = plan_pairs(names.iter().map(String::as_str), job.only.as_ref());

    for orphan in &plan.orphans {
        tracing::warn!("[overlay] {} has no base; left as-is", orphan);
    }
    for identity in &plan.conflicts {
        tracing::warn!("[overlay] {} has more than one base or overlay; skipped", identity);
    }
    summary.skipped += plan.orphans.len() + plan.conflicts.len() + plan.done.len();
    if !plan.done.is_empty() {
        tracing::info!("[overlay] {} pair(s) already combined", plan.done.len());
    }

    let (runnable, unsupported): (Vec<Pair>, Vec<Pair>) = plan
        .pairs
        .into_iter()
        .partition(|p| compositors.for_kind(p.kind).is_available());
    if !unsupported.is_empty() {
        tracing::warn!(
            "[overlay] ffmpeg not found; {} video pair(s) left as-is",
            unsupported.len()
        );
        summary.skipped += unsupported.len();
    }

    if job.dry_run {
        for pair in &runnable {
            tracing::info!("[overlay] would combine {} + {} -> {}", pair.base, pair.overlay, pair.composite);
        }
        summary.skipped += runnable.len();
        return Ok(summary);
    }

    tracing::info!("[overlay] combining {} pair(s)", runnable.len());
    if !runnable.is_empty() && !compositors.tagger.is_available() {
        tracing::warn!("[overlay] exiftool not found; composites will not carry the base's metadata");
    }
    let results: Vec<bool> = stream::iter(runnable)
        .map(|pair| async move {
            if cancel.is_cancelled() {
                return None;
            }
            let compositor = compositors.for_kind(pair.kind).clone();
            Some(combine_pair(&pair, compositor.as_ref(), compositors.tagger.as_ref(), job).await)
        })
        .buffer_unordered(job.workers.max(1))
        .filter_map(|r| async move { r })
        .collect()
        .await;

    for ok in results {
        summary.processed += 1;
        if ok {
            summary.succeeded += 1;
        } else {
            summary.failed += 1;
        }
    }
    Ok(summary)
}

async fn combine_pair(
    pair: &Pair,
    compositor: &dyn Compositor,
    tagger: &dyn Tagger,
    job: &CombineJob,
) -> bool {
    let dir = &job.output_dir;
    let base = dir.join(&pair.base);
    let overlay = dir.join(&pair.overlay);
    let tmp = dir.join(temp_name(pair));
    let target = dir.join(&pair.composite);

    let _ = tokio::fs::remove_file(&tmp).await;
    if let Err(e) = compositor.composite(&base, &overlay, &tmp).await {
        tracing::warn!("[overlay] {}: {}", pair.identity, e);
        let _ = tokio::fs::remove_file(&tmp).await;
        return false;
    }

    let written = tokio::fs::metadata(&tmp).await.map(|m| m.len()).unwrap_or(0);
    if written == 0 {
        tracing::warn!("[overlay] {}: empty composite discarded", pair.identity);
        let _ = tokio::fs::remove_file(&tmp).await;
        return false;
    }
    if tagger.is_available() {
        if let Err(e) = tagger.copy_tags(&base, &tmp).await {
            tracing::warn!("[overlay] {}: metadata not copied: {}", pair.identity, e);
        }
    }
    if let Err(e) = tokio::fs::rename(&tmp, &target).await {
        tracing::warn!("[overlay] {}: could not finalize composite: {}", pair.identity, e);
        let _ = tokio::fs::remove_file(&tmp).await;
        return false;
    }

    if let Ok(meta) = std::fs::metadata(&base) {
        let mtime = filetime::FileTime::from_last_modification_time(&meta);
        if let Err(e) = filetime::set_file_times(&target, mtime, mtime) {
            tracing::debug!("[overlay] could not copy mtime to {}: {}", pair.composite, e);
        }
    }

    if job.delete_originals {
        for input in [&base, &overlay] {
            if let Err(e) = tokio::fs::remove_file(input).await {
                tracing::warn!("[overlay] could not remove {}: {}", input.display(), e);
            }
        }
    }
    tracing::info!("[overlay] {}", pair.composite);
    true
}
