use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use memget_core::core::events::StageSummary;
use memget_core::models::record::{DownloadRecord, MediaKind};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::core::dependencies;
use crate::core::exiftool::{ExifTool, NoopTagger, TagRequest, Tagger};
use crate::core::media_name;
use crate::models::media::ContentFormat;
use crate::storage::ledger::ProgressLedger;
use crate::storage::tagged::TaggedSet;

#[derive(Debug, Clone)]
pub struct MetadataJob {
    pub output_dir: PathBuf,
    pub state_dir: PathBuf,
    pub workers: usize,
    pub set_file_times: bool,
}

/// Looks exiftool up once per run.
pub async fn detect_tagger(timeout: Duration) -> Arc<dyn Tagger> {
    match dependencies::find_tool("exiftool").await {
        Some(program) => {
            tracing::info!("[tag] using {}", program.display());
            Arc::new(ExifTool::new(program, timeout))
        }
        None => Arc::new(NoopTagger),
    }
}

#[derive(Debug)]
struct WorkItem {
    file: String,
    request: TagRequest,
    overlay: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum ItemResult {
    Tagged,
    TimesOnly,
    AlreadyTagged,
    Failed,
}

/// Writes capture time and location into every downloaded file the ledger
/// lists, then stamps the file's mtime with the capture time.
pub async fn write_metadata(
    records: &[DownloadRecord],
    ledger: &ProgressLedger,
    tagger: Arc<dyn Tagger>,
    job: &MetadataJob,
    cancel: &CancellationToken,
) -> anyhow::Result<StageSummary> {
    let mut summary = StageSummary::new("tag");
    let tagging = tagger.is_available();
    if !tagging {
        tracing::warn!("[tag] exiftool not found; capture dates and locations will not be embedded");
    }

    let items = collect_items(records, ledger);
    if items.is_empty() {
        tracing::info!("[tag] nothing to tag");
        return Ok(summary);
    }

    let tagged = TaggedSet::load(&job.state_dir).await?;
    if !tagged.is_empty() {
        tracing::debug!("[tag] {} file(s) tagged by earlier runs", tagged.len());
    }
    let tagged = Arc::new(Mutex::new(tagged));
    let results: Vec<ItemResult> = stream::iter(items)
        .map(|item| {
            let tagger = tagger.clone();
            let tagged = tagged.clone();
            async move {
                if cancel.is_cancelled() {
                    return None;
                }
                Some(process_item(item, tagger.as_ref(), tagging, &tagged, job).await)
            }
        })
        .buffer_unordered(job.workers.max(1))
        .filter_map(|r| async move { r })
        .collect()
        .await;

    for result in results {
        summary.processed += 1;
        match result {
            ItemResult::Tagged => summary.succeeded += 1,
            ItemResult::TimesOnly | ItemResult::AlreadyTagged => summary.skipped += 1,
            ItemResult::Failed => summary.failed += 1,
        }
    }
    Ok(summary)
}

fn collect_items(records: &[DownloadRecord], ledger: &ProgressLedger) -> Vec<WorkItem> {
    let mut items = Vec::new();
    for record in records {
        if !record.has_metadata() {
            continue;
        }
        let Some(entry) = ledger.get(&record.id).filter(|_| ledger.is_succeeded(&record.id)) else {
            continue;
        };
        for file in &entry.files {
            let Some(kind) = file_kind(file).or(record.media_kind) else {
                tracing::debug!("[tag] {} is not an image or video", file);
                continue;
            };
            let overlay =
                media_name::is_overlay(file) || file.to_ascii_lowercase().contains("thumbnail");
            items.push(WorkItem {
                file: file.clone(),
                request: TagRequest {
                    kind,
                    captured_at: record.timestamp,
                    location: record.location,
                },
                overlay,
            });
        }
    }
    items
}

fn file_kind(file: &str) -> Option<MediaKind> {
    let (_, ext) = file.rsplit_once('.')?;
    ContentFormat::from_extension(ext)?.media_kind()
}

async fn process_item(
    item: WorkItem,
    tagger: &dyn Tagger,
    tagging: bool,
    tagged: &Mutex<TaggedSet>,
    job: &MetadataJob,
) -> ItemResult {
    let path = job.output_dir.join(&item.file);
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        tracing::warn!("[tag] {} listed in the ledger but missing on disk", item.file);
        return ItemResult::Failed;
    }

    let result = if item.overlay || !tagging {
        ItemResult::TimesOnly
    } else if tagged.lock().await.contains(&item.file) {
        ItemResult::AlreadyTagged
    } else {
        match tagger.tag(&path, &item.request).await {
            Ok(()) => {
                if let Err(e) = tagged.lock().await.insert(&item.file).await {
                    tracing::warn!("[tag] could not record {} as tagged: {:#}", item.file, e);
                }
                tracing::debug!("[tag] {}", item.file);
                ItemResult::Tagged
            }
            Err(e) => {
                tracing::warn!("[tag] {}: {}", item.file, e);
                ItemResult::Failed
            }
        }
    };

    if job.set_file_times {
        if let Some(ts) = item.request.captured_at {
            if let Err(e) = set_mtime(&path, ts) {
                tracing::debug!("[tag] could not set mtime on {}: {}", item.file, e);
            }
        }
    }
    result
}

pub fn set_mtime(path: &Path, at: DateTime<Utc>) -> std::io::Result<()> {
    let ft = filetime::FileTime::from_unix_time(at.timestamp(), 0);
    filetime::set_file_times(path, ft, ft)
}
