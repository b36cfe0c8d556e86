use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use memget_core::core::events::{EventEmitter, RecordProgress, RecordStatus, StageSummary};
use memget_core::models::record::DownloadRecord;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::core::archive;
use crate::core::direct_downloader::{fetch_with_retry, FetchOutcome, MediaSource, RetryPolicy};
use crate::models::media::{ContentFormat, FetchedMedia};
use crate::storage::ledger::{FailureKind, LedgerEntry, LedgerError, LedgerHandle};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub output_dir: PathBuf,
    pub workers: usize,
    pub retry: RetryPolicy,
    pub extract_archives: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    pub total: usize,
    /// Already `succeeded` or `failed` before this run.
    pub skipped: usize,
    pub attempted: usize,
    pub downloaded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl DownloadSummary {
    pub fn to_stage(&self) -> StageSummary {
        StageSummary {
            stage: "download",
            processed: self.attempted,
            succeeded: self.downloaded,
            skipped: self.skipped,
            failed: self.failed,
        }
    }
}

#[derive(Debug)]
enum RecordResult {
    Downloaded { files: usize, bytes: u64 },
    Failed { message: String, permanent: bool },
    Cancelled,
}

struct EngineContext {
    source: Arc<dyn MediaSource>,
    ledger: LedgerHandle,
    config: EngineConfig,
}

/// Fetches every record the ledger does not already settle.
pub struct DownloadEngine {
    ctx: Arc<EngineContext>,
    emitter: Arc<dyn EventEmitter>,
}

impl DownloadEngine {
    pub fn new(
        source: Arc<dyn MediaSource>,
        ledger: LedgerHandle,
        config: EngineConfig,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            ctx: Arc::new(EngineContext {
                source,
                ledger,
                config,
            }),
            emitter,
        }
    }

    /// `limit` caps how many pending records are processed (test mode).
    pub async fn run(
        &self,
        records: &[DownloadRecord],
        limit: Option<usize>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<DownloadSummary> {
        let output_dir = &self.ctx.config.output_dir;
        tokio::fs::create_dir_all(output_dir)
            .await
            .with_context(|| format!("cannot create output directory {}", output_dir.display()))?;

        let snapshot = self.ctx.ledger.snapshot().await;
        let unsettled: Vec<&DownloadRecord> = records
            .iter()
            .filter(|r| !snapshot.is_terminal(&r.id))
            .collect();
        let mut summary = DownloadSummary {
            total: records.len(),
            skipped: records.len() - unsettled.len(),
            ..DownloadSummary::default()
        };
        let pending: Vec<DownloadRecord> = unsettled
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        if let Some(n) = limit {
            tracing::info!("[download] test mode: processing at most {} record(s)", n);
        }
        tracing::info!(
            "[download] {} record(s), {} already settled, {} to process",
            records.len(),
            summary.skipped,
            pending.len()
        );

        let run_cancel = cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(self.ctx.config.workers.max(1)));
        let mut join_set = tokio::task::JoinSet::new();

        for record in pending {
            let ctx = self.ctx.clone();
            let sem = semaphore.clone();
            let token = run_cancel.clone();
            join_set.spawn(async move {
                let result = process_record(&ctx, &record, &sem, &token).await;
                (record, result)
            });
        }

        let total = join_set.len();
        let mut completed = 0usize;
        let mut fatal: Option<LedgerError> = None;

        while let Some(joined) = join_set.join_next().await {
            let (record, result) = match joined {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!("[download] worker task failed: {}", e);
                    continue;
                }
            };
            completed += 1;

            let result = match result {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!("[ledger] {}; stopping the run", e);
                    run_cancel.cancel();
                    fatal.get_or_insert(e);
                    continue;
                }
            };

            let (status, file_count, bytes) = match result {
                RecordResult::Downloaded { files, bytes } => {
                    summary.attempted += 1;
                    summary.downloaded += 1;
                    (RecordStatus::Downloaded, files, bytes)
                }
                RecordResult::Failed { message, permanent } => {
                    summary.attempted += 1;
                    summary.failed += 1;
                    (RecordStatus::Failed { message, permanent }, 0, 0)
                }
                RecordResult::Cancelled => {
                    summary.cancelled += 1;
                    (RecordStatus::Cancelled, 0, 0)
                }
            };

            self.emitter.emit_record(&RecordProgress {
                id: record.id.clone(),
                index: record.index,
                status,
                file_count,
                bytes,
                completed,
                total,
            });
        }

        if let Some(e) = fatal {
            return Err(e.into());
        }
        if summary.cancelled > 0 {
            tracing::warn!(
                "[download] interrupted: {} record(s) left for the next run",
                summary.cancelled
            );
        }
        self.emitter.emit_summary(&summary.to_stage());
        Ok(summary)
    }
}

/// Runs one record to a terminal state and persists it. The network permit
/// is held only while fetching.
async fn process_record(
    ctx: &EngineContext,
    record: &DownloadRecord,
    semaphore: &Arc<Semaphore>,
    cancel: &CancellationToken,
) -> Result<RecordResult, LedgerError> {
    let permit = tokio::select! {
        _ = cancel.cancelled() => return Ok(RecordResult::Cancelled),
        permit = semaphore.clone().acquire_owned() => match permit {
            Ok(p) => p,
            Err(_) => return Ok(RecordResult::Cancelled),
        },
    };

    let output_dir = &ctx.config.output_dir;
    let stem = record.file_stem();
    let outcome = fetch_with_retry(
        ctx.source.as_ref(),
        record,
        output_dir,
        &stem,
        &ctx.config.retry,
        cancel,
    )
    .await;
    drop(permit);

    match outcome {
        FetchOutcome::Succeeded { media, attempts } => {
            tracing::debug!("[download] {} fetched in {} attempt(s)", record.id, attempts);
            match finalize(ctx, &media, output_dir, &stem).await {
                Ok(files) => {
                    let count = files.len();
                    ctx.ledger
                        .record_success(
                            &record.id,
                            LedgerEntry::succeeded(files, media.content_type.clone(), media.bytes),
                        )
                        .await?;
                    Ok(RecordResult::Downloaded {
                        files: count,
                        bytes: media.bytes,
                    })
                }
                Err(e) => {
                    let message = format!("corrupt payload: {:#}", e);
                    let _ = tokio::fs::remove_file(&media.path).await;
                    ctx.ledger
                        .record_failure(record, &message, FailureKind::Permanent, attempts)
                        .await?;
                    Ok(RecordResult::Failed {
                        message,
                        permanent: true,
                    })
                }
            }
        }
        FetchOutcome::PermanentFailure { error, attempts } => {
            ctx.ledger
                .record_failure(record, &error, FailureKind::Permanent, attempts)
                .await?;
            Ok(RecordResult::Failed {
                message: error,
                permanent: true,
            })
        }
        FetchOutcome::TransientFailure { error, attempts } => {
            let message = format!("gave up after {} attempt(s): {}", attempts, error);
            ctx.ledger
                .record_failure(record, &message, FailureKind::Transient, attempts)
                .await?;
            Ok(RecordResult::Failed {
                message,
                permanent: false,
            })
        }
        FetchOutcome::Cancelled => Ok(RecordResult::Cancelled),
    }
}

/// Turns a fetched payload into the list of files recorded in the ledger.
async fn finalize(
    ctx: &EngineContext,
    media: &FetchedMedia,
    output_dir: &Path,
    stem: &str,
) -> anyhow::Result<Vec<String>> {
    if media.format == ContentFormat::Zip && ctx.config.extract_archives {
        let files = archive::extract_bundle(&media.path, output_dir, stem).await?;
        tracing::debug!("[download] extracted {} file(s) from {}", files.len(), stem);
        return Ok(files);
    }
    let name = media
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow::anyhow!("downloaded path has no file name"))?;
    Ok(vec![name])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::direct_downloader::FetchError;
    use crate::storage::ledger::{clear_error_log, EntryStatus};
    use async_trait::async_trait;
    use memget_core::models::record::FetchMethod;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct NullEmitter;

    impl EventEmitter for NullEmitter {
        fn emit_record(&self, _progress: &RecordProgress) {}
        fn emit_summary(&self, _summary: &StageSummary) {}
    }

    /// Writes `<stem>.jpg` containing the record id. Ids listed in `fail`
    /// fail with the given error; ids in `hang` wait for cancellation.
    #[derive(Default)]
    struct FakeSource {
        calls: AtomicUsize,
        fetched: Mutex<Vec<String>>,
        fail: Vec<(String, FetchError)>,
        hang: HashSet<String>,
        zip_ids: HashSet<String>,
    }

    #[async_trait]
    impl MediaSource for FakeSource {
        async fn fetch(
            &self,
            record: &DownloadRecord,
            output_dir: &Path,
            stem: &str,
            cancel: &CancellationToken,
        ) -> Result<FetchedMedia, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang.contains(&record.id) {
                cancel.cancelled().await;
                return Err(FetchError::Cancelled);
            }
            if let Some((_, err)) = self.fail.iter().find(|(id, _)| *id == record.id) {
                return Err(err.clone());
            }
            self.fetched.lock().unwrap().push(record.id.clone());

            if self.zip_ids.contains(&record.id) {
                let path = output_dir.join(format!("{}.zip", stem));
                write_bundle(&path);
                return Ok(FetchedMedia {
                    path,
                    format: ContentFormat::Zip,
                    content_type: Some("application/zip".into()),
                    bytes: 1,
                });
            }

            let path = output_dir.join(format!("{}.jpg", stem));
            tokio::fs::write(&path, record.id.as_bytes()).await.unwrap();
            Ok(FetchedMedia {
                path,
                format: ContentFormat::Jpeg,
                content_type: Some("image/jpeg".into()),
                bytes: record.id.len() as u64,
            })
        }
    }

    fn write_bundle(path: &Path) {
        use std::io::Write;
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let opts = zip::write::SimpleFileOptions::default();
        zip.start_file("x-main.jpg", opts).unwrap();
        zip.write_all(b"base").unwrap();
        zip.start_file("x-overlay.png", opts).unwrap();
        zip.write_all(b"overlay").unwrap();
        zip.finish().unwrap();
    }

    fn records(n: usize) -> Vec<DownloadRecord> {
        (0..n)
            .map(|i| DownloadRecord {
                id: format!("id{:03}", i),
                url: format!("https://example.com/m?mid=id{:03}", i),
                method: FetchMethod::Get,
                timestamp: None,
                location: None,
                media_kind: None,
                index: i,
            })
            .collect()
    }

    fn config(output_dir: &Path, max_attempts: u32) -> EngineConfig {
        EngineConfig {
            output_dir: output_dir.to_path_buf(),
            workers: 3,
            retry: RetryPolicy {
                max_attempts,
                base_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
            },
            extract_archives: true,
        }
    }

    async fn engine(source: Arc<FakeSource>, dir: &Path, max_attempts: u32) -> (DownloadEngine, LedgerHandle) {
        let ledger = LedgerHandle::open(&dir.join(".state")).await.unwrap();
        let engine = DownloadEngine::new(
            source,
            ledger.clone(),
            config(&dir.join("out"), max_attempts),
            Arc::new(NullEmitter),
        );
        (engine, ledger)
    }

    fn output_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir.join("out"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn second_run_makes_no_requests() {
        let dir = tempfile::tempdir().unwrap();
        let recs = records(8);

        let first = Arc::new(FakeSource::default());
        let (engine1, _) = engine(first.clone(), dir.path(), 3).await;
        let summary = engine1.run(&recs, None, &CancellationToken::new()).await.unwrap();
        assert_eq!(summary.downloaded, 8);
        assert_eq!(first.calls.load(Ordering::SeqCst), 8);

        let second = Arc::new(FakeSource::default());
        let (engine2, _) = engine(second.clone(), dir.path(), 3).await;
        let summary = engine2.run(&recs, None, &CancellationToken::new()).await.unwrap();
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
        assert_eq!(summary.skipped, 8);
        assert_eq!(summary.attempted, 0);
    }

    #[tokio::test]
    async fn capped_run_then_full_run_settles_every_record_once() {
        let dir = tempfile::tempdir().unwrap();
        let recs = records(10);

        let first = Arc::new(FakeSource::default());
        let (engine1, ledger1) = engine(first.clone(), dir.path(), 3).await;
        let summary = engine1.run(&recs, Some(4), &CancellationToken::new()).await.unwrap();
        assert_eq!(summary.downloaded, 4);
        assert_eq!(ledger1.snapshot().await.len(), 4);

        let second = Arc::new(FakeSource::default());
        let (engine2, ledger2) = engine(second.clone(), dir.path(), 3).await;
        engine2.run(&recs, None, &CancellationToken::new()).await.unwrap();
        assert_eq!(second.calls.load(Ordering::SeqCst), 6);

        let snap = ledger2.snapshot().await;
        assert_eq!(snap.len(), 10);
        assert_eq!(snap.count(EntryStatus::Succeeded), 10);
        assert_eq!(output_files(dir.path()).len(), 10);
    }

    #[tokio::test]
    async fn interrupted_run_leaves_in_flight_records_absent() {
        let dir = tempfile::tempdir().unwrap();
        let recs = records(6);
        let hang: HashSet<String> = ["id004".to_string(), "id005".to_string()].into();

        let first = Arc::new(FakeSource {
            hang,
            ..FakeSource::default()
        });
        let (engine1, ledger1) = engine(first.clone(), dir.path(), 3).await;
        let cancel = CancellationToken::new();
        let watcher = {
            let ledger = ledger1.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                while ledger.snapshot().await.len() < 4 {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                cancel.cancel();
            })
        };
        let summary = engine1.run(&recs, None, &cancel).await.unwrap();
        watcher.await.unwrap();

        assert_eq!(summary.downloaded, 4);
        assert_eq!(summary.cancelled, 2);
        let snap = ledger1.snapshot().await;
        assert_eq!(snap.len(), 4);
        assert!(!snap.is_terminal("id004"));
        assert!(!snap.is_terminal("id005"));
        assert!(output_files(dir.path()).iter().all(|f| !f.ends_with(".part")));

        let second = Arc::new(FakeSource::default());
        let (engine2, ledger2) = engine(second.clone(), dir.path(), 3).await;
        engine2.run(&recs, None, &CancellationToken::new()).await.unwrap();
        assert_eq!(second.calls.load(Ordering::SeqCst), 2);
        assert_eq!(ledger2.snapshot().await.count(EntryStatus::Succeeded), 6);
        assert_eq!(output_files(dir.path()).len(), 6);
    }

    #[tokio::test]
    async fn always_transient_record_is_tried_max_attempts_then_failed() {
        let dir = tempfile::tempdir().unwrap();
        let recs = records(1);
        let source = Arc::new(FakeSource {
            fail: vec![("id000".into(), FetchError::Transient("HTTP 503".into()))],
            ..FakeSource::default()
        });
        let (engine1, ledger) = engine(source.clone(), dir.path(), 4).await;
        let summary = engine1.run(&recs, None, &CancellationToken::new()).await.unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
        assert_eq!(summary.failed, 1);
        let snap = ledger.snapshot().await;
        assert_eq!(snap.get("id000").unwrap().status, EntryStatus::Failed);
        assert_eq!(ledger.error_count().await, 1);
    }

    #[tokio::test]
    async fn failed_records_wait_for_error_log_clearing() {
        let dir = tempfile::tempdir().unwrap();
        let recs = records(2);
        let failing = Arc::new(FakeSource {
            fail: vec![("id001".into(), FetchError::Permanent("HTTP 404".into()))],
            ..FakeSource::default()
        });
        let (engine1, _) = engine(failing.clone(), dir.path(), 3).await;
        engine1.run(&recs, None, &CancellationToken::new()).await.unwrap();
        assert_eq!(failing.calls.load(Ordering::SeqCst), 2);

        let healthy = Arc::new(FakeSource::default());
        let (engine2, _) = engine(healthy.clone(), dir.path(), 3).await;
        engine2.run(&recs, None, &CancellationToken::new()).await.unwrap();
        assert_eq!(healthy.calls.load(Ordering::SeqCst), 0);

        clear_error_log(&dir.path().join(".state")).await.unwrap();
        let (engine3, ledger) = engine(healthy.clone(), dir.path(), 3).await;
        engine3.run(&recs, None, &CancellationToken::new()).await.unwrap();
        assert_eq!(healthy.calls.load(Ordering::SeqCst), 1);
        assert!(ledger.snapshot().await.is_succeeded("id001"));
    }

    #[tokio::test]
    async fn archive_payload_records_extracted_members() {
        let dir = tempfile::tempdir().unwrap();
        let recs = records(1);
        let source = Arc::new(FakeSource {
            zip_ids: ["id000".to_string()].into(),
            ..FakeSource::default()
        });
        let (engine1, ledger) = engine(source, dir.path(), 3).await;
        engine1.run(&recs, None, &CancellationToken::new()).await.unwrap();

        let snap = ledger.snapshot().await;
        let entry = snap.get("id000").unwrap();
        let mut files = entry.files.clone();
        files.sort();
        assert_eq!(files, vec!["id000-main.jpg", "id000-overlay.png"]);
        assert_eq!(output_files(dir.path()), files);
    }
}
