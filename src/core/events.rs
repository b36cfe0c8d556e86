use memget_core::core::events::{EventEmitter, RecordProgress, RecordStatus, StageSummary};

const PROGRESS_EVERY: usize = 10;

/// Reports pipeline progress through `tracing`.
#[derive(Clone, Default)]
pub struct TracingEventEmitter;

impl TracingEventEmitter {
    pub fn new() -> Self {
        Self
    }
}

impl EventEmitter for TracingEventEmitter {
    fn emit_record(&self, progress: &RecordProgress) {
        match &progress.status {
            RecordStatus::Downloaded => tracing::info!(
                "[download] ok {} ({} file(s), {} bytes)",
                progress.id,
                progress.file_count,
                progress.bytes
            ),
            RecordStatus::Failed { message, permanent } => tracing::warn!(
                "[download] failed {} (index {}, {}): {}",
                progress.id,
                progress.index,
                if *permanent { "permanent" } else { "retries exhausted" },
                message
            ),
            RecordStatus::Cancelled => tracing::debug!("[download] cancelled {}", progress.id),
        }

        if progress.completed % PROGRESS_EVERY == 0 || progress.completed == progress.total {
            tracing::info!(
                "[download] progress {}/{}",
                progress.completed,
                progress.total
            );
        }
    }

    fn emit_summary(&self, summary: &StageSummary) {
        tracing::info!(
            "[{}] done: {} processed, {} succeeded, {} skipped, {} failed",
            summary.stage,
            summary.processed,
            summary.succeeded,
            summary.skipped,
            summary.failed
        );
    }
}
