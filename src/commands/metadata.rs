use std::time::Duration;

use memget_core::core::events::{EventEmitter, StageSummary};

use crate::core::events::TracingEventEmitter;
use crate::core::metadata_writer::{self, MetadataJob};

use super::Context;

pub async fn run(ctx: &Context) -> anyhow::Result<StageSummary> {
    let settings = &ctx.settings.metadata;
    let records = ctx.records().await?;
    let snapshot = ctx.ledger().await?.snapshot().await;

    let tagger =
        metadata_writer::detect_tagger(Duration::from_secs(settings.tool_timeout_secs)).await;
    let job = MetadataJob {
        output_dir: ctx.output_dir.clone(),
        state_dir: ctx.state_dir.clone(),
        workers: std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4),
        set_file_times: settings.set_file_times,
    };

    let summary =
        metadata_writer::write_metadata(&records, &snapshot, tagger, &job, &ctx.cancel).await?;
    TracingEventEmitter::new().emit_summary(&summary);
    Ok(summary)
}
