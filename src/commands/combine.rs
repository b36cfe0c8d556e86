use std::sync::Arc;
use std::time::Duration;

use memget_core::core::events::{EventEmitter, StageSummary};

use crate::cli::CombineArgs;
use crate::core::events::TracingEventEmitter;
use crate::core::ffmpeg;
use crate::core::image_blend::ImageBlender;
use crate::core::metadata_writer;
use crate::core::overlay::{self, CombineJob, Compositors};

use super::Context;

pub async fn run(ctx: &Context, args: &CombineArgs) -> anyhow::Result<StageSummary> {
    let settings = &ctx.settings.overlay;
    let snapshot = ctx.ledger().await?.snapshot().await;

    let only = if args.all_files {
        None
    } else if snapshot.is_empty() {
        tracing::info!(
            "[overlay] no download ledger; considering every file in {}",
            ctx.output_dir.display()
        );
        None
    } else {
        Some(snapshot.completed_files())
    };

    let compositors = Compositors {
        image: Arc::new(ImageBlender::new(settings.jpeg_quality)),
        video: ffmpeg::detect_compositor(Duration::from_secs(settings.tool_timeout_secs)).await,
        tagger: metadata_writer::detect_tagger(Duration::from_secs(
            ctx.settings.metadata.tool_timeout_secs,
        ))
        .await,
    };
    let job = CombineJob {
        output_dir: ctx.output_dir.clone(),
        workers: settings.max_concurrent.max(1) as usize,
        delete_originals: args.delete_originals || settings.delete_originals,
        dry_run: args.dry_run,
        only,
    };

    let summary = overlay::combine_overlays(&job, &compositors, &ctx.cancel).await?;
    TracingEventEmitter::new().emit_summary(&summary);
    Ok(summary)
}
