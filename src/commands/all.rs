use memget_core::core::events::StageSummary;

use crate::cli::{AllArgs, CombineArgs, DedupeArgs};

use super::{combine, dedupe, download, metadata, Context};

/// Download, then tag, combine and deduplicate. A stage that is disabled in
/// the settings is skipped; an interrupted download stops the run.
pub async fn run(ctx: &Context, args: &AllArgs) -> anyhow::Result<Vec<StageSummary>> {
    let mut summaries = Vec::new();

    let downloaded = download::run(ctx, &args.download).await?;
    summaries.push(downloaded.to_stage());
    if ctx.cancel.is_cancelled() {
        tracing::warn!("[memget] interrupted; remaining stages skipped");
        return Ok(summaries);
    }

    if ctx.settings.metadata.enabled {
        summaries.push(metadata::run(ctx).await?);
    }
    if ctx.settings.overlay.enabled && !ctx.cancel.is_cancelled() {
        let combine_args = CombineArgs {
            delete_originals: args.delete_originals,
            dry_run: args.dry_run,
            all_files: false,
        };
        summaries.push(combine::run(ctx, &combine_args).await?);
    }
    if ctx.settings.dedupe.enabled && !ctx.cancel.is_cancelled() {
        let dedupe_args = DedupeArgs {
            dry_run: args.dry_run,
        };
        summaries.push(dedupe::run(ctx, &dedupe_args).await?);
    }

    for s in &summaries {
        tracing::info!(
            "[memget] {:<8} {} processed, {} ok, {} skipped, {} failed",
            s.stage,
            s.processed,
            s.succeeded,
            s.skipped,
            s.failed
        );
    }
    Ok(summaries)
}
