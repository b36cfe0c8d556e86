use memget_core::core::events::{EventEmitter, StageSummary};

use crate::cli::DedupeArgs;
use crate::core::dedupe;
use crate::core::events::TracingEventEmitter;

use super::Context;

pub async fn run(ctx: &Context, args: &DedupeArgs) -> anyhow::Result<StageSummary> {
    let dry_run = args.dry_run || ctx.settings.dedupe.dry_run;
    let summary = dedupe::remove_duplicates(&ctx.output_dir, dry_run, &ctx.cancel).await?;
    TracingEventEmitter::new().emit_summary(&summary);
    Ok(summary)
}
