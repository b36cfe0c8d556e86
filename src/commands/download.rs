use std::sync::Arc;

use crate::cli::DownloadArgs;
use crate::core::direct_downloader::{HttpSource, RetryPolicy};
use crate::core::engine::{DownloadEngine, DownloadSummary, EngineConfig};
use crate::core::events::TracingEventEmitter;
use crate::core::http_client;
use crate::storage::ledger::ERROR_LOG_FILE;

use super::Context;

pub async fn run(ctx: &Context, args: &DownloadArgs) -> anyhow::Result<DownloadSummary> {
    let settings = &ctx.settings.download;
    let records = ctx.records().await?;
    let ledger = ctx.ledger().await?;

    let workers = args
        .workers
        .unwrap_or(settings.max_concurrent_downloads as usize)
        .max(1);
    let limit = args
        .test
        .map(|n| n.unwrap_or(workers * settings.test_files_per_worker as usize));

    let client = http_client::build_client(settings, &ctx.settings.proxy)?;
    let engine = DownloadEngine::new(
        Arc::new(HttpSource::new(client, settings)),
        ledger.clone(),
        EngineConfig {
            output_dir: ctx.output_dir.clone(),
            workers,
            retry: RetryPolicy::from_settings(settings),
            extract_archives: settings.extract_archives,
        },
        Arc::new(TracingEventEmitter::new()),
    );

    let summary = engine.run(&records, limit, &ctx.cancel).await?;

    let logged = ledger.error_count().await;
    if logged > 0 {
        tracing::info!(
            "[download] {} failure(s) listed in {}; run `memget clear-errors` to retry them",
            logged,
            ctx.state_dir.join(ERROR_LOG_FILE).display()
        );
    }
    Ok(summary)
}
