use crate::storage::ledger;

use super::Context;

pub async fn run(ctx: &Context) -> anyhow::Result<usize> {
    let cleared = ledger::clear_error_log(&ctx.state_dir).await?;
    if cleared == 0 {
        tracing::info!("[ledger] error log is already empty");
    } else {
        tracing::info!(
            "[ledger] cleared {} logged failure(s); they will be retried on the next download",
            cleared
        );
    }
    Ok(cleared)
}
