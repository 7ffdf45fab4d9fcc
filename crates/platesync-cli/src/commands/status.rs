//! Status command handler

use anyhow::Result;

use platesync_core::SyncStatus;

use crate::context::Context;
use crate::output::Output;

/// Show connectivity and queue counts
pub async fn show(ctx: &Context, output: &Output) -> Result<()> {
    let status = SyncStatus {
        is_online: ctx.probe().await,
        is_syncing: false,
        last_sync_time: None,
        pending_count: ctx.queue.len().await,
        failed_count: ctx.queue.failed_count().await,
    };

    output.print_status(&status, &ctx.config.api_base_url);
    Ok(())
}
