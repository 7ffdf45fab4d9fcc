//! Sync command handler

use anyhow::{bail, Result};

use platesync_core::{FlushOutcome, SyncError};

use crate::context::Context;
use crate::output::Output;

/// Probe the server, then drain the queue
pub async fn sync(ctx: &Context, output: &Output) -> Result<()> {
    let pending = ctx.queue.len().await;
    if pending == 0 {
        output.message("Queue is empty, nothing to sync.");
        return Ok(());
    }

    output.message(&format!(
        "Syncing {} action(s) to {}...",
        pending, ctx.config.api_base_url
    ));

    let engine = ctx.engine().await?;
    let outcome = match engine.force_sync().await {
        Ok(outcome) => outcome,
        Err(SyncError::Offline) => bail!(
            "Server is unreachable. Queued actions are kept and will be sent on the next sync."
        ),
        Err(e) => return Err(e.into()),
    };

    output.print_flush(&outcome);

    if let FlushOutcome::Completed(report) = &outcome {
        if report.dropped > 0 && !output.is_quiet() {
            eprintln!(
                "⚠ {} action(s) failed permanently. See `platesync queue dead`.",
                report.dropped
            );
        }
    }

    Ok(())
}
