//! Cache command handlers

use anyhow::Result;

use crate::context::Context;
use crate::output::{Output, OutputFormat};

/// Show cache entry counts
pub async fn stats(ctx: &Context, output: &Output) -> Result<()> {
    let stats = ctx.cache.stats().await?;
    output.print_cache_stats(&stats);
    Ok(())
}

/// Remove every entry whose key contains `pattern`
pub async fn invalidate(ctx: &Context, pattern: String, output: &Output) -> Result<()> {
    let removed = ctx.cache.invalidate(&pattern).await?;
    match output.format {
        OutputFormat::Quiet => println!("{}", removed),
        _ => output.success(&format!(
            "Invalidated {} entr{} matching '{}'",
            removed,
            if removed == 1 { "y" } else { "ies" },
            pattern
        )),
    }
    Ok(())
}

/// Remove every cached entry
pub async fn clear(ctx: &Context, output: &Output) -> Result<()> {
    let removed = ctx.cache.clear().await?;
    output.success(&format!("Cleared {} cache entr{}", removed, if removed == 1 { "y" } else { "ies" }));
    Ok(())
}
