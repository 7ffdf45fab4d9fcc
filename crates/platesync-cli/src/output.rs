//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde::Serialize;

use platesync_core::cache::CacheStats;
use platesync_core::{DeadLetter, FlushOutcome, PendingAction, SyncStatus};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Print any serializable value as pretty JSON
    pub fn json<T: Serialize + ?Sized>(&self, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Failed to encode output: {}", e),
        }
    }

    /// Print the sync status summary
    pub fn print_status(&self, status: &SyncStatus, api_base_url: &str) {
        match self.format {
            OutputFormat::Human => {
                println!("PlateSync Status");
                println!("================");
                println!();
                println!("Connectivity:");
                println!(
                    "  Server:  {} ({})",
                    api_base_url,
                    if status.is_online { "reachable" } else { "unreachable" }
                );
                println!();
                println!("Queue:");
                println!("  Pending: {}", status.pending_count);
                println!("  Failed:  {}", status.failed_count);
                if let Some(last) = status.last_sync_time {
                    println!("  Last sync: {}", last.format("%Y-%m-%d %H:%M:%S"));
                }
            }
            OutputFormat::Json => self.json(status),
            OutputFormat::Quiet => println!("{}", status.pending_count),
        }
    }

    /// Print queued actions in FIFO order
    pub fn print_actions(&self, actions: &[PendingAction]) {
        match self.format {
            OutputFormat::Human => {
                if actions.is_empty() {
                    println!("Queue is empty.");
                    return;
                }
                for action in actions {
                    println!(
                        "{} | {:<6} {:<6} | {} | {}/{} | {}",
                        &action.id.to_string()[..8],
                        action.kind,
                        action.method,
                        truncate(&action.endpoint, 40),
                        action.retry_count,
                        action.max_retries,
                        action.enqueued_at.format("%Y-%m-%d %H:%M")
                    );
                }
                println!("\n{} pending action(s)", actions.len());
            }
            OutputFormat::Json => self.json(actions),
            OutputFormat::Quiet => {
                for action in actions {
                    println!("{}", action.id);
                }
            }
        }
    }

    /// Print permanently failed actions
    pub fn print_dead_letters(&self, letters: &[DeadLetter]) {
        match self.format {
            OutputFormat::Human => {
                if letters.is_empty() {
                    println!("No failed actions.");
                    return;
                }
                for letter in letters {
                    println!(
                        "{} | {} {} | {} | {}",
                        &letter.action.id.to_string()[..8],
                        letter.action.method,
                        truncate(&letter.action.endpoint, 40),
                        letter.failed_at.format("%Y-%m-%d %H:%M"),
                        truncate_line(&letter.reason, 60)
                    );
                }
                println!("\n{} failed action(s)", letters.len());
            }
            OutputFormat::Json => self.json(letters),
            OutputFormat::Quiet => {
                for letter in letters {
                    println!("{}", letter.action.id);
                }
            }
        }
    }

    /// Print the result of a drain
    pub fn print_flush(&self, outcome: &FlushOutcome) {
        match self.format {
            OutputFormat::Human => match outcome {
                FlushOutcome::Skipped { reason } => {
                    println!("Nothing to sync ({:?})", reason);
                }
                FlushOutcome::Completed(report) => {
                    println!("✓ Sync complete");
                    println!("  Delivered: {}", report.succeeded);
                    if report.retried > 0 {
                        println!("  Retrying:  {}", report.retried);
                    }
                    if report.dropped > 0 {
                        println!("  Dropped:   {}", report.dropped);
                    }
                    if report.deferred > 0 {
                        println!("  Deferred:  {}", report.deferred);
                    }
                }
            },
            OutputFormat::Json => self.json(outcome),
            OutputFormat::Quiet => {
                if let Some(report) = outcome.report() {
                    println!("{}", report.succeeded);
                }
            }
        }
    }

    pub fn print_cache_stats(&self, stats: &CacheStats) {
        match self.format {
            OutputFormat::Human => {
                println!("Cache:");
                println!("  Entries: {}", stats.entries);
                println!("  Fresh:   {}", stats.fresh);
                println!("  Expired: {}", stats.expired);
                println!("  Hashed:  {}", stats.hashed);
            }
            OutputFormat::Json => self.json(stats),
            OutputFormat::Quiet => println!("{}", stats.entries),
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Truncate to first line and max length
fn truncate_line(s: &str, max_len: usize) -> String {
    let first_line = s.lines().next().unwrap_or("");
    truncate(first_line, max_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("/users/1/meals/2024-05-01", 10), "/users/...");
        assert_eq!(truncate("ééééééééééé", 5), "éé...");
    }

    #[test]
    fn test_truncate_line() {
        assert_eq!(truncate_line("HTTP 422", 20), "HTTP 422");
        assert_eq!(truncate_line("retries exhausted\nbody", 30), "retries exhausted");
    }
}
