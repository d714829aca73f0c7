//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use anyhow::Result;

use waybill_core::{CachedEntity, PassSummary, PendingOperation};

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

    /// Print queued operations
    pub fn print_pending(&self, ops: &[PendingOperation]) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                if ops.is_empty() {
                    println!("Nothing pending.");
                    return Ok(());
                }
                for op in ops {
                    let error = op
                        .last_error
                        .as_deref()
                        .map(|e| format!(" | {}", truncate(e, 40)))
                        .unwrap_or_default();
                    println!(
                        "{} | {:<14} | {:<14} | {} | tries: {}{}",
                        &op.id.to_string()[..8],
                        op.kind(),
                        truncate(&op.entity_ref.to_string(), 14),
                        op.enqueued_at.format("%Y-%m-%d %H:%M:%S"),
                        op.attempt_count,
                        error
                    );
                }
                println!("\n{} pending operation(s)", ops.len());
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(ops)?);
            }
            OutputFormat::Quiet => {
                for op in ops {
                    println!("{}", op.id);
                }
            }
        }
        Ok(())
    }

    /// Print cached transfers
    pub fn print_transfers(&self, transfers: &[CachedEntity]) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                if transfers.is_empty() {
                    println!("No transfers cached.");
                    return Ok(());
                }
                for transfer in transfers {
                    let marker = if transfer.is_local() { " (not synced)" } else { "" };
                    println!(
                        "{:<14} | {:<30} | {}{}",
                        truncate(&transfer.key.to_string(), 14),
                        truncate(&transfer.name, 30),
                        transfer.state,
                        marker
                    );
                }
                println!("\n{} transfer(s)", transfers.len());
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(transfers)?);
            }
            OutputFormat::Quiet => {
                for transfer in transfers {
                    println!("{}", transfer.key);
                }
            }
        }
        Ok(())
    }

    /// Print the result of a drain pass
    pub fn print_summary(&self, summary: &PassSummary) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                println!(
                    "Sync finished: {} applied, {} failed, {} still pending",
                    summary.total_succeeded(),
                    summary.total_failed(),
                    summary.total_remaining()
                );
                for (kind, counts) in &summary.kinds {
                    if counts.succeeded + counts.failed + counts.blocked + counts.remaining == 0 {
                        continue;
                    }
                    println!(
                        "  {:<14} applied {}, failed {}, waiting {}, pending {}",
                        kind.as_str(),
                        counts.succeeded,
                        counts.failed,
                        counts.blocked,
                        counts.remaining
                    );
                }
                for error in &summary.errors {
                    println!(
                        "  ✗ {} {} ({}): {}",
                        error.kind,
                        &error.id.to_string()[..8],
                        error.class,
                        error.message
                    );
                }
                if !summary.refreshed {
                    println!("  Transfer list could not be refreshed.");
                }
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(summary)?);
            }
            OutputFormat::Quiet => {
                println!("{}", summary.total_remaining());
            }
        }
        Ok(())
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

/// Truncate a string to max characters, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
