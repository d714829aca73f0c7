//! Sync command handler

use anyhow::{Context, Result};

use waybill_core::PassOutcome;

use crate::output::Output;
use crate::runtime::Runtime;

/// Drain all queues now, whatever the monitor last saw
pub async fn sync(runtime: &Runtime, output: &Output) -> Result<()> {
    let url = runtime.require_server()?;
    output.message(&format!("Syncing with {}...", url));

    let outcome = runtime
        .engine
        .manual_sync()
        .await
        .context("Sync stopped before finishing")?;

    match outcome {
        PassOutcome::Completed(summary) => output.print_summary(&summary),
        PassOutcome::AlreadyRunning => {
            output.message("A sync is already in progress");
            Ok(())
        }
    }
}
