//! Cached transfer list

use anyhow::{Context, Result};

use crate::output::Output;
use crate::runtime::Runtime;

/// Show the last-known transfers, including unsynced placeholders
pub fn list(runtime: &Runtime, output: &Output) -> Result<()> {
    let transfers = runtime
        .engine
        .cached_entities()
        .context("Failed to read cached transfers")?;
    output.print_transfers(&transfers)
}
