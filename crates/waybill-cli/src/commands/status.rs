//! Status command handler

use anyhow::Result;

use crate::output::{Output, OutputFormat};
use crate::runtime::Runtime;

/// Show connectivity and queue information
pub async fn show(runtime: &Runtime, output: &Output) -> Result<()> {
    let config = &runtime.config;
    let reachable = runtime.check_reachable().await;
    let counts = runtime.engine.pending_counts()?;
    let total: usize = counts.iter().map(|(_, n)| n).sum();
    let cached = runtime.engine.cached_entities()?.len();

    match output.format {
        OutputFormat::Json => {
            let pending: serde_json::Map<String, serde_json::Value> = counts
                .iter()
                .map(|(kind, n)| (kind.as_str().to_string(), serde_json::json!(n)))
                .collect();
            println!(
                "{}",
                serde_json::json!({
                    "reachable": reachable,
                    "server_url": config.server_url,
                    "probe_url": config.effective_probe_url(),
                    "api_version": config.api_version,
                    "pending": pending,
                    "pending_total": total,
                    "cached_transfers": cached,
                    "data_dir": config.data_dir
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", total);
        }
        OutputFormat::Human => {
            println!("Waybill Status");
            println!("==============");
            println!();
            println!("Server:");
            println!(
                "  URL:    {}",
                config.server_url.as_deref().unwrap_or("(not set)")
            );
            println!(
                "  Status: {}",
                if reachable { "reachable" } else { "offline" }
            );
            println!(
                "  API:    {}",
                config.api_version.as_deref().unwrap_or("(negotiated)")
            );
            println!();
            println!("Pending:");
            for (kind, n) in &counts {
                println!("  {:<15} {}", format!("{}:", kind), n);
            }
            println!("  {:<15} {}", "total:", total);
            println!();
            println!("Storage:");
            println!("  Location:  {}", config.data_dir.display());
            println!("  Transfers: {}", cached);
        }
    }

    Ok(())
}
