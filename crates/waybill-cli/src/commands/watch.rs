//! Watch command: keep the monitor and engine running until Ctrl-C

use anyhow::{Context, Result};
use tokio::sync::{broadcast, watch};
use tracing::info;

use waybill_core::Transition;

use crate::output::Output;
use crate::runtime::Runtime;

/// Probe periodically and drain the queues whenever the server comes back
pub async fn run(runtime: &Runtime, output: &Output) -> Result<()> {
    runtime.require_server()?;
    let Some(monitor) = runtime.monitor() else {
        anyhow::bail!("No probe URL configured");
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut transitions = monitor.subscribe();
    let mut summaries = runtime.engine.subscribe_summaries();

    let monitor_task = monitor.clone().spawn(shutdown_rx.clone());
    let engine_task = {
        let engine = runtime.engine.clone();
        let transitions = monitor.subscribe();
        tokio::spawn(async move { engine.run(transitions, shutdown_rx).await })
    };

    output.message(&format!(
        "Watching {} every {}s (Ctrl-C to stop)",
        runtime.config.effective_probe_url().unwrap_or_default(),
        runtime.config.probe_interval_secs
    ));

    loop {
        tokio::select! {
            event = transitions.recv() => match event {
                Ok(Transition::BecameReachable) => output.message("Server reachable"),
                Ok(Transition::BecameUnreachable) => output.message("Server unreachable, working offline"),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
            summary = summaries.recv() => match summary {
                Ok(summary) => output.print_summary(&summary)?,
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                break;
            }
        }
    }

    info!("Stopping watch");
    let _ = shutdown_tx.send(true);
    monitor_task.await.context("Connectivity monitor task failed")?;
    engine_task.await.context("Sync engine task failed")?;
    Ok(())
}
