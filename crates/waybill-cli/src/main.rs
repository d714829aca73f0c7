//! Waybill CLI
//!
//! Command-line interface for waybill - offline-first warehouse transfers.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use waybill_core::{Config, CreatePayload, DraftLine, EntityRef, OperationKind};

mod commands;
mod output;
mod runtime;

use output::{Output, OutputFormat};
use runtime::Runtime;

#[derive(Parser)]
#[command(name = "waybill")]
#[command(about = "Waybill - offline-first warehouse transfers")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use this config file instead of the default
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a transfer
    Create {
        /// Transfer reference (e.g. PO-1)
        name: String,
        /// Partner id
        #[arg(long)]
        partner: Option<i64>,
        /// Contact mobile number
        #[arg(long)]
        mobile: Option<String>,
        /// Source document
        #[arg(long)]
        origin: Option<String>,
        /// Product line as PRODUCT_ID:QUANTITY (repeatable)
        #[arg(short, long = "line", value_parser = parse_line)]
        lines: Vec<DraftLine>,
    },
    /// Change a line quantity
    Update {
        /// Transfer id, or local:<token> for an unsynced transfer
        transfer: EntityRef,
        /// Line id
        #[arg(long)]
        line: i64,
        /// New quantity
        #[arg(long)]
        quantity: f64,
    },
    /// Change the product on a transfer
    Product {
        /// Transfer id, or local:<token> for an unsynced transfer
        transfer: EntityRef,
        /// Product id
        #[arg(long)]
        product: i64,
        /// Quantity for the product
        #[arg(long)]
        quantity: Option<f64>,
    },
    /// Cancel a transfer
    Cancel {
        /// Transfer id, or local:<token> for an unsynced transfer
        transfer: EntityRef,
    },
    /// Validate a transfer
    Validate {
        /// Transfer id, or local:<token> for an unsynced transfer
        transfer: EntityRef,
    },
    /// List operations waiting to be synced
    Pending {
        /// Only this kind (create, update, product_update, cancel, validate)
        #[arg(short, long)]
        kind: Option<OperationKind>,
    },
    /// Drop a pending operation
    #[command(alias = "rm")]
    Discard {
        /// Operation kind
        kind: OperationKind,
        /// Operation id (full UUID or prefix)
        id: String,
    },
    /// Sync pending operations now
    Sync,
    /// List cached transfers
    #[command(alias = "ls")]
    Transfers,
    /// Show connectivity and pending counts
    Status,
    /// Keep syncing whenever the server is reachable
    Watch,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (server_url, probe_interval_secs, api_version, ...)
        key: String,
        /// Configuration value ("none" clears optional keys)
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.as_ref();

    // Config commands work even when the current config is unusable
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), config_path, &output);
    }

    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    init_logging(&config, &output);

    let runtime = Runtime::open(config)?;

    match cli.command {
        Commands::Create {
            name,
            partner,
            mobile,
            origin,
            lines,
        } => {
            let payload = CreatePayload {
                partner_id: partner,
                mobile_number: mobile,
                origin,
                lines,
                ..CreatePayload::named(name)
            };
            commands::ops::create(&runtime, payload, &output).await
        }
        Commands::Update {
            transfer,
            line,
            quantity,
        } => commands::ops::update(&runtime, transfer, line, quantity, &output).await,
        Commands::Product {
            transfer,
            product,
            quantity,
        } => commands::ops::product(&runtime, transfer, product, quantity, &output).await,
        Commands::Cancel { transfer } => commands::ops::cancel(&runtime, transfer, &output).await,
        Commands::Validate { transfer } => {
            commands::ops::validate(&runtime, transfer, &output).await
        }
        Commands::Pending { kind } => commands::pending::list(&runtime, kind, &output),
        Commands::Discard { kind, id } => commands::pending::discard(&runtime, kind, &id, &output),
        Commands::Sync => commands::sync::sync(&runtime, &output).await,
        Commands::Transfers => commands::transfers::list(&runtime, &output),
        Commands::Status => commands::status::show(&runtime, &output).await,
        Commands::Watch => commands::watch::run(&runtime, &output).await,
        Commands::Config { .. } => Ok(()), // Handled above
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
    }
}

/// Parse a `PRODUCT_ID:QUANTITY` line argument
fn parse_line(s: &str) -> Result<DraftLine, String> {
    let (product, quantity) = s
        .split_once(':')
        .ok_or_else(|| format!("expected PRODUCT_ID:QUANTITY, got '{}'", s))?;
    let product_id = product
        .trim()
        .parse()
        .map_err(|_| format!("invalid product id '{}'", product))?;
    let quantity: f64 = quantity
        .trim()
        .parse()
        .map_err(|_| format!("invalid quantity '{}'", quantity))?;
    if quantity <= 0.0 {
        return Err(format!("quantity must be positive, got {}", quantity));
    }
    Ok(DraftLine {
        product_id,
        quantity,
    })
}

/// Initialize logging
///
/// RUST_LOG wins over the configured level. Logs go to stderr, or to
/// `log_file` when set. Quiet mode only shows errors.
fn init_logging(config: &Config, output: &Output) {
    let level = if output.is_quiet() {
        "error"
    } else {
        config.log_level.as_str()
    };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("waybill_core={},waybill_cli={}", level, level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);

    let Some(ref log_path) = config.log_file else {
        let _ = builder.with_writer(std::io::stderr).try_init();
        return;
    };

    match OpenOptions::new().create(true).append(true).open(log_path) {
        Ok(file) => {
            let _ = builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
        }
        Err(e) => {
            eprintln!("Warning: Could not open log file {:?}: {}", log_path, e);
            let _ = builder.with_writer(std::io::stderr).try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_line() {
        let line = parse_line("12:3.5").unwrap();
        assert_eq!(line.product_id, 12);
        assert_eq!(line.quantity, 3.5);

        assert!(parse_line("12").is_err());
        assert!(parse_line("x:1").is_err());
        assert!(parse_line("12:0").is_err());
    }

    #[test]
    fn test_parse_commands() {
        let cli = Cli::try_parse_from(["waybill", "cancel", "10"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Cancel {
                transfer: EntityRef::Remote(10)
            }
        ));

        let cli = Cli::try_parse_from([
            "waybill", "create", "PO-1", "--line", "5:2", "--line", "6:1", "--json",
        ])
        .unwrap();
        assert!(cli.json);
        let Commands::Create { name, lines, .. } = cli.command else {
            panic!("expected create");
        };
        assert_eq!(name, "PO-1");
        assert_eq!(lines.len(), 2);

        let cli = Cli::try_parse_from(["waybill", "pending", "--kind", "product-update"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Pending {
                kind: Some(OperationKind::ProductUpdate)
            }
        ));

        assert!(Cli::try_parse_from(["waybill", "cancel", "0"]).is_err());
    }
}
