//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use waybill_core::Config;

use crate::output::{Output, OutputFormat};

const VALID_KEYS: &str = "data_dir, server_url, probe_url, probe_interval_secs, \
     probe_timeout_secs, call_timeout_secs, api_version, version_threshold, log_level, log_file";

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  data_dir:            {}", config.data_dir.display());
            println!("  server_url:          {}", or_unset(config.server_url.as_deref()));
            println!("  probe_url:           {}", or_unset(config.probe_url.as_deref()));
            println!("  probe_interval_secs: {}", config.probe_interval_secs);
            println!("  probe_timeout_secs:  {}", config.probe_timeout_secs);
            println!("  call_timeout_secs:   {}", config.call_timeout_secs);
            println!("  api_version:         {}", or_unset(config.api_version.as_deref()));
            println!("  version_threshold:   {}", config.version_threshold);
            println!("  log_level:           {}", config.log_level);
            println!(
                "  log_file:            {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    apply(&mut config, &key, &value)?;
    config
        .validate()
        .with_context(|| format!("Refusing to set {} = {}", key, value))?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}

fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "data_dir" => config.data_dir = value.into(),
        "server_url" => config.server_url = optional(value),
        "probe_url" => config.probe_url = optional(value),
        "probe_interval_secs" => config.probe_interval_secs = number(key, value)?,
        "probe_timeout_secs" => config.probe_timeout_secs = number(key, value)?,
        "call_timeout_secs" => config.call_timeout_secs = number(key, value)?,
        "api_version" => config.api_version = optional(value),
        "version_threshold" => {
            config.version_threshold = value
                .parse()
                .with_context(|| format!("Invalid value for {}: '{}'", key, value))?;
        }
        "log_level" => config.log_level = value.to_string(),
        "log_file" => config.log_file = optional(value).map(PathBuf::from),
        _ => {
            bail!(
                "Unknown configuration key: '{}'\nValid keys: {}",
                key,
                VALID_KEYS
            );
        }
    }
    Ok(())
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() || value == "none" {
        None
    } else {
        Some(value.to_string())
    }
}

fn number(key: &str, value: &str) -> Result<u64> {
    value
        .parse()
        .with_context(|| format!("Invalid value for {}: '{}'. Use whole seconds.", key, value))
}

fn or_unset(value: Option<&str>) -> &str {
    value.unwrap_or("(not set)")
}
