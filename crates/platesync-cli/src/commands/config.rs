//! Config command handlers

use std::path::PathBuf;

use anyhow::{Context, Result};

use platesync_core::Config;

use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => output.json(&config),
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            let not_set = || "(not set)".to_string();

            println!("Configuration:");
            println!("  data_dir:            {}", config.data_dir.display());
            println!("  api_base_url:        {}", config.api_base_url);
            println!("  max_retries:         {}", config.max_retries);
            println!("  action_timeout_secs: {}", config.action_timeout_secs);
            println!("  cache_ttl_secs:      {}", config.cache_ttl_secs);
            println!("  analysis_ttl_secs:   {}", config.analysis_ttl_secs);
            println!(
                "  probe_addr:          {}",
                config.probe_addr.clone().unwrap_or_else(not_set)
            );
            println!("  probe_interval_secs: {}", config.probe_interval_secs);
            println!(
                "  log_file:            {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(not_set)
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

    config.set_value(&key, &value)?;

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
