//! Config command handlers

use anyhow::{bail, Context, Result};

use quire_core::Config;

use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(output: &Output) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "key_prefix": config.key_prefix,
                    "inline_threshold": config.inline_threshold
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            println!("Configuration:");
            println!("  data_dir:         {}", config.data_dir.display());
            println!("  key_prefix:       {}", config.key_prefix);
            println!("  inline_threshold: {}", config.inline_threshold);
            println!();
            println!("Config file: {}", Config::config_file_path().display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(key: String, value: String, output: &Output) -> Result<()> {
    let mut config = Config::load().context("Failed to load configuration")?;

    match key.as_str() {
        "data_dir" => {
            config.data_dir = value.clone().into();
        }
        "key_prefix" => {
            if value.is_empty() {
                bail!("key_prefix cannot be empty");
            }
            config.key_prefix = value.clone();
        }
        "inline_threshold" => {
            config.inline_threshold = value
                .parse()
                .context("Invalid value for inline_threshold. Use a byte count.")?;
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\n\
                 Valid keys: data_dir, key_prefix, inline_threshold",
                key
            );
        }
    }

    config.save().context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}
