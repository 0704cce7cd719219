//! Status and maintenance command handlers

use anyhow::{Context, Result};

use quire_core::{Config, NodeFs};

use crate::output::{Output, OutputFormat};

/// Report the store after `open()` created or loaded it
pub async fn init(fs: &NodeFs, config: &Config, output: &Output) -> Result<()> {
    let version = fs.database().version().await?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "version": version,
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            println!();
            println!("Store ready at {}", config.data_dir.display());
            println!("Snapshot version: {}", version);
            println!();
            println!("Add a file with: quire put notes/hello.txt --from hello.txt");
        }
    }

    Ok(())
}

/// Show status information
pub async fn show(fs: &NodeFs, config: &Config, output: &Output) -> Result<()> {
    let stats = fs.stats().await.context("Failed to read store statistics")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "blob_dir": config.blob_dir(),
                    "key_prefix": config.key_prefix,
                    "version": stats.version,
                    "schema_version": stats.schema_version,
                    "counts": {
                        "folders": stats.folders,
                        "files": stats.files,
                        "bindings": stats.bindings,
                        "blobs": stats.blobs
                    }
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", stats.version);
        }
        OutputFormat::Human => {
            println!("Quire Status");
            println!("============");
            println!();
            println!("Storage:");
            println!("  Location: {}", config.data_dir.display());
            println!("  Blobs in: {}", config.blob_dir().display());
            println!("  Prefix:   {}", config.key_prefix);
            println!("  Version:  {}", stats.version);
            println!("  Schema:   {}", stats.schema_version);
            println!();
            println!("Contents:");
            println!("  Folders:  {}", stats.folders);
            println!("  Files:    {}", stats.files);
            println!("  Bindings: {}", stats.bindings);
            println!("  Blobs:    {}", stats.blobs);
        }
    }

    Ok(())
}

/// Remove unreferenced blobs
pub async fn gc(fs: &NodeFs, output: &Output) -> Result<()> {
    let removed = fs
        .collect_garbage()
        .await
        .context("Garbage collection failed")?;
    output.success(&format!("Removed {} unreferenced blob(s)", removed));
    Ok(())
}
