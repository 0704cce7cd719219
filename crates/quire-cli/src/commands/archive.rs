//! Dump and undump command handlers

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncRead, AsyncWrite, BufReader, BufWriter};

use quire_core::{Config, NodeFs};

use crate::output::Output;

/// Export the reachable graph to a file or stdout
pub async fn dump(fs: &NodeFs, target: &str, output: &Output) -> Result<()> {
    let mut writer: Box<dyn AsyncWrite + Unpin + Send> = if target == "-" {
        Box::new(BufWriter::new(tokio::io::stdout()))
    } else {
        let file = tokio::fs::File::create(target)
            .await
            .with_context(|| format!("Failed to create {}", target))?;
        Box::new(BufWriter::new(file))
    };

    let summary = fs.dump(&mut writer).await.context("Dump failed")?;

    // Keep stdout clean for the stream itself
    if target != "-" {
        output.print_summary("Dumped", &summary);
    }
    Ok(())
}

/// Import a dump into the configured store
///
/// Refuses to replace an existing store unless `force` is set.
pub async fn undump(
    fs: &NodeFs,
    config: &Config,
    source: &str,
    force: bool,
    output: &Output,
) -> Result<()> {
    let marker = config.data_dir.join(fs.database().marker_name());
    if marker.exists() && !force {
        bail!(
            "A store already exists in {}. Use --force to replace it.",
            config.data_dir.display()
        );
    }

    let mut reader: Box<dyn AsyncRead + Unpin + Send> = if source == "-" {
        Box::new(BufReader::new(tokio::io::stdin()))
    } else {
        let file = tokio::fs::File::open(source)
            .await
            .with_context(|| format!("Failed to open {}", source))?;
        Box::new(BufReader::new(file))
    };

    let summary = fs.undump(&mut reader).await.context("Undump failed")?;
    output.print_summary("Restored", &summary);
    if force {
        output.message("Run `quire gc` to drop blobs left over from the replaced store.");
    }
    Ok(())
}
