//! File and folder command handlers

use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};

use quire_core::{FileData, NodeFs, NodeHandle};

use super::{resolve, resolve_folder, split_path};
use crate::output::{short_id, Listing, Output};

/// List a folder's bindings
pub async fn list(fs: &NodeFs, path: &str, output: &Output) -> Result<()> {
    let folder = resolve_folder(fs, path).await?;

    let mut listing = Vec::new();
    for entry in folder.list().await? {
        let kind = fs.get_node(&entry.child_id).await?.map(|node| node.kind());
        listing.push(Listing { entry, kind });
    }

    output.print_listing(&listing);
    Ok(())
}

/// Write a file's content to stdout
pub async fn cat(fs: &NodeFs, path: &str) -> Result<()> {
    let file = resolve(fs, path)
        .await?
        .into_file()
        .ok_or_else(|| anyhow!("Not a file: {}", path))?;

    let mut stdout = std::io::stdout().lock();
    match file.read().await? {
        Some(FileData::Text(text)) => stdout.write_all(text.as_bytes())?,
        Some(FileData::Bytes(bytes)) => stdout.write_all(&bytes)?,
        None => {}
    }
    stdout.flush()?;
    Ok(())
}

/// Write content to a file, creating and linking it if the path is new
pub async fn put(
    fs: &NodeFs,
    path: &str,
    from: Option<PathBuf>,
    kind: &str,
    output: &Output,
) -> Result<()> {
    let bytes = match from {
        Some(ref source) => std::fs::read(source)
            .with_context(|| format!("Failed to read {}", source.display()))?,
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("Failed to read stdin")?;
            buf
        }
    };
    let data = match String::from_utf8(bytes) {
        Ok(text) => FileData::Text(text),
        Err(e) => FileData::Bytes(e.into_bytes()),
    };

    let (parent_path, name) = split_path(path)?;
    let parent = resolve_folder(fs, parent_path).await?;

    let file = match parent.get_entry_by_name(name).await? {
        Some(entry) => match fs.get_node(&entry.child_id).await? {
            Some(NodeHandle::File(file)) => file,
            Some(NodeHandle::Folder(_)) => bail!("Is a folder: {}", path),
            None => bail!("Dangling entry: {} (remove it first)", path),
        },
        None => {
            let file = fs.create_file(kind).await.context("Failed to create file")?;
            parent.link(name, file.id()).await?;
            file
        }
    };

    let size = data.len();
    file.write(data).await.context("Failed to write file")?;
    output.success(&format!("Wrote {} byte(s) to {} ({})", size, path, short_id(file.id())));
    Ok(())
}

/// Create a folder at a new path
pub async fn mkdir(fs: &NodeFs, path: &str, output: &Output) -> Result<()> {
    let (parent_path, name) = split_path(path)?;
    let parent = resolve_folder(fs, parent_path).await?;
    if parent.get_entry_by_name(name).await?.is_some() {
        bail!("Already exists: {}", path);
    }

    let folder = fs.create_folder().await.context("Failed to create folder")?;
    parent.link(name, folder.id()).await?;
    output.success(&format!("Created folder {} ({})", path, short_id(folder.id())));
    Ok(())
}

/// Bind an existing node under another path
pub async fn link(fs: &NodeFs, target: &str, dest: &str, output: &Output) -> Result<()> {
    let node = resolve(fs, target).await?;
    let (parent_path, name) = split_path(dest)?;
    let parent = resolve_folder(fs, parent_path).await?;

    parent.link(name, node.id()).await?;
    output.success(&format!("Linked {} -> {}", dest, target));
    Ok(())
}

/// Remove the binding at `path`, optionally destroying the node
pub async fn remove(fs: &NodeFs, path: &str, destroy: bool, output: &Output) -> Result<()> {
    let (parent_path, name) = split_path(path)?;
    let parent = resolve_folder(fs, parent_path).await?;
    let entry = parent
        .get_entry_by_name(name)
        .await?
        .ok_or_else(|| anyhow!("No such file or folder: {}", path))?;

    parent.unlink(&entry.bind_id).await?;

    if destroy {
        if let Some(NodeHandle::Folder(folder)) = fs.get_node(&entry.child_id).await? {
            if !folder.list().await?.is_empty() {
                output.message("Folder was not empty; its entries are now unreachable");
            }
        }
        fs.destroy_node(&entry.child_id).await?;
        output.success(&format!("Removed and destroyed {}", path));
    } else {
        output.success(&format!("Removed {}", path));
    }
    Ok(())
}
