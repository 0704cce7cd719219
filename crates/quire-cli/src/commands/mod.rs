//! Command handlers

pub mod archive;
pub mod config;
pub mod node;
pub mod status;

use anyhow::{anyhow, bail, Result};

use quire_core::{FolderHandle, NodeFs, NodeHandle};

/// Split `a/b/c` into (`a/b`, `c`)
pub fn split_path(path: &str) -> Result<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    let (parent, name) = match trimmed.rsplit_once('/') {
        Some((parent, name)) => (parent, name),
        None => ("", trimmed),
    };
    if name.is_empty() {
        bail!("Path has no final name: '{}'", path);
    }
    Ok((parent, name))
}

/// Resolve a path that must exist
pub async fn resolve(fs: &NodeFs, path: &str) -> Result<NodeHandle> {
    fs.resolve_path(path)
        .await?
        .ok_or_else(|| anyhow!("No such file or folder: {}", path))
}

/// Resolve a path that must be a folder
pub async fn resolve_folder(fs: &NodeFs, path: &str) -> Result<FolderHandle> {
    resolve(fs, path)
        .await?
        .into_folder()
        .ok_or_else(|| anyhow!("Not a folder: {}", path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("a/b/c").unwrap(), ("a/b", "c"));
        assert_eq!(split_path("top").unwrap(), ("", "top"));
        assert_eq!(split_path("/docs/").unwrap(), ("", "docs"));
        assert!(split_path("/").is_err());
    }
}
