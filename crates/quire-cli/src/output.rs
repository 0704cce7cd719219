//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use quire_core::{DirEntry, DumpSummary, NodeKind};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// A folder entry resolved for display
pub struct Listing {
    pub entry: DirEntry,
    /// `None` when the binding points at a destroyed node
    pub kind: Option<NodeKind>,
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    /// Print the entries of a folder
    pub fn print_listing(&self, listing: &[Listing]) {
        match self.format {
            OutputFormat::Human => {
                if listing.is_empty() {
                    println!("Empty folder.");
                    return;
                }
                for item in listing {
                    let marker = match item.kind {
                        Some(NodeKind::Folder) => "/",
                        Some(NodeKind::File) => "",
                        None => " (dangling)",
                    };
                    println!(
                        "{} | {}{}",
                        short_id(&item.entry.child_id),
                        truncate(&item.entry.name, 50),
                        marker
                    );
                }
                println!("\n{} entr{}", listing.len(), if listing.len() == 1 { "y" } else { "ies" });
            }
            OutputFormat::Json => {
                let json: Vec<_> = listing
                    .iter()
                    .map(|item| {
                        serde_json::json!({
                            "bind_id": item.entry.bind_id,
                            "name": item.entry.name,
                            "child_id": item.entry.child_id,
                            "kind": item.kind.map(|k| k.as_str()),
                        })
                    })
                    .collect();
                println!("{}", serde_json::Value::Array(json));
            }
            OutputFormat::Quiet => {
                for item in listing {
                    println!("{}", item.entry.name);
                }
            }
        }
    }

    /// Print dump or undump record counts
    pub fn print_summary(&self, action: &str, summary: &DumpSummary) {
        match self.format {
            OutputFormat::Human => {
                println!(
                    "✓ {}: {} node(s), {} binding(s), {} content row(s), {} blob(s)",
                    action, summary.nodes, summary.bindings, summary.contents, summary.blobs
                );
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({
                        "status": "success",
                        "action": action,
                        "nodes": summary.nodes,
                        "bindings": summary.bindings,
                        "contents": summary.contents,
                        "blobs": summary.blobs,
                    })
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

/// First 8 characters of a node id
pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
        assert_eq!(truncate("ééééééééééé", 5), "éé...");
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("root"), "root");
        assert_eq!(short_id("0123456789abcdef"), "01234567");
    }
}
