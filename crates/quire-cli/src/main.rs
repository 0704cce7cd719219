//! Quire CLI
//!
//! Command-line interface for Quire - inspect and edit a node-graph store.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use quire_core::{Config, NodeFs, StoreError};

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "quire")]
#[command(about = "Quire - embedded node-graph store")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the store (first-time setup)
    Init,
    /// Show status (versions, counts, location)
    Status,
    /// List a folder
    Ls {
        /// Folder path (defaults to the root)
        #[arg(default_value = "/")]
        path: String,
    },
    /// Print a file's content
    Cat {
        /// File path
        path: String,
    },
    /// Write a file, creating it if needed
    Put {
        /// File path
        path: String,
        /// Read content from this file instead of stdin
        #[arg(short, long)]
        from: Option<PathBuf>,
        /// Media kind for a new file
        #[arg(short, long, default_value = "text")]
        kind: String,
    },
    /// Create a folder
    Mkdir {
        /// Folder path
        path: String,
    },
    /// Bind an existing node under another name
    Link {
        /// Path of the existing node
        target: String,
        /// New path to bind it at
        dest: String,
    },
    /// Remove a binding
    #[command(alias = "unlink")]
    Rm {
        /// Path to remove
        path: String,
        /// Also destroy the node itself
        #[arg(long)]
        destroy: bool,
    },
    /// Delete blobs no longer referenced
    Gc,
    /// Export the graph to a dump file
    Dump {
        /// Output file ("-" for stdout)
        output: String,
    },
    /// Import a dump file into the store
    Undump {
        /// Input file ("-" for stdin)
        input: String,
        /// Replace an existing store
        #[arg(long)]
        force: bool,
    },
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
        /// Configuration key (data_dir, key_prefix, inline_threshold)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    let result = run(cli, &output).await;
    if let Err(err) = &result {
        if let Some(hint) = recovery_hint(err) {
            if !output.is_quiet() {
                eprintln!("hint: {}", hint);
            }
        }
    }
    result
}

/// Suggestion attached to the first store error in the chain
fn recovery_hint(err: &anyhow::Error) -> Option<&'static str> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<StoreError>())
        .and_then(StoreError::recovery_suggestion)
}

async fn run(cli: Cli, output: &Output) -> Result<()> {
    // Commands that don't need the store
    if let Commands::Config { command } = &cli.command {
        return match command.clone() {
            Some(ConfigCommands::Show) | None => commands::config::show(output),
            Some(ConfigCommands::Set { key, value }) => {
                commands::config::set(key, value, output)
            }
        };
    }

    let config = Config::load().context("Failed to load configuration")?;
    let fs = NodeFs::with_config(&config);
    debug!(data_dir = ?config.data_dir, "Using store");

    // Undump populates an unopened store
    if let Commands::Undump { input, force } = &cli.command {
        return commands::archive::undump(&fs, &config, input, *force, output).await;
    }

    fs.open().await.context("Failed to open store")?;

    match cli.command {
        Commands::Init => commands::status::init(&fs, &config, output).await,
        Commands::Status => commands::status::show(&fs, &config, output).await,
        Commands::Ls { path } => commands::node::list(&fs, &path, output).await,
        Commands::Cat { path } => commands::node::cat(&fs, &path).await,
        Commands::Put { path, from, kind } => {
            commands::node::put(&fs, &path, from, &kind, output).await
        }
        Commands::Mkdir { path } => commands::node::mkdir(&fs, &path, output).await,
        Commands::Link { target, dest } => {
            commands::node::link(&fs, &target, &dest, output).await
        }
        Commands::Rm { path, destroy } => commands::node::remove(&fs, &path, destroy, output).await,
        Commands::Gc => commands::status::gc(&fs, output).await,
        Commands::Dump { output: target } => commands::archive::dump(&fs, &target, output).await,
        Commands::Undump { .. } | Commands::Config { .. } => Ok(()), // Handled above
    }
}

/// Install a stderr subscriber; `RUST_LOG` wins over `-v`
fn init_logging(verbose: u8) {
    let log_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("quire_core={},quire_cli={}", log_level, log_level))
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
