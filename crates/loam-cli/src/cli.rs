use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "loam", about = "Inspect and maintain a loam workspace", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Workspace root; overrides the config file.
    #[arg(short, long, global = true)]
    pub workspace: Option<PathBuf>,

    /// TOML kernel configuration.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show the index row of a block
    Get(IdArgs),
    /// Show the text of a block
    Content(IdArgs),
    /// List blocks referencing a block
    Refs(IdArgs),
    /// Find a document by file path
    ByPath(LocationArgs),
    /// Find a document by human-readable path
    ByHpath(LocationArgs),
    /// Load and summarize a document
    Load(LocationArgs),
    /// Load the documents containing several blocks
    Batch(BatchArgs),
    /// Rebuild the index from the document files
    Reindex,
    /// Show pool and cache statistics
    Stats,
    /// Empty the workspace caches
    ClearCache,
    /// Print the effective configuration
    Config,
}

#[derive(Args)]
pub struct IdArgs {
    pub id: String,
}

#[derive(Args)]
pub struct LocationArgs {
    /// Notebook (box) ID
    #[arg(short, long = "box")]
    pub box_id: String,
    pub path: String,
}

#[derive(Args)]
pub struct BatchArgs {
    #[arg(required = true)]
    pub ids: Vec<String>,
}
