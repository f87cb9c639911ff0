use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Drive remote document-processing pipelines for a whole catalog.
#[derive(Debug, Parser)]
#[command(name = "docflow", version, about)]
pub struct Args {
    /// Configuration file
    #[arg(short, long, env = "DOCFLOW_CONFIG", default_value = "config.toml")]
    pub config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Write Prometheus metrics here on exit
    #[arg(long, global = true)]
    pub metrics_out: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Discover and process every actionable item in the catalog
    Run {
        /// Also run publish, summary update and indexing stages
        #[arg(long)]
        full: bool,
    },
    /// Process specific items, regardless of discovery
    Process {
        /// Item ids
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Repair specific items
    Repair {
        /// Item ids
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Ask the backend for broken items and repair them all
    Sweep,
}
