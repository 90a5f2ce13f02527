//! CLI definitions for exthost.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "exthost",
    version,
    about = "Extension host bridge CLI",
    after_help = "Examples:\n  exthost serve\n  exthost probe -- exthost serve\n  exthost probe --root ./workspace -- node ./host.js"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a stub extension host on stdin/stdout.
    Serve {
        /// Directory holding exthost.toml (defaults to the current directory).
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Start an extension host process and print its latency.
    Probe {
        /// Directory holding exthost.toml (defaults to the current directory).
        #[arg(long)]
        root: Option<PathBuf>,
        /// Affinity slot of the probed host.
        #[arg(long, default_value = "0")]
        affinity: u32,
        /// Host command line.
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}
