//! CLI entrypoint for the extension host bridge.

#[path = "exthost/cli.rs"]
mod cli;
#[path = "exthost/run.rs"]
mod run;

use clap::Parser;

use cli::{Cli, Command};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    match cli.command {
        Command::Serve { root } => runtime.block_on(run::run_serve(root)),
        Command::Probe {
            root,
            affinity,
            command,
        } => runtime.block_on(run::run_probe(root, affinity, command)),
    }
}
