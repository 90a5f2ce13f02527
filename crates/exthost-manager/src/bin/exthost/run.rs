//! Command handlers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use exthost_manager::{
    serve, workbench_customers, ExtensionHostManager, ExtensionHostStartup, HostManager,
    ManagerConfig, ManagerDeps, ProcessExtensionHost, ProcessHostOptions, TracingExtensionService,
};
use exthost_rpc::FramedTransport;
use exthost_treeview::TracingTreeViewSink;
use serde_json::json;
use tracing::info;

fn load_config(root: Option<PathBuf>) -> anyhow::Result<ManagerConfig> {
    let root = match root {
        Some(root) => root,
        None => std::env::current_dir().context("resolve current directory")?,
    };
    Ok(ManagerConfig::load(&root))
}

pub async fn run_serve(root: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load_config(root)?;
    serve(FramedTransport::stdio(), &config)
        .await
        .context("extension host failed")
}

pub async fn run_probe(
    root: Option<PathBuf>,
    affinity: u32,
    command: Vec<String>,
) -> anyhow::Result<()> {
    let config = load_config(root)?;
    let mut command = command.into_iter();
    let program = command.next().context("missing host command")?;
    let mut options = ProcessHostOptions::new(program, command.collect(), &config.host);
    options.init_data = json!({ "root": config.root.display().to_string() });

    let host = Arc::new(ProcessExtensionHost::new(
        ExtensionHostStartup::EagerManualStart,
        affinity,
        options,
    ));
    let deps = ManagerDeps {
        customers: workbench_customers(
            Arc::new(TracingExtensionService::new()),
            Arc::new(TracingTreeViewSink),
        ),
        telemetry: config.telemetry.service(),
        config: config.clone(),
    };
    let telemetry = deps.telemetry.clone();
    let manager = ExtensionHostManager::new(host, Vec::new(), deps);

    info!("probing extension host {}", manager.kind());
    let measurement = manager.measure().await;
    manager.dispose();
    telemetry.flush();
    match measurement.context("latency probe failed")? {
        Some(measurement) => {
            print!("{measurement}");
            Ok(())
        }
        None => anyhow::bail!("extension host did not start"),
    }
}
