/// Nodeflow runner
///
/// Executes one workflow and prints the resulting Execution as JSON.
/// The argument is either a path to a workflow JSON file or a workflow id
/// looked up in the configured workflow directory.

use anyhow::{bail, Result};
use nodeflow::{
    config::Config,
    nodes::builtin::bootstrap_registry,
    runtime::{ExecutionStatus, WorkflowEngine},
    workflow::{JsonFileSource, SqliteStore, WorkflowSource},
};
use std::{path::Path, sync::Arc};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration (NODEFLOW_* environment variables over defaults)
    let config = Config::default();

    tracing_subscriber::fmt()
        .with_max_level(config.log.max_level())
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    let Some(target) = std::env::args().nth(1) else {
        bail!("usage: nodeflow <workflow.json | workflow-id>");
    };

    let registry = Arc::new(bootstrap_registry());
    let mut builder = WorkflowEngine::builder(registry).config(config.engine.clone());

    // Execution history only when a database is configured
    if let Some(url) = &config.store.database_url {
        let store = SqliteStore::connect(url).await?;
        builder = builder.sink(Arc::new(store));
        tracing::info!(database = %url, "recording executions");
    }
    let engine = builder.build();

    let path = Path::new(&target);
    let workflow = if target.ends_with(".json") || path.is_file() {
        JsonFileSource::load_path(path).await?
    } else {
        JsonFileSource::new(&config.store.workflow_dir).load(&target).await?
    };

    let execution = engine.execute(&workflow).await;
    println!("{}", serde_json::to_string_pretty(&execution)?);

    if execution.status != ExecutionStatus::Completed {
        tracing::error!(status = execution.status.as_str(), error = ?execution.error, "workflow did not complete");
        std::process::exit(1);
    }
    Ok(())
}
