use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

use mcp_conductor::{config, logging, Conductor};

/// How often the config file is checked for changes.
const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = match std::env::args_os().nth(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let cwd = std::env::current_dir().context("failed to read current directory")?;
            config::find_config_path(&cwd)?
        }
    };

    let runtime = config::load_runtime_config(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    logging::init_tracing(&runtime.logging).context("failed to initialize logging")?;
    tracing::info!(
        config = %config_path.display(),
        servers = runtime.servers.len(),
        "configuration loaded"
    );

    // Relative server paths resolve against the config file's directory.
    let working_dir = config_path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.display().to_string());
    let mut conductor = Conductor::with_stdio_transport(&runtime, working_dir);
    conductor
        .start_with_config_file(config_path.clone(), runtime.servers.clone(), CONFIG_POLL_INTERVAL)
        .await
        .context("failed to start servers")?;

    report_status(&conductor).await;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    tracing::info!("shutting down");
    conductor.shutdown().await;
    Ok(())
}

async fn report_status(conductor: &Conductor) {
    let supervisor = conductor.supervisor();
    for status in supervisor.connection_statuses().await {
        tracing::info!(
            server = %status.id,
            status = %status.status,
            tools = status.tool_count,
            error = ?status.last_error,
            "server status"
        );
    }
    let tools = supervisor.all_tools().await;
    tracing::info!(total_tools = tools.len(), "mcp-conductor ready");
}
