use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use fg_config::Config;
use fg_core::{
    init_logging, ContainerRuntime, DockerRuntime, Executor, GracefulShutdown, OpContext,
    SystemExecutor,
};
use fg_service::{serve, NetworkService};
use fg_types::ErrorKind;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Bound for the start-up availability probes.
const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Parser)]
#[command(name = "fabricgrid", about = "FabricGrid - ledger network control plane", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control-plane service
    Serve {
        /// Listen address, overrides FG_LISTEN_ADDR
        #[arg(long)]
        listen: Option<String>,
    },
    /// Check that the container runtime and artifact tool are usable
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load().context("Failed to load configuration")?;
    match cli.command {
        Commands::Serve { listen } => {
            if let Some(addr) = listen {
                config.listen_addr = addr;
            }
            serve_command(config).await?
        }
        Commands::Check => check_command(config).await?,
    }
    Ok(())
}

async fn serve_command(config: Config) -> anyhow::Result<()> {
    // 1. Init logging; the guard flushes the file writer on exit
    let _log_guard = init_logging(
        &config.log_level,
        config.log_file.as_deref(),
        config.log_structured,
    );
    info!(version = %config.version, "FabricGrid starting...");

    // 2. Directories
    config
        .create_directories()
        .context("Failed to create data directories")?;
    info!(data_dir = %config.data_dir.display(), "Configuration loaded");

    // 3. The container runtime must be reachable before accepting work
    let executor: Arc<dyn Executor> = Arc::new(SystemExecutor::new());
    let runtime = DockerRuntime::new(executor.clone(), &config.docker_bin);
    let probe = OpContext::background().with_timeout(PROBE_TIMEOUT);
    if let Err(e) = runtime.check_available(&probe).await {
        error!(error = %e, "Container runtime is unavailable");
        return Err(e).context("Container runtime is unavailable");
    }

    // 4. Service + transport
    let service = Arc::new(NetworkService::from_config(&config, executor));
    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;

    let shutdown = Arc::new(GracefulShutdown::new());
    let signals = shutdown.clone();
    let signal_task = tokio::spawn(async move { signals.wait_for_signal().await });

    info!(addr = %config.listen_addr, "FabricGrid is running. Press Ctrl+C to stop.");
    let result = serve(listener, service.clone(), shutdown.token()).await;
    shutdown.request_shutdown();
    signal_task.abort();

    let running = service.registry().len().await;
    if running > 0 {
        info!(networks = running, "Leaving running networks in place");
    }
    result.context("Server failed")?;
    info!("FabricGrid stopped.");
    Ok(())
}

async fn check_command(config: Config) -> anyhow::Result<()> {
    let executor: Arc<dyn Executor> = Arc::new(SystemExecutor::new());
    let ctx = OpContext::background().with_timeout(PROBE_TIMEOUT);
    let mut healthy = true;

    let runtime = DockerRuntime::new(executor.clone(), &config.docker_bin);
    match runtime.check_available(&ctx).await {
        Ok(()) => println!("container runtime ({}): ok", config.docker_bin),
        Err(e) => {
            healthy = false;
            println!("container runtime ({}): {e}", config.docker_bin);
        }
    }

    let args = vec!["--version".to_string()];
    match executor.execute(&ctx, &config.artifact_tool, &args).await {
        Ok(out) => println!(
            "artifact tool ({}): ok {}",
            config.artifact_tool,
            String::from_utf8_lossy(&out).trim()
        ),
        Err(e) if e.kind() == ErrorKind::BinaryMissing => {
            healthy = false;
            println!("artifact tool ({}): not found", config.artifact_tool);
        }
        Err(e) => {
            healthy = false;
            println!("artifact tool ({}): {e}", config.artifact_tool);
        }
    }

    if !healthy {
        bail!("environment check failed");
    }
    Ok(())
}
