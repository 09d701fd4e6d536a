//! MCP server binary for SemaphoreUI.
//!
//! This binary runs an MCP server that exposes SemaphoreUI projects,
//! templates and tasks through stdio transport.

use clap::Parser;
use rmcp::ServiceExt;
use semaphore_mcp::config::{ServerConfig, ENV_LOG_LEVEL, ENV_TOKEN, ENV_URL};
use semaphore_mcp::gateway::SemaphoreClient;
use semaphore_mcp::mcp::{run_until_interrupted, SemaphoreServer};
use semaphore_mcp::resources::ResourceService;
use semaphore_mcp::tasks::TaskService;
use semaphore_mcp::{mcp_logging, paths};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// MCP server for SemaphoreUI.
#[derive(Parser, Debug)]
#[command(name = "semaphore-mcp", version, about)]
struct Args {
    /// SemaphoreUI URL, e.g. https://semaphore.example.com
    #[arg(long, env = ENV_URL)]
    url: Option<String>,

    /// API token.
    #[arg(long, env = ENV_TOKEN, hide_env_values = true)]
    token: Option<String>,

    /// YAML config file (default: ~/.semaphore-mcp/config.yaml if present).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log file (default: ~/.semaphore-mcp/mcp.log).
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Log filter directive, e.g. `debug` or `semaphore_mcp=trace`.
    #[arg(long, env = ENV_LOG_LEVEL)]
    log_level: Option<String>,
}

impl Args {
    /// Resolve the config: file, then environment, then flags.
    fn into_config(self) -> semaphore_mcp::Result<ServerConfig> {
        let config_path = self.config.or_else(paths::default_config_path);
        let mut config = ServerConfig::load(config_path.as_deref())?;
        config.apply_process_env();
        if let Some(url) = self.url {
            config.semaphore_url = url;
        }
        if let Some(token) = self.token {
            config.api_token = Some(token);
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(path) = self.log_file {
            config.log_file = Some(path);
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Args::parse().into_config()?;

    // Logging goes to a file; stdout carries the protocol
    match config.log_path() {
        Some(path) => {
            if let Err(e) = mcp_logging::init(&path, &config.log_level) {
                eprintln!("Warning: MCP logging init failed: {e}");
            }
        }
        None => eprintln!("Warning: no home directory, MCP logging disabled"),
    }
    mcp_logging::install_panic_hook();

    let client =
        SemaphoreClient::new(&config.semaphore_url, config.token(), config.request_timeout())?;
    tracing::info!(api_url = client.api_url(), "SemaphoreUI client created");
    let gateway = Arc::new(client);

    let shutdown = CancellationToken::new();
    let tasks = TaskService::new(gateway.clone(), &config.semaphore_url)
        .with_monitor_settings(config.monitor_settings())
        .with_shutdown(shutdown.clone());
    let server = SemaphoreServer::from_services(tasks, ResourceService::new(gateway));

    tracing::info!("MCP server created, starting stdio transport");
    let service = server.serve(rmcp::transport::stdio()).await?;
    tracing::info!("MCP server running");
    // Either way out stops any startup monitoring still in flight
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "could not listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    if let Some(quit) = run_until_interrupted(service.waiting(), interrupt, &shutdown).await {
        quit?;
    }
    mcp_logging::log_shutdown(None);

    Ok(())
}
