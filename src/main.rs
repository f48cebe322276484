//! SSH Shell MCP Server - Entry point
//!
//! Parses CLI arguments, builds the session registry, starts the MCP server
//! on stdio transport and handles graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rmcp::service::ServiceExt;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ssh_shell_mcp::config::{Args, Config, CONNECTION_TIMEOUT_SECS, SWEEP_INTERVAL_SECS};
use ssh_shell_mcp::error::Result;
use ssh_shell_mcp::server::SshShellServer;
use ssh_shell_mcp::session::SessionRegistry;
use ssh_shell_mcp::ssh::{ShellTimings, SshConnector};

#[tokio::main]
async fn main() -> Result<()> {
    // Logging goes to stderr; stdout carries MCP JSON-RPC
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::from_args(args)?;

    info!("SSH Shell MCP Server v{} starting...", env!("CARGO_PKG_VERSION"));
    info!(
        "Target {}@{}:{} (elevate: {}, purpose: {})",
        config.user,
        config.host,
        config.port,
        config.elevate_user.as_deref().unwrap_or("none"),
        config.purpose
    );
    info!(
        "Timeout: {}s, Max chars: {}, Session TTL: {}s",
        config.timeout_secs,
        config
            .max_chars
            .map_or("unlimited".to_string(), |n| n.to_string()),
        config.session_ttl_secs
    );

    if config.disable_elevated {
        info!("exec-elevated tool is disabled");
    }

    let connector = SshConnector::new()
        .with_connect_timeout(Duration::from_secs(CONNECTION_TIMEOUT_SECS));
    let registry = SessionRegistry::with_options(
        Arc::new(connector),
        ShellTimings::default(),
        Duration::from_secs(config.session_ttl_secs),
    );
    let sweeper = registry.spawn_sweeper(Duration::from_secs(SWEEP_INTERVAL_SECS));

    let server = SshShellServer::new(config, registry).await?;

    info!("SSH Shell MCP Server running on stdio");

    let server_for_shutdown = server.clone();

    let shutdown_handle = tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = wait_for_sigterm() => {
                info!("Received SIGTERM, shutting down...");
            }
        }

        server_for_shutdown.shutdown().await;
    });

    match server.clone().serve(rmcp::transport::io::stdio()).await {
        Ok(running_server) => {
            info!("MCP server is serving...");
            if let Err(e) = running_server.waiting().await {
                error!("Server error: {}", e);
            }
        }
        Err(e) => {
            error!("Failed to start MCP server: {}", e);
            sweeper.abort();
            return Err(ssh_shell_mcp::ShellError::connection(e.to_string()));
        }
    }

    shutdown_handle.abort();
    sweeper.abort();
    server.shutdown().await;

    info!("SSH Shell MCP Server stopped");

    Ok(())
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}
