use anyhow::Result;
use mcp_gateway::{
    BackendRegistry, BindingTable, DEFAULT_CONFIG_PATH, GatewayConfig, GatewayService,
};
use rmcp::ServiceExt;
use rmcp::transport::stdio;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the protocol stream, so all diagnostics go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = GatewayConfig::load(&config_path)?;
    info!(
        path = %config_path,
        backends = config.backends.len(),
        tools = config.tools.len(),
        "Configuration loaded"
    );

    // Compile the tool table before touching any process so alias
    // cycles and dangling bindings fail without side effects.
    let bindings = BindingTable::compile(&config)?;

    let registry = Arc::new(BackendRegistry::from_config(&config));
    registry.start_all().await?;

    let service = GatewayService::new(registry.clone(), bindings, config.gateway.clone());

    let cancellation_token = CancellationToken::new();
    spawn_shutdown_watcher(cancellation_token.clone());

    let served = serve_upstream(service, cancellation_token).await;

    if let Err(e) = registry.stop_all().await {
        error!(error = %e, "Backend shutdown reported failures");
    }
    served
}

/// Serve the gateway over stdio until the upstream client disconnects
/// or a shutdown signal cancels the token.
async fn serve_upstream(service: GatewayService, token: CancellationToken) -> Result<()> {
    let running = service
        .serve_with_ct(stdio(), token.child_token())
        .await
        .inspect_err(|e| {
            error!("serving error: {:?}", e);
        })?;
    info!("Gateway serving on stdio");

    let quit_reason = running.waiting().await?;
    info!(reason = ?quit_reason, "Gateway server stopped");
    Ok(())
}

fn spawn_shutdown_watcher(token: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        token.cancel();
    });
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "Cannot install SIGTERM handler");
            std::future::pending::<()>().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
