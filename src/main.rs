use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;

use code_runner::config::Config;
use code_runner::executor::{Executor, ExecutorSelector, SandboxExecutor};
use code_runner::judger::Judger;
use code_runner::server::{self, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("code_runner=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env().context("Failed to load configuration")?;

    let registry = Arc::new(config.load_registry()?);
    info!("Loaded languages: {}", registry.languages().join(", "));

    let local: Arc<dyn Executor> = Arc::new(config.local_executor(registry.clone()));
    let sandbox_registry = registry.clone();
    let sandbox_config = config.sandbox.clone();
    let selector = ExecutorSelector::build(
        config.prefers_sandbox(),
        async move {
            let sandbox = SandboxExecutor::connect(sandbox_registry, sandbox_config).await?;
            Ok::<_, code_runner::Error>(Arc::new(sandbox) as Arc<dyn Executor>)
        },
        local,
    )
    .await;
    info!("Active executor: {}", selector.name());

    let state = Arc::new(AppState {
        judger: Judger::new(Arc::new(selector), registry.clone()),
        registry,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Code runner listening on {}", addr);

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Code runner stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        // Never resolve, keep serving
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
