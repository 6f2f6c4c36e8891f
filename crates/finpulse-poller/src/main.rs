//! FinPulse service entry point

use anyhow::Context;
use finpulse_poller::{catalog, App, FinPulseConfig, HttpTransport, LogFormat, ReqwestTransport};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = FinPulseConfig::load()?;
    init_tracing(config.log_format)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.polling.scheduler_pool_size)
        .enable_all()
        .build()
        .context("failed to build runtime")?;

    runtime.block_on(run(config))
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,finpulse_poller=info"))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.pretty().init(),
    }
    Ok(())
}

async fn run(config: FinPulseConfig) -> anyhow::Result<()> {
    let registry = catalog::load_registry(Path::new(&config.endpoints_file))?;
    let transport: Arc<dyn HttpTransport> = Arc::new(
        ReqwestTransport::new(CONNECT_TIMEOUT).context("failed to build HTTP client")?,
    );
    let addr = config.bind_addr();

    let app = App::build(config, registry, transport)?;
    app.verify_global_credential().await?;

    let cancel = CancellationToken::new();
    let background = app.spawn_background(&cancel);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(addr = %addr, "FinPulse starting");
    info!("Endpoints: /health, /snapshot, /metrics, /ws");

    let shutdown = cancel.clone();
    let state = app.state.clone();
    let served = axum::serve(listener, app.router())
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
            shutdown.cancel();
            state.close_all();
        })
        .await;

    cancel.cancel();
    app.shutdown().await;
    for handle in background {
        let _ = handle.await;
    }
    served?;

    info!("FinPulse stopped");
    Ok(())
}
