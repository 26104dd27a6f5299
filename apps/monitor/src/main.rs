mod chain;
mod config;
mod db;
mod filters;
mod hub;
mod manager;
mod metrics;
mod monitor;
mod router;
mod types;
mod webhook;

use std::future::IntoFuture;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use chain::TronChainClient;
use manager::SubscriptionManager;
use metrics::MonitorTelemetry;
use router::EventRouter;
use tron::Trc20TokenTable;
use webhook::WebhookDispatcher;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cfg = config::load_config()?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(bind_addr = %cfg.bind_addr, network = %cfg.network, "monitor starting");

    let shutdown = CancellationToken::new();
    let telemetry = Arc::new(MonitorTelemetry::new());

    let db = db::Db::connect(&cfg.database_url, telemetry.clone()).await?;
    db.ensure_schema().await?;
    let db = Arc::new(db);

    let chain: Arc<dyn chain::ChainClient> = Arc::new(
        TronChainClient::connect(cfg.tron_grpc_url.clone(), cfg.tron_api_key.clone(), telemetry.clone()).await?,
    );

    let dispatcher = WebhookDispatcher::spawn(telemetry.clone(), db.clone(), shutdown.child_token());
    let router = Arc::new(EventRouter::new(dispatcher, telemetry.clone()));
    let token_table = Arc::new(Trc20TokenTable::new());

    let manager = Arc::new(SubscriptionManager::with_poll_interval(
        chain,
        db.clone(),
        db.clone(),
        db.clone(),
        router.clone(),
        telemetry,
        token_table,
        shutdown.child_token(),
        cfg.poll_interval,
    ));
    manager.resume_active().await?;

    let app = hub::router(hub::HubState { manager: manager.clone(), router });
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", cfg.bind_addr))?;

    tracing::info!("monitor started");

    let serve_shutdown = shutdown.clone();
    tokio::select! {
        res = axum::serve(listener, app).into_future() => {
            res.context("push-socket server exited")?;
        }
        res = shutdown_signal() => {
            res?;
            tracing::info!("shutdown requested");
            serve_shutdown.cancel();
        }
    }

    shutdown.cancel();
    Ok(())
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.context("ctrl-c")?;
        Ok(())
    }
}
