use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use gavel::broker::Broker;
use gavel::config::Config;
use gavel::server::{self, AppState};
use gavel::supervisor::{self, WorkerPool};
use gavel::worker;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    // Load .env file if present (silently ignored if missing)
    dotenvy::dotenv().ok();

    let mut args = std::env::args().skip(1);
    if args.next().as_deref() == Some(supervisor::WORKER_ARG) {
        let worker_id = args
            .next()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_default();
        std::process::exit(worker::run(worker_id));
    }

    run_supervisor()
}

#[tokio::main]
async fn run_supervisor() -> anyhow::Result<()> {
    tracing::info!("gavel starting");
    let config = Config::from_env();

    let broker = Broker::connect(&config).await?;
    // Counters start from zero on every boot; the restart flag is lowered in
    // case a previous run died mid-restart.
    broker
        .delete(&[
            broker.keys.submitted(),
            broker.keys.fetched(),
            broker.keys.processed(),
        ])
        .await?;
    broker.set(&broker.keys.restart(), "False").await?;

    let pool = Arc::new(Mutex::new(WorkerPool::start(&config)?));
    let shutdown = CancellationToken::new();

    tokio::spawn(supervisor::monitor::run(
        pool.clone(),
        broker.clone(),
        config.clone(),
        shutdown.clone(),
    ));
    tokio::spawn(supervisor::recovery::run(
        broker.clone(),
        config.clone(),
        shutdown.clone(),
    ));
    tokio::spawn(supervisor::cleanup::run(
        broker.clone(),
        config.clone(),
        shutdown.clone(),
    ));

    let state = AppState {
        broker: broker.clone(),
        config: Arc::new(config.clone()),
    };
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "http api listening");

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(wait_for_shutdown_signal())
        .await?;

    shutdown.cancel();
    pool.lock().await.shutdown();
    tracing::info!("gavel shut down");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let ctrl_c = tokio::signal::ctrl_c();
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sig) => sig,
        Err(e) => {
            tracing::error!("failed to install SIGTERM handler: {e}");
            let _ = ctrl_c.await;
            return;
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = sigterm.recv() => {}
    }
    tracing::info!("shutdown signal received");
}
