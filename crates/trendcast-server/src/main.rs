mod api;
mod middleware;
mod scheduler;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use trendcast_engine::{
    Accumulator, AccumulatorSettings, PublisherSettings, Shutdown, TrendPublisher,
    WindowAggregator,
};

use crate::api::{build_app, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(trendcast_core::load_app_config()?);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(
        env = %config.env,
        store = ?config.store,
        window = %config.window,
        interval_secs = config.aggregation_interval_secs,
        "starting trendcast server"
    );

    let store = trendcast_store::open_store(&config).await?;
    let (trigger, shutdown) = Shutdown::channel();

    let accumulator = Accumulator::new(
        Arc::clone(&store),
        AccumulatorSettings::from_config(&config),
    );
    let aggregator = Arc::new(WindowAggregator::new(Arc::clone(&store), config.window));
    let publisher = Arc::new(TrendPublisher::new(
        Arc::clone(&store),
        PublisherSettings::from_config(&config),
    ));
    let publisher_task = tokio::spawn(Arc::clone(&publisher).run(shutdown.clone()));

    let mut scheduler = scheduler::build_scheduler(
        aggregator,
        shutdown.clone(),
        config.aggregation_interval_secs,
    )
    .await?;

    let app = build_app(AppState {
        accumulator,
        publisher,
        store,
        shutdown,
    });

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            trigger.trigger();
        })
        .await?;

    scheduler.shutdown().await?;
    publisher_task.await?;
    tracing::info!("trendcast server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}
