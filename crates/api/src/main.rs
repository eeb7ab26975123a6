use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use loyalty_api::app::{build_app, AppServices};
use loyalty_infra::{Config, HttpScoringClient, PostgresLedgerStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    loyalty_observability::init();

    let config = Config::parse();

    let store = Arc::new(
        PostgresLedgerStore::connect(&config.store())
            .await
            .context("failed to open ledger store")?,
    );
    let scoring = Arc::new(
        HttpScoringClient::new(&config.scoring()).context("failed to build scoring client")?,
    );

    let services = Arc::new(AppServices::new(
        store.clone(),
        scoring,
        config.reconciler(),
    ));

    // Resume unfinished orders before accepting new ones.
    services
        .supervisor
        .recover()
        .await
        .context("failed to load unterminated orders")?;

    let app = build_app(services.clone());

    let listener = tokio::net::TcpListener::bind(config.run_address)
        .await
        .with_context(|| format!("failed to bind {}", config.run_address))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    services.supervisor.shutdown(config.shutdown_timeout()).await;
    store.close().await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
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
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
