//! Runner fleet autoscaler entrypoint.

use anyhow::Context;
use axum::routing::get;
use axum::Router;
use tokio::signal;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use runner_manager::api::AdminApi;
use runner_manager::config::ManagerConfig;
use runner_manager::manager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting runner-manager v{}", env!("CARGO_PKG_VERSION"));

    let cfg = ManagerConfig::from_env().context("failed to load configuration")?;
    let api = AdminApi::new(&cfg.daytona_api_url, &cfg.daytona_api_key);

    let client = kube::Client::try_default()
        .await
        .context("failed to initialize kubernetes client")?;
    info!("connected to kubernetes cluster");

    let health = tokio::spawn(serve_health(cfg.api_port));

    tokio::select! {
        () = manager::run(cfg, api, client) => {},
        () = shutdown_signal() => info!("received shutdown signal, stopping"),
    }

    health.abort();
    Ok(())
}

async fn serve_health(port: u16) -> anyhow::Result<()> {
    let app = Router::new().route("/healthz", get(|| async { "OK" }));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .context("failed to bind health check port")?;
    info!(port, "health check server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
