//! Preview proxy entrypoint.

use anyhow::Context;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use preview_proxy::api::ApiClient;
use preview_proxy::auth::Authenticator;
use preview_proxy::config::ProxyConfig;
use preview_proxy::cookie::CookieCodec;
use preview_proxy::server::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting preview-proxy v{}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(ProxyConfig::from_env().context("failed to load configuration")?);
    let api = Arc::new(ApiClient::new(&config.daytona_api_url, &config.daytona_api_key));

    let auth = Arc::new(Authenticator {
        config: config.clone(),
        codec: CookieCodec::new(&config.cookie_hash_key),
        bearer: api.clone(),
        auth_keys: api.clone(),
        exchanger: api.clone(),
        auth_urls: api,
    });

    let state = AppState {
        config: config.clone(),
        auth,
        client: reqwest::Client::new(),
    };

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .context("failed to bind proxy port")?;
    info!(port = config.port, "preview proxy listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("preview proxy stopped");
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
