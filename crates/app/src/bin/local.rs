//! Runs the Threadline HTTP and WebSocket surface against the configured
//! database. Stops accepting connections on SIGINT/SIGTERM, lets in-flight
//! exchanges finish, then closes the storage pool.

use std::net::SocketAddr;

use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use threadline_app::Application;
use threadline_common::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .pretty()
        .init();

    let config = Config::from_env()
        .inspect_err(|e| tracing::error!(error = %e, "Invalid threadline configuration"))?;
    let app = threadline_app::create_app(&config)
        .await
        .inspect_err(|e| tracing::error!(error = %e, "Could not open conversation storage"))?;
    info!(backend = %config.database.backend, "Conversation storage ready");

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let served = serve(&app, addr).await;

    app.shutdown().await;
    info!("Threadline stopped");
    served
}

async fn serve(app: &Application, addr: SocketAddr) -> anyhow::Result<()> {
    let router = app.router.clone().layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        %addr,
        health = "/health",
        live = "/v1/conversations/{id}/ws",
        "Threadline listening"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(stop_requested())
        .await?;
    Ok(())
}

/// Resolves on the first stop signal. A handler that cannot be installed
/// is logged and never fires, leaving the other one in charge.
async fn stop_requested() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "SIGINT handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let signal = tokio::select! {
        _ = interrupt => "SIGINT",
        _ = terminate => "SIGTERM",
    };
    info!(signal, "Draining connections");
}
