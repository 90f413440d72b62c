//! Threadline application composition root
//!
//! Builds the storage adapter, subscription registry and conversation
//! service once, and composes the domain router on top of them.

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, http::StatusCode, routing::get, Router};
use threadline_common::Config;
use threadline_conversations::{
    connect_storage, ChatService, ChatStorage, ConversationsState, EchoGenerator, Generator,
    ServiceConfig, SubscriptionRegistry,
};

/// Pause between echoed words, so streaming is visible in a client
const ECHO_CHUNK_DELAY: Duration = Duration::from_millis(30);

/// The router plus the long-lived handles the binary shuts down on exit
pub struct Application {
    pub router: Router,
    pub service: Arc<ChatService>,
}

impl Application {
    /// Drop live subscribers and close the storage pool
    pub async fn shutdown(&self) {
        let dropped = self.service.registry().shutdown().await;
        self.service.storage().close().await;
        tracing::info!(subscribers = dropped, "Application resources released");
    }
}

/// Create the main application from configuration
pub async fn create_app(config: &Config) -> Result<Application, anyhow::Error> {
    let storage = connect_storage(&config.database)
        .await
        .map_err(|e| anyhow::anyhow!("Storage initialization failed: {}", e))?;

    Ok(build_app(
        storage,
        ServiceConfig::from(config),
        Arc::new(EchoGenerator::with_delay(ECHO_CHUNK_DELAY)),
    ))
}

/// Compose the application around an existing storage adapter and generator
pub fn build_app(
    storage: Arc<dyn ChatStorage>,
    service_config: ServiceConfig,
    generator: Arc<dyn Generator>,
) -> Application {
    let registry = Arc::new(SubscriptionRegistry::new());
    let service = Arc::new(ChatService::new(storage, registry, service_config));

    let conversations_state = ConversationsState::new(service.clone(), generator);

    // Compose domain routers with shared infrastructure routes
    let router = Router::new()
        .route("/health", get(health_check))
        .with_state(service.clone())
        .route(
            "/",
            get(|| async { "Threadline API v0.0.1-SNAPSHOT" }),
        )
        .merge(threadline_conversations::routes().with_state(conversations_state));

    Application { router, service }
}

/// Health check endpoint
async fn health_check(State(service): State<Arc<ChatService>>) -> (StatusCode, &'static str) {
    if service.health_check().await {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Storage unavailable")
    }
}
