use anyhow::Result;
use axum::Router;
use context_memory::ContextManager;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod core;
mod middleware;
mod models;


use crate::api::ContextState;
use crate::core::config::{LogFormat, Settings};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let settings = Settings::new()?;
    init_tracing(settings.log.format);

    info!(
        "Starting context gateway on {}:{} ({} backend)",
        settings.server.host, settings.server.port, settings.storage.backend
    );

    let manager = Arc::new(
        ContextManager::open(&settings.storage_config()?, settings.context_config()?).await?,
    );

    crate::core::maintenance::spawn_maintenance(
        manager.clone(),
        settings.maintenance_interval()?,
        settings.stale_after(),
    );

    let app = create_app(manager);

    let listener =
        tokio::net::TcpListener::bind((settings.server.host.as_str(), settings.server.port))
            .await?;

    info!("Server running on http://{}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()));

    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(fmt::layer()).init(),
    }
}

fn create_app(manager: Arc<ContextManager>) -> Router {
    use crate::middleware::{error_handler, request_id};
    use axum::middleware;

    let cors = CorsLayer::permissive();

    api::routes(ContextState { manager })
        .layer(middleware::from_fn(request_id::add_request_id))
        .layer(middleware::from_fn(error_handler::handle_errors))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
