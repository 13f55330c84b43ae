use std::sync::Arc;

use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod api;
mod config;
mod conversation;
mod inference;
mod prompts;
mod service;

use api::AppState;
use config::ServerConfig;
use inference::{ExecutionDevice, HubBackend};
use service::{ModelService, ServiceSlot};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // -----------------------------
    // Logging
    // -----------------------------
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;
    info!("🚀 Starting coach LLM server on {}", config.bind_addr());

    // -----------------------------
    // Model (degraded mode on failure)
    // -----------------------------
    let model = load_model_service(&config).await;
    let state = AppState { model };

    // -----------------------------
    // Routers
    // -----------------------------
    let app = api::router()
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.bind_addr();
    info!("🌐 HTTP listening on http://{addr}");

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Startup load: any failure leaves the service absent so `/health` keeps answering.
async fn load_model_service(config: &ServerConfig) -> Option<Arc<ModelService>> {
    let device = match ExecutionDevice::select(config.device.as_deref()) {
        Ok(device) => device,
        Err(err) => {
            warn!("device selection failed, falling back to CPU: {err:#}");
            ExecutionDevice::cpu_fallback()
        }
    };

    let backend = Arc::new(HubBackend::new(
        config.model_dir.clone(),
        config.hf_token.clone(),
        config.chat_template_path.clone(),
    ));
    let slot = ServiceSlot::new(config.model_id.clone(), backend, device);

    info!(model = %config.model_id, "model load starting...");
    match tokio::task::spawn_blocking(move || slot.get_or_load()).await {
        Ok(Ok(service)) => {
            info!("model load finished");
            Some(service)
        }
        Ok(Err(err)) => {
            error!("model load failed: {err:#}");
            None
        }
        Err(err) => {
            error!("model load task failed: {err}");
            None
        }
    }
}
