use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::service::ModelService;

pub mod error;
pub mod handlers;
pub mod types;

use error::ApiError;
use handlers::{chat, health, model_info, parse_transaction, root};

/// Shared by every handler. `model` is set once at startup and stays absent when
/// loading failed (degraded mode).
#[derive(Clone, Default)]
pub struct AppState {
    pub model: Option<Arc<ModelService>>,
}

impl AppState {
    pub fn require_model(&self) -> Result<&ModelService, ApiError> {
        self.model.as_deref().ok_or_else(ApiError::model_unavailable)
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/chat", post(chat))
        .route("/transaction/parse", post(parse_transaction))
        .route("/model/info", get(model_info))
}
