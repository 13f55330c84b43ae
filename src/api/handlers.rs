use axum::{extract::State, Json};
use serde_json::{json, Value};
use tracing::{error, info};

use crate::api::error::ApiError;
use crate::api::types::{
    ChatRequest, ChatResponse, HealthResponse, HealthState, TransactionRequest,
    TransactionResponse, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE,
};
use crate::api::AppState;
use crate::inference::GenerationParams;
use crate::service::transaction::TransactionRecord;
use crate::service::ModelService;

const SERVICE_NAME: &str = "천마비고 LLM Server";
const SERVICE_DESCRIPTION: &str = "AI 재정 코치 LLM 서버";

pub async fn root() -> Json<Value> {
    Json(json!({
        "message": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "description": SERVICE_DESCRIPTION,
        "endpoints": {
            "health": "/health",
            "chat": "/chat",
            "transaction_parse": "/transaction/parse",
            "model_info": "/model/info"
        }
    }))
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    match health_snapshot(state.model.as_deref()) {
        Ok(resp) => Json(resp),
        Err(err) => {
            error!("health check failed: {err}");
            Json(HealthResponse {
                status: HealthState::Error,
                model_info: json!({ "error": err.to_string() }),
            })
        }
    }
}

fn health_snapshot(model: Option<&ModelService>) -> anyhow::Result<HealthResponse> {
    let Some(model) = model else {
        return Ok(HealthResponse {
            status: HealthState::ModelNotLoaded,
            model_info: json!({ "error": "Model not initialized" }),
        });
    };

    let info = model.get_health_status();
    let status = if info.model_loaded {
        HealthState::Healthy
    } else {
        HealthState::ModelNotLoaded
    };

    Ok(HealthResponse {
        status,
        model_info: serde_json::to_value(info)?,
    })
}

pub async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let params = chat_params(&req)?;
    let model = state.require_model()?;

    info!("chat request: {}...", preview(&req.message, 100));

    let response = match req.system_message.as_deref().filter(|s| !s.is_empty()) {
        Some(system) => model.generate_response(&req.message, system, params).await,
        None => model.generate_chat_response(&req.message).await,
    };

    info!("chat response generated: {} chars", response.chars().count());

    Ok(Json(ChatResponse::success(response)))
}

fn chat_params(req: &ChatRequest) -> Result<GenerationParams, ApiError> {
    let max_new_tokens = req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
    if max_new_tokens == 0 {
        return Err(ApiError::invalid("max_tokens must be a positive integer"));
    }

    let temperature = req.temperature.unwrap_or(DEFAULT_TEMPERATURE);
    if !temperature.is_finite() {
        return Err(ApiError::invalid("temperature must be a finite number"));
    }

    Ok(GenerationParams {
        max_new_tokens,
        temperature,
        sample: true,
    })
}

pub async fn parse_transaction(
    State(state): State<AppState>,
    Json(req): Json<TransactionRequest>,
) -> Result<Json<TransactionResponse>, ApiError> {
    let model = state.require_model()?;

    info!("transaction parse request: {}", req.text);

    let parsed = model.parse_transaction(&req.text).await;
    let record = TransactionRecord::from_object(&parsed).map_err(|err| {
        error!("transaction parse failed: {err}");
        ApiError::internal(format!("거래 파싱 중 오류 발생: {err}"))
    })?;

    info!(?record, "transaction parsed");

    Ok(Json(TransactionResponse {
        amount: record.amount,
        description: record.description,
        category: record.category,
        payment_method: record.payment_method,
        status: "success",
    }))
}

pub async fn model_info(State(state): State<AppState>) -> Json<Value> {
    let Some(model) = state.model.as_deref() else {
        return Json(json!({ "error": "Model not loaded" }));
    };

    match serde_json::to_value(model.get_health_status()) {
        Ok(info) => Json(info),
        Err(err) => {
            error!("model info lookup failed: {err}");
            Json(json!({ "error": err.to_string() }))
        }
    }
}

fn preview(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::preview;

    #[test]
    fn preview_cuts_on_characters() {
        assert_eq!(preview("가나다라", 2), "가나");
        assert_eq!(preview("short", 100), "short");
    }
}
