use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_MAX_TOKENS: usize = 256;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub system_message: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<usize>,
    #[serde(default)]
    pub temperature: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub status: &'static str,
}

impl ChatResponse {
    pub fn success(response: String) -> Self {
        Self {
            response,
            status: "success",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TransactionRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub amount: f64,
    pub description: String,
    pub category: String,
    pub payment_method: String,
    pub status: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    ModelNotLoaded,
    Error,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthState,
    pub model_info: Value,
}
