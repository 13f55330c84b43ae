pub mod transaction;

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use once_cell::sync::OnceCell;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{error, info};

use crate::conversation::{system_user_pair, ChatMessage};
use crate::inference::{
    ExecutionDevice, GenerationParams, ModelBackend, PromptCodec, TokenGenerator,
};
use crate::prompts;

const CHAT_PARAMS: GenerationParams = GenerationParams {
    max_new_tokens: 256,
    temperature: 0.7,
    sample: true,
};

const PARSE_PARAMS: GenerationParams = GenerationParams {
    max_new_tokens: 128,
    temperature: 0.3,
    sample: true,
};

/// Diagnostic snapshot served by `/health` and `/model/info`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub model_loaded: bool,
    pub tokenizer_loaded: bool,
    pub device: String,
    pub cuda_available: bool,
    pub cuda_devices: usize,
    pub model_name: String,
}

/// Owns the generator handles and the fixed chat / parsing behaviours.
pub struct ModelService {
    model_name: String,
    backend: Arc<dyn ModelBackend>,
    device: ExecutionDevice,
    tokenizer: Option<Arc<dyn PromptCodec>>,
    model: Option<Arc<dyn TokenGenerator>>,
}

impl ModelService {
    pub fn new(
        model_name: impl Into<String>,
        backend: Arc<dyn ModelBackend>,
        device: ExecutionDevice,
    ) -> Self {
        let model_name = model_name.into();
        info!(model = %model_name, device = device.descriptor(), "initializing model service");
        Self {
            model_name,
            backend,
            device,
            tokenizer: None,
            model: None,
        }
    }

    /// Acquire tokenizer then model. Never panics; failures are logged and reported as `false`.
    pub fn load_model(&mut self) -> bool {
        info!("loading tokenizer...");
        match self.backend.load_tokenizer(&self.model_name) {
            Ok(tokenizer) => self.tokenizer = Some(tokenizer),
            Err(err) => {
                error!(model = %self.model_name, "model load failed: {err:#}");
                return false;
            }
        }

        info!("loading model weights...");
        match self.backend.load_model(&self.model_name, &self.device.device) {
            Ok(model) => self.model = Some(model),
            Err(err) => {
                error!(model = %self.model_name, "model load failed: {err:#}");
                return false;
            }
        }

        info!(model = %self.model_name, "model loaded");
        true
    }

    /// Generate a reply for one system + user exchange.
    ///
    /// Errors are not propagated: the caller receives an apology text that embeds
    /// the cause instead of the model's reply.
    pub async fn generate_response(
        &self,
        user_message: &str,
        system_message: &str,
        params: GenerationParams,
    ) -> String {
        match self.try_generate(user_message, system_message, params).await {
            Ok(reply) => reply,
            Err(err) => {
                error!("response generation failed: {err:#}");
                prompts::generation_error_reply(&err.to_string())
            }
        }
    }

    pub async fn generate_chat_response(&self, message: &str) -> String {
        self.generate_response(message, prompts::coach_system_prompt(), CHAT_PARAMS)
            .await
    }

    /// Turn a spend description into a transaction object, or the fallback record.
    pub async fn parse_transaction(&self, text: &str) -> Map<String, Value> {
        let raw = self
            .generate_response(text, prompts::transaction_parser_prompt(), PARSE_PARAMS)
            .await;

        match transaction::parse_model_output(&raw) {
            Ok(record) => record,
            Err(err) => {
                error!("transaction parse failed: {err}");
                transaction::fallback_record(text)
            }
        }
    }

    pub fn get_health_status(&self) -> HealthStatus {
        HealthStatus {
            model_loaded: self.model.is_some(),
            tokenizer_loaded: self.tokenizer.is_some(),
            device: self.device.descriptor().to_string(),
            cuda_available: self.device.cuda_available,
            cuda_devices: if self.device.cuda_available {
                self.device.cuda_devices
            } else {
                0
            },
            model_name: self.model_name.clone(),
        }
    }

    async fn try_generate(
        &self,
        user_message: &str,
        system_message: &str,
        params: GenerationParams,
    ) -> Result<String> {
        let (Some(tokenizer), Some(model)) = (self.tokenizer.clone(), self.model.clone()) else {
            bail!("모델이 로드되지 않았습니다.");
        };
        let messages = system_user_pair(system_message, user_message);

        tokio::task::spawn_blocking(move || complete(&*tokenizer, &*model, &messages, &params))
            .await
            .map_err(|err| anyhow!("generation task failed: {err}"))?
    }
}

fn complete(
    tokenizer: &dyn PromptCodec,
    model: &dyn TokenGenerator,
    messages: &[ChatMessage],
    params: &GenerationParams,
) -> Result<String> {
    let input_ids = tokenizer.apply_chat_template(messages)?;
    let output_ids = model.generate(&input_ids, params, tokenizer.eos_token_id())?;

    let full = tokenizer.decode(&output_ids)?;
    let prompt = tokenizer.decode(&input_ids)?;
    Ok(strip_prompt(&full, &prompt).trim().to_string())
}

/// Drop the decoded prompt's length from the front of the decoded output.
fn strip_prompt<'a>(full: &'a str, prompt: &str) -> &'a str {
    let mut cut = prompt.len().min(full.len());
    while !full.is_char_boundary(cut) {
        cut += 1;
    }
    &full[cut..]
}

/// Memoized accessor: builds and loads the service on first use, then hands out the
/// same instance. Load failure is an error, never a half-initialized service.
pub struct ServiceSlot {
    cell: OnceCell<Arc<ModelService>>,
    model_name: String,
    backend: Arc<dyn ModelBackend>,
    device: ExecutionDevice,
}

impl ServiceSlot {
    pub fn new(
        model_name: impl Into<String>,
        backend: Arc<dyn ModelBackend>,
        device: ExecutionDevice,
    ) -> Self {
        Self {
            cell: OnceCell::new(),
            model_name: model_name.into(),
            backend,
            device,
        }
    }

    pub fn get_or_load(&self) -> Result<Arc<ModelService>> {
        self.cell
            .get_or_try_init(|| {
                let mut service = ModelService::new(
                    self.model_name.clone(),
                    self.backend.clone(),
                    self.device.clone(),
                );
                if !service.load_model() {
                    bail!("failed to load model {}", self.model_name);
                }
                Ok(Arc::new(service))
            })
            .cloned()
    }
}
