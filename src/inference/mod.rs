pub mod device;
pub mod hub;
pub mod mistral;

use std::sync::Arc;

use anyhow::Result;
use candle::Device;

use crate::conversation::ChatMessage;

pub use device::ExecutionDevice;
pub use hub::HubBackend;

/// Decoding knobs handed to the model for a single request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub max_new_tokens: usize,
    pub temperature: f64,
    pub sample: bool,
}

/// Tokenizer side of the generator: prompt templating, tokenization and decoding.
pub trait PromptCodec: Send + Sync {
    /// Render the chat template (with the assistant generation prompt appended) and
    /// tokenize the result.
    fn apply_chat_template(&self, messages: &[ChatMessage]) -> Result<Vec<u32>>;

    /// Decode ids to text with special tokens skipped.
    fn decode(&self, ids: &[u32]) -> Result<String>;

    fn eos_token_id(&self) -> Option<u32>;
}

/// Model side of the generator.
///
/// Returns the prompt ids followed by the newly generated ids, stopping at `eos`
/// or after `params.max_new_tokens` new tokens.
pub trait TokenGenerator: Send + Sync {
    fn generate(
        &self,
        input_ids: &[u32],
        params: &GenerationParams,
        eos: Option<u32>,
    ) -> Result<Vec<u32>>;
}

/// Acquires generator handles for a model identifier.
pub trait ModelBackend: Send + Sync {
    fn load_tokenizer(&self, model_id: &str) -> Result<Arc<dyn PromptCodec>>;
    fn load_model(&self, model_id: &str, device: &Device) -> Result<Arc<dyn TokenGenerator>>;
}

#[cfg(test)]
pub mod testing {
    //! Scripted in-memory generator used by service and router tests.
    //!
    //! Token ids are the UTF-8 bytes of the rendered prompt, so decoding is lossless
    //! and the "model" simply appends the bytes of a canned reply.

    use std::sync::{Arc, Mutex};

    use anyhow::{anyhow, Result};
    use candle::Device;

    use super::{GenerationParams, ModelBackend, PromptCodec, TokenGenerator};
    use crate::conversation::{ChatMessage, Role};

    #[derive(Clone)]
    pub enum Reply {
        Text(String),
        Fail(String),
    }

    pub struct ScriptedBackend {
        pub reply: Reply,
        pub tokenizer_ok: bool,
        pub model_ok: bool,
        pub seen: Arc<Mutex<Vec<(Vec<ChatMessage>, GenerationParams)>>>,
    }

    impl ScriptedBackend {
        pub fn replying(text: &str) -> Self {
            Self {
                reply: Reply::Text(text.to_string()),
                tokenizer_ok: true,
                model_ok: true,
                seen: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn failing(msg: &str) -> Self {
            Self {
                reply: Reply::Fail(msg.to_string()),
                ..Self::replying("")
            }
        }
    }

    fn role_tag(role: Role) -> &'static str {
        match role {
            Role::System => "system",
            Role::User => "user",
        }
    }

    struct ByteCodec {
        seen: Arc<Mutex<Vec<(Vec<ChatMessage>, GenerationParams)>>>,
    }

    impl PromptCodec for ByteCodec {
        fn apply_chat_template(&self, messages: &[ChatMessage]) -> Result<Vec<u32>> {
            self.seen
                .lock()
                .map_err(|_| anyhow!("poisoned"))?
                .push((messages.to_vec(), GenerationParams {
                    max_new_tokens: 0,
                    temperature: 0.0,
                    sample: false,
                }));
            let prompt = messages
                .iter()
                .map(|m| format!("<{}>{}", role_tag(m.role), m.content))
                .collect::<String>()
                + "<assistant>";
            Ok(prompt.bytes().map(u32::from).collect())
        }

        fn decode(&self, ids: &[u32]) -> Result<String> {
            let bytes = ids.iter().map(|&id| id as u8).collect::<Vec<_>>();
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }

        fn eos_token_id(&self) -> Option<u32> {
            None
        }
    }

    struct CannedModel {
        reply: Reply,
        seen: Arc<Mutex<Vec<(Vec<ChatMessage>, GenerationParams)>>>,
    }

    impl TokenGenerator for CannedModel {
        fn generate(
            &self,
            input_ids: &[u32],
            params: &GenerationParams,
            _eos: Option<u32>,
        ) -> Result<Vec<u32>> {
            if let Some(last) = self.seen.lock().map_err(|_| anyhow!("poisoned"))?.last_mut() {
                last.1 = *params;
            }
            match &self.reply {
                Reply::Text(text) => {
                    let mut out = input_ids.to_vec();
                    out.extend(text.bytes().map(u32::from));
                    Ok(out)
                }
                Reply::Fail(msg) => Err(anyhow!("{msg}")),
            }
        }
    }

    impl ModelBackend for ScriptedBackend {
        fn load_tokenizer(&self, model_id: &str) -> Result<Arc<dyn PromptCodec>> {
            if !self.tokenizer_ok {
                return Err(anyhow!("tokenizer for {model_id} unavailable"));
            }
            Ok(Arc::new(ByteCodec {
                seen: self.seen.clone(),
            }))
        }

        fn load_model(&self, model_id: &str, _device: &Device) -> Result<Arc<dyn TokenGenerator>> {
            if !self.model_ok {
                return Err(anyhow!("weights for {model_id} unavailable"));
            }
            Ok(Arc::new(CannedModel {
                reply: self.reply.clone(),
                seen: self.seen.clone(),
            }))
        }
    }
}
