use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use candle::Device;
use hf_hub::api::sync::{ApiBuilder, ApiRepo};
use serde_json::Value;
use tokenizers::Tokenizer;
use tracing::{info, warn};

use super::mistral::MistralGenerator;
use super::{ModelBackend, PromptCodec, TokenGenerator};
use crate::conversation::{ChatMessage, ChatTemplate};

/// Loads tokenizer and weights from a local snapshot directory or the Hugging Face hub.
pub struct HubBackend {
    model_dir: Option<PathBuf>,
    hf_token: Option<String>,
    chat_template_path: Option<PathBuf>,
}

impl HubBackend {
    pub fn new(
        model_dir: Option<PathBuf>,
        hf_token: Option<String>,
        chat_template_path: Option<PathBuf>,
    ) -> Self {
        Self {
            model_dir,
            hf_token,
            chat_template_path,
        }
    }

    fn snapshot(&self, model_id: &str) -> Result<Snapshot> {
        if let Some(dir) = &self.model_dir {
            info!(path = %dir.display(), "using local model snapshot");
            return Ok(Snapshot::Local(dir.clone()));
        }

        if self.hf_token.is_none() {
            warn!("no HF_TOKEN set; gated models will fail to download");
        }
        let api = ApiBuilder::new()
            .with_token(self.hf_token.clone())
            .build()
            .map_err(|e| anyhow!("hub client error: {e}"))?;
        Ok(Snapshot::Hub(api.model(model_id.to_string())))
    }
}

impl ModelBackend for HubBackend {
    fn load_tokenizer(&self, model_id: &str) -> Result<Arc<dyn PromptCodec>> {
        let snapshot = self.snapshot(model_id)?;

        let tokenizer_path = snapshot.get("tokenizer.json")?;
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Tokenizer load failed ({}): {e}", tokenizer_path.display()))?;

        let config_path = snapshot.get("tokenizer_config.json")?;
        let config: Value = serde_json::from_slice(&fs::read(&config_path)?)
            .with_context(|| format!("invalid {}", config_path.display()))?;
        let template =
            ChatTemplate::from_tokenizer_config(&config, self.chat_template_path.as_deref())?;

        let eos = tokenizer
            .token_to_id(template.eos_token())
            .or_else(|| tokenizer.token_to_id("</s>"))
            .or_else(|| tokenizer.token_to_id("<eos>"));
        if eos.is_none() {
            warn!("no eos token resolved; generation will run to max_new_tokens");
        }

        Ok(Arc::new(HubTokenizer {
            tokenizer,
            template,
            eos,
        }))
    }

    fn load_model(&self, model_id: &str, device: &Device) -> Result<Arc<dyn TokenGenerator>> {
        let snapshot = self.snapshot(model_id)?;
        let config_path = snapshot.get("config.json")?;
        let shards = snapshot.weight_files()?;
        info!("📦 Found {} weight shard(s)", shards.len());

        let model = MistralGenerator::load(&config_path, &shards, device)?;
        Ok(Arc::new(model))
    }
}

enum Snapshot {
    Local(PathBuf),
    Hub(ApiRepo),
}

impl Snapshot {
    fn get(&self, file: &str) -> Result<PathBuf> {
        match self {
            Snapshot::Local(dir) => {
                let path = dir.join(file);
                if path.exists() {
                    Ok(path)
                } else {
                    Err(anyhow!("{file} not found under {}", dir.display()))
                }
            }
            Snapshot::Hub(repo) => repo
                .get(file)
                .map_err(|e| anyhow!("failed to download {file}: {e}")),
        }
    }

    /// Whether the snapshot lists `file`. Hub lookup errors are returned, not treated as absence.
    fn contains(&self, file: &str) -> Result<bool> {
        match self {
            Snapshot::Local(dir) => Ok(dir.join(file).exists()),
            Snapshot::Hub(repo) => {
                let info = repo
                    .info()
                    .map_err(|e| anyhow!("failed to list repository files: {e}"))?;
                Ok(info.siblings.iter().any(|s| s.rfilename == file))
            }
        }
    }

    /// Sharded checkpoints list their files in the index's weight map.
    fn weight_files(&self) -> Result<Vec<PathBuf>> {
        const INDEX: &str = "model.safetensors.index.json";
        if !self.contains(INDEX)? {
            return Ok(vec![self.get("model.safetensors")?]);
        }
        let index_path = self.get(INDEX)?;

        let index_json: Value = serde_json::from_slice(&fs::read(&index_path)?)?;
        let shard_names = index_json["weight_map"]
            .as_object()
            .ok_or_else(|| anyhow!("index.json: weight_map is not an object"))?
            .values()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| anyhow!("invalid shard entry in index.json"))
            })
            .collect::<Result<BTreeSet<_>>>()?;

        shard_names.iter().map(|name| self.get(name)).collect()
    }
}

struct HubTokenizer {
    tokenizer: Tokenizer,
    template: ChatTemplate,
    eos: Option<u32>,
}

impl PromptCodec for HubTokenizer {
    fn apply_chat_template(&self, messages: &[ChatMessage]) -> Result<Vec<u32>> {
        let prompt = self.template.render(messages)?;
        // the template already carries the special tokens
        let enc = self
            .tokenizer
            .encode(prompt, false)
            .map_err(|e| anyhow!("Tokenizer encode error: {e}"))?;
        Ok(enc.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.tokenizer
            .decode(ids, true)
            .map_err(|e| anyhow!("Tokenizer decode error: {e}"))
    }

    fn eos_token_id(&self) -> Option<u32> {
        self.eos
    }
}
