use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use candle::{DType, Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::mistral::{Config as MistralConfig, Model as Mistral};
use tracing::info;

use super::device::{descriptor, dtype_for};
use super::{GenerationParams, TokenGenerator};

// ---------------------------------------------------------
// Mistral-family decoder with KV cache
// ---------------------------------------------------------
pub struct MistralGenerator {
    // one generation at a time: the KV cache lives inside the model
    model: Mutex<Mistral>,
    device: Device,
}

impl MistralGenerator {
    pub fn load(config_path: &Path, shards: &[PathBuf], device: &Device) -> Result<Self> {
        let cfg: MistralConfig = serde_json::from_slice(&fs::read(config_path)?)
            .map_err(|e| anyhow!("config.json is not a Mistral-family config: {e}"))?;

        let dtype = dtype_for(device);
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(shards, dtype, device)? };
        let model = Mistral::new(&cfg, vb)?;

        info!(
            device = descriptor(device),
            ?dtype,
            layers = cfg.num_hidden_layers,
            "🚀 model loaded with KV cache enabled"
        );

        Ok(Self {
            model: Mutex::new(model),
            device: device.clone(),
        })
    }
}

impl TokenGenerator for MistralGenerator {
    fn generate(
        &self,
        input_ids: &[u32],
        params: &GenerationParams,
        eos: Option<u32>,
    ) -> Result<Vec<u32>> {
        if input_ids.is_empty() {
            bail!("empty prompt");
        }

        let mut model = self
            .model
            .lock()
            .map_err(|_| anyhow!("model lock poisoned"))?;
        model.clear_kv_cache();

        let mut lp = LogitsProcessor::new(rand::random(), sampling_temperature(params), None);
        let mut tokens = input_ids.to_vec();
        let mut pos = 0usize;

        for _ in 0..params.max_new_tokens {
            // first step: whole prompt; later: last token only
            let ctx: &[u32] = if pos == 0 {
                &tokens
            } else {
                &tokens[tokens.len() - 1..]
            };
            let input = Tensor::new(ctx, &self.device)?.unsqueeze(0)?;

            let out = model.forward(&input, pos)?;
            let seq_len = out.dim(1)?;
            let logits = out.i((0, seq_len - 1))?.to_dtype(DType::F32)?;
            pos += ctx.len();

            let next_id = lp.sample(&logits)?;
            tokens.push(next_id);

            if Some(next_id) == eos {
                break;
            }
        }

        Ok(tokens)
    }
}

/// `None` selects greedy decoding; non-positive temperatures are treated as greedy.
fn sampling_temperature(params: &GenerationParams) -> Option<f64> {
    (params.sample && params.temperature > 0.0).then_some(params.temperature)
}
