//! On-device XLM-RoBERTa encoder (BGE-M3 family) run through candle.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use docrag_core::error::{Error, Result};
use docrag_core::traits::Embedder;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use crate::device::select_device;
use crate::pool::masked_mean_l2;
use crate::tokenize::tokenize_on_device;

const SLOW_EMBED_MS: u128 = 100;

pub struct LocalEncoder {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
    name: String,
    dim: usize,
    max_len: usize,
}

impl LocalEncoder {
    /// Loads `tokenizer.json`, `config.json` and either `model.safetensors`
    /// or `pytorch_model.bin` from `model_dir`.
    pub fn load(model_dir: &Path, max_len: usize) -> Result<Self> {
        let device = select_device();
        info!(model_dir = %model_dir.display(), "loading local encoder");

        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| Error::Embedding(format!("failed to load tokenizer from {}: {e}", tokenizer_path.display())))?;

        let config_path = model_dir.join("config.json");
        let config: XLMRobertaConfig = serde_json::from_str(&std::fs::read_to_string(&config_path)?)?;
        let dim = config.hidden_size;

        let weights = load_weights(model_dir, &device)?;
        let vb = VarBuilder::from_tensors(weights, DType::F32, &device);
        let model = XLMRobertaModel::new(&config, vb).map_err(Error::embedding)?;

        let name = model_dir.file_name().and_then(|n| n.to_str()).unwrap_or("local").to_string();
        info!(model = %name, dim, max_len, "local encoder ready");
        Ok(Self { model, tokenizer, device, name, dim, max_len: max_len.max(1) })
    }

    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let start = Instant::now();
        let (input_ids, attention_mask) = tokenize_on_device(&self.tokenizer, text, self.max_len, &self.device)?;
        let vector = self.forward(&input_ids, &attention_mask).map_err(Error::embedding)?;
        if vector.len() != self.dim {
            return Err(Error::DimensionMismatch { expected: self.dim, actual: vector.len() });
        }
        let elapsed = start.elapsed().as_millis();
        if elapsed > SLOW_EMBED_MS {
            warn!(elapsed_ms = elapsed as u64, chars = text.len(), "slow embedding");
        }
        Ok(vector)
    }

    fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor) -> candle_core::Result<Vec<f32>> {
        let token_type_ids = Tensor::zeros((1, self.max_len), DType::I64, &self.device)?;
        let hidden = self.model.forward(input_ids, attention_mask, &token_type_ids, None, None, None)?;
        let pooled = masked_mean_l2(&hidden, attention_mask)?;
        pooled.to_device(&Device::Cpu)?.squeeze(0)?.to_vec1()
    }
}

impl Embedder for LocalEncoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn max_len(&self) -> usize {
        self.max_len
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        debug!(model = %self.name, batch = texts.len(), "embedding batch");
        texts.iter().map(|t| self.embed_one(t)).collect()
    }
}

fn load_weights(model_dir: &Path, device: &Device) -> Result<HashMap<String, Tensor>> {
    let safetensors = model_dir.join("model.safetensors");
    if safetensors.exists() {
        return candle_core::safetensors::load(&safetensors, device).map_err(Error::embedding);
    }
    let pickle = model_dir.join("pytorch_model.bin");
    if !pickle.exists() {
        return Err(Error::NotFound(format!("no model weights in {}", model_dir.display())));
    }
    let tensors = candle_core::pickle::read_all(&pickle).map_err(Error::embedding)?;
    Ok(tensors.into_iter().collect())
}

/// Explicit directory first, then `DOCRAG_MODEL_DIR`, then `models/bge-m3`
/// next to or above the working directory.
pub fn resolve_model_dir(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = configured {
        return if dir.exists() {
            Ok(dir.to_path_buf())
        } else {
            Err(Error::NotFound(format!("model directory {}", dir.display())))
        };
    }
    if let Ok(dir) = std::env::var("DOCRAG_MODEL_DIR") {
        let p = PathBuf::from(dir);
        if p.exists() {
            debug!(model_dir = %p.display(), "using DOCRAG_MODEL_DIR");
            return Ok(p);
        }
    }
    for candidate in ["models/bge-m3", "../models/bge-m3"] {
        let p = Path::new(candidate);
        if p.exists() {
            return Ok(p.to_path_buf());
        }
    }
    Err(Error::NotFound("could not locate a local embedding model directory".to_string()))
}
