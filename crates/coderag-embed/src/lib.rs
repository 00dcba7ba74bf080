//! Embedding models behind the `Embedder` trait: a candle BGE-M3 encoder for
//! real runs and a deterministic hash-based stand-in for tests and offline
//! use. Select with `APP_USE_FAKE_EMBEDDINGS=1`.

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use tokenizers::Tokenizer;
use tracing::{debug, info};

pub use coderag_core::traits::Embedder;

pub const EMBEDDING_DIM: usize = 1024;
const MAX_TOKENS: usize = 256;

pub struct BgeEmbedder {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl BgeEmbedder {
    pub fn new() -> Result<Self> {
        let device = default_device()?;
        let model_dir = resolve_model_dir()?;
        info!("loading BGE-M3 model from {}", model_dir.display());

        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;

        let config_path = model_dir.join("config.json");
        let config: XLMRobertaConfig = serde_json::from_str(&std::fs::read_to_string(&config_path)?)?;

        let weights_path = model_dir.join("pytorch_model.bin");
        let weights = candle_core::pickle::read_all(&weights_path)?;
        let weights_map: std::collections::HashMap<String, Tensor> = weights.into_iter().collect();
        let vb = VarBuilder::from_tensors(weights_map, DType::F32, &device);
        let model = XLMRobertaModel::new(&config, vb)?;
        info!("BGE-M3 model ready");
        Ok(Self { model, tokenizer, device })
    }

    /// Encode one text: truncate/pad to `MAX_TOKENS`, forward pass, masked
    /// mean pooling over token states, L2 normalization.
    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let enc = self.tokenizer.encode(text, true).map_err(|e| anyhow!("Tokenization failed: {}", e))?;
        let mut ids = enc.get_ids().to_vec();
        let mut mask = enc.get_attention_mask().to_vec();
        ids.truncate(MAX_TOKENS);
        mask.truncate(MAX_TOKENS);
        if ids.len() < MAX_TOKENS {
            let pad = MAX_TOKENS - ids.len();
            ids.extend(std::iter::repeat(1).take(pad));
            mask.extend(std::iter::repeat(0).take(pad));
        }

        let input_ids = Tensor::from_iter(ids, &self.device)?.reshape((1, MAX_TOKENS))?;
        let attention_mask = Tensor::from_iter(mask, &self.device)?.reshape((1, MAX_TOKENS))?;
        let token_type_ids = Tensor::zeros((1, MAX_TOKENS), DType::I64, &self.device)?;
        let hidden = self.model.forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)?;

        let hdim = hidden.dims()[2];
        let mask = attention_mask.to_dtype(hidden.dtype())?;
        let mask_3d = mask.unsqueeze(2)?;
        let mask_b = mask_3d.broadcast_as(hidden.shape()).unwrap_or(mask_3d.repeat((1, 1, hdim))?);
        let masked = (&hidden * &mask_b)?;
        let sum = masked.sum(1)?;
        let lens = mask.sum(1)?.unsqueeze(1)?.to_dtype(sum.dtype())?;
        let mut emb = sum.broadcast_div(&lens)?;

        let eps = Tensor::new(&[1e-12f32], hidden.device())?.to_dtype(hidden.dtype())?.unsqueeze(0)?;
        let norm = emb.sqr()?.sum_keepdim(1)?.sqrt()?.broadcast_add(&eps)?;
        emb = emb.broadcast_div(&norm)?;

        let out: Vec<f32> = emb.to_device(&Device::Cpu)?.squeeze(0)?.to_vec1()?;
        Ok(out)
    }
}

impl Embedder for BgeEmbedder {
    fn dim(&self) -> usize {
        EMBEDDING_DIM
    }

    fn max_len(&self) -> usize {
        MAX_TOKENS
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed_one(t)).collect()
    }
}

/// Deterministic embedding built from hashed tokens. Vectors are
/// L2-normalized so cosine scoring behaves like the real model's output.
pub struct HashEmbedder {
    dim: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(EMBEDDING_DIM)
    }
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        use std::hash::{Hash, Hasher};
        use twox_hash::XxHash64;
        let mut v = vec![0f32; self.dim];
        for (i, token) in text.to_lowercase().split_whitespace().enumerate() {
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h as usize) % self.dim;
            let val = (((h >> 32) as u32) as f32) / (u32::MAX as f32);
            v[idx] += val + (i as f32 % 3.0) * 0.01;
        }
        let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt().max(1e-6);
        for x in &mut v {
            *x /= norm;
        }
        v
    }
}

impl Embedder for HashEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn max_len(&self) -> usize {
        usize::MAX
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

pub fn get_default_embedder() -> Result<Box<dyn Embedder>> {
    let use_fake = std::env::var("APP_USE_FAKE_EMBEDDINGS")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    if use_fake {
        debug!("using deterministic hash embedder");
        return Ok(Box::new(HashEmbedder::default()));
    }
    Ok(Box::new(BgeEmbedder::new()?))
}

#[cfg(feature = "metal")]
fn default_device() -> Result<Device> {
    Device::new_metal(0).map_err(|e| anyhow!("Failed to initialize Metal device: {}", e))
}

#[cfg(not(feature = "metal"))]
fn default_device() -> Result<Device> {
    Ok(Device::Cpu)
}

fn resolve_model_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("APP_MODEL_DIR") {
        let p = PathBuf::from(&dir);
        if p.exists() {
            return Ok(p);
        }
    }
    if let Ok(dir) = std::env::var("MODEL_DIR") {
        let p = PathBuf::from(&dir);
        if p.exists() {
            return Ok(p);
        }
    }
    let local = Path::new("models/bge-m3");
    if local.exists() {
        return Ok(local.to_path_buf());
    }
    Err(anyhow!("Could not locate BGE-M3 model directory; set APP_MODEL_DIR"))
}
