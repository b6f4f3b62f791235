use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::nomic_bert::{Config, NomicBertModel};
use hf_hub::api::sync::{Api, ApiRepo};
use tokenizers::Tokenizer;

use crate::embed::{EmbeddingProvider, ProviderLoader};
use crate::error::AppError;

const QUERY_PREFIX: &str = "Represent this query for searching relevant code: ";
const MAX_LEN: usize = 8192;

// ─── HuggingFace download helper ─────────────────────────────────────────────

fn hf_get(repo: &ApiRepo, repo_id: &str, filename: &str) -> Result<std::path::PathBuf> {
    if let Ok(path) = repo.get(filename) {
        return Ok(path);
    }

    let url = format!("https://huggingface.co/{repo_id}/resolve/main/{filename}");
    let cache_dir = hf_hub::Cache::default().path().join("http-fallback");
    let dest = cache_dir.join(format!(
        "{}-{}",
        repo_id.replace('/', "-"),
        filename.replace('/', "_")
    ));

    if !dest.exists() {
        std::fs::create_dir_all(&cache_dir)?;
        let response = ureq::get(&url)
            .call()
            .with_context(|| format!("HTTP GET {url}"))?;
        let mut file = std::fs::File::create(&dest)?;
        std::io::copy(&mut response.into_reader(), &mut file)?;
    }
    Ok(dest)
}

// ─── Tokenization ─────────────────────────────────────────────────────────────

fn tokenize(tok: &Tokenizer, text: &str) -> Result<(Vec<i64>, Vec<i64>)> {
    let encoding = tok
        .encode(text, true)
        .map_err(|e| anyhow::anyhow!("tokenize failed: {e}"))?;
    let ids: Vec<i64> = encoding
        .get_ids()
        .iter()
        .take(MAX_LEN)
        .map(|&x| x as i64)
        .collect();
    let mask: Vec<i64> = encoding
        .get_attention_mask()
        .iter()
        .take(MAX_LEN)
        .map(|&x| x as i64)
        .collect();
    Ok((ids, mask))
}

fn cls_pool_and_normalize(hidden: &Tensor) -> Result<Vec<f32>> {
    // hidden shape: (batch=1, seq_len, n_embd); take CLS token at position 0
    let cls = hidden.i((.., 0usize, ..))?;
    let norm = cls.broadcast_div(&cls.sqr()?.sum_all()?.sqrt()?)?;
    Ok(norm.squeeze(0)?.to_vec1::<f32>()?)
}

// ─── Model ────────────────────────────────────────────────────────────────────

/// A nomic-bert feature-extraction model (CodeRankEmbed and its relatives).
pub struct NomicEmbedder {
    model_id: String,
    model: NomicBertModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl NomicEmbedder {
    /// Load a nomic-bert model from the HuggingFace Hub cache.
    /// Synchronous. Call from `tokio::task::spawn_blocking`.
    pub fn load(model_id: &str) -> Result<Self> {
        tracing::info!("Loading NomicEmbedder ({model_id})...");
        let device = Device::Cpu;
        let repo = Api::new()?.model(model_id.to_string());

        tracing::debug!("  resolving config.json");
        let config_path = hf_get(&repo, model_id, "config.json").context("config.json")?;

        tracing::debug!("  resolving tokenizer.json");
        let tokenizer_path =
            hf_get(&repo, model_id, "tokenizer.json").context("tokenizer.json")?;

        tracing::debug!("  resolving model weights");
        let weights_path = hf_get(&repo, model_id, "model.safetensors")
            .context("model.safetensors")?;

        let tokenizer =
            Tokenizer::from_file(&tokenizer_path).map_err(|e| anyhow::anyhow!("{e}"))?;

        let config: Config =
            serde_json::from_str(&std::fs::read_to_string(&config_path)?)?;
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[&weights_path], DType::F32, &device)?
        };
        let model = NomicBertModel::load(vb, &config)?;

        tracing::info!("NomicEmbedder ({model_id}) ready");
        Ok(Self {
            model_id: model_id.to_string(),
            model,
            tokenizer,
            device,
        })
    }

    fn embed_raw(&self, text: &str) -> Result<Vec<f32>> {
        let (ids, mask) = tokenize(&self.tokenizer, text)?;
        let seq_len = ids.len();

        let input_ids = Tensor::from_vec(ids, (1, seq_len), &self.device)?;
        let attention_mask = Tensor::from_vec(mask, (1, seq_len), &self.device)?;
        let token_type_ids = Tensor::zeros((1, seq_len), DType::I64, &self.device)?;

        let hidden = self
            .model
            .forward(&input_ids, Some(&token_type_ids), Some(&attention_mask))?;

        cls_pool_and_normalize(&hidden)
    }
}

// ─── Provider glue ────────────────────────────────────────────────────────────

/// Async handle to a [`NomicEmbedder`]; forward passes run on the blocking pool.
pub struct NomicProvider {
    inner: Arc<NomicEmbedder>,
}

impl NomicProvider {
    async fn run(&self, text: String) -> crate::error::Result<Vec<f32>> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.embed_raw(&text))
            .await
            .map_err(|e| AppError::Other(e.into()))?
            .map_err(|e| AppError::Embed(e.to_string()))
    }
}

#[async_trait]
impl EmbeddingProvider for NomicProvider {
    /// Code and documents are embedded without a prefix.
    async fn embed(&self, text: &str) -> crate::error::Result<Vec<f32>> {
        self.run(text.to_string()).await
    }

    /// Queries carry the task instruction the model was trained with.
    async fn embed_query(&self, text: &str) -> crate::error::Result<Vec<f32>> {
        self.run(format!("{QUERY_PREFIX}{text}")).await
    }

    fn model_id(&self) -> &str {
        &self.inner.model_id
    }
}

/// Default loader: every model id is fetched as a nomic-bert checkpoint.
pub struct NomicLoader;

impl ProviderLoader for NomicLoader {
    fn load(&self, model_id: &str) -> crate::error::Result<Arc<dyn EmbeddingProvider>> {
        let embedder = NomicEmbedder::load(model_id).map_err(|e| AppError::Embed(e.to_string()))?;
        Ok(Arc::new(NomicProvider {
            inner: Arc::new(embedder),
        }))
    }
}
