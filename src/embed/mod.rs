//! Embedding providers and the process-wide provider cache.
//!
//! Indexes never own a model. They ask the [`ProviderCache`] for the provider
//! registered under their model id, which loads it on first use and hands the
//! same instance to every later caller.

pub mod nomic;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};

/// A loaded feature-extraction model.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a document or code window.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a search query. Models trained with a query instruction override this.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text).await
    }

    fn model_id(&self) -> &str;
}

/// Loads a provider for a model id. Synchronous; the cache runs it on the
/// blocking pool.
pub trait ProviderLoader: Send + Sync {
    fn load(&self, model_id: &str) -> Result<Arc<dyn EmbeddingProvider>>;
}

/// Lazily loaded providers memoized by model id.
pub struct ProviderCache {
    loader: Arc<dyn ProviderLoader>,
    providers: Mutex<HashMap<String, Arc<dyn EmbeddingProvider>>>,
}

impl ProviderCache {
    pub fn new(loader: Arc<dyn ProviderLoader>) -> Self {
        Self {
            loader,
            providers: Mutex::new(HashMap::new()),
        }
    }

    /// Return the provider for `model_id`, loading it on first request.
    ///
    /// The map lock is held across the load so concurrent first requests for
    /// the same model wait for a single load instead of racing.
    pub async fn get(&self, model_id: &str) -> Result<Arc<dyn EmbeddingProvider>> {
        let mut providers = self.providers.lock().await;
        if let Some(provider) = providers.get(model_id) {
            return Ok(Arc::clone(provider));
        }

        tracing::info!("loading embedding provider {model_id}");
        let loader = Arc::clone(&self.loader);
        let id = model_id.to_string();
        let provider = tokio::task::spawn_blocking(move || loader.load(&id))
            .await
            .map_err(|e| AppError::Other(e.into()))??;

        providers.insert(model_id.to_string(), Arc::clone(&provider));
        Ok(provider)
    }

    /// Drop every loaded provider; the next request reloads.
    pub async fn clear(&self) {
        self.providers.lock().await.clear();
    }
}

/// Cosine similarity of two vectors. Components missing from the shorter
/// vector count as zero; a zero-length vector scores 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len().max(b.len());
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0.0);
        let y = b.get(i).copied().unwrap_or(0.0);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}
