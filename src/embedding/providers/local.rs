//! Local, no-network embedding provider backed by `model2vec-rs`'s
//! `StaticModel` — the exact crate the teacher depends on for
//! `core/src/vector_store.rs::CodebaseIndex`, lifted out from behind that
//! struct and exposed through [`EmbeddingProvider`].

use async_trait::async_trait;
use model2vec_rs::model::StaticModel;
use tokio::sync::Mutex;

use crate::embedding::provider::{DistanceMetric, EmbeddingProvider, ProviderCapabilities};
use crate::error::{EmbeddingErrorKind, Result, SearchError};

pub struct LocalProvider {
    model_id: String,
    // `StaticModel::encode_single` takes `&mut self` in the teacher's
    // usage; the provider trait requires `&self`, so the model is
    // serialized behind a mutex rather than re-architecting the trait
    // for this one provider's quirk.
    model: Mutex<StaticModel>,
    dims: usize,
}

impl LocalProvider {
    pub fn load(model_id: &str) -> Result<Self> {
        let model = StaticModel::from_pretrained(model_id, None, None, None)
            .map_err(|e| SearchError::embedding(EmbeddingErrorKind::Transport(e.to_string())))?;
        let dims = model.encode_single("probe").len();
        Ok(Self {
            model_id: model_id.to_string(),
            model: Mutex::new(model),
            dims,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            name: "local".into(),
            model: self.model_id.clone(),
            dims: Some(self.dims),
            distance_metric: DistanceMetric::Cosine,
            max_batch_items: 256,
            max_tokens_per_request: None,
            has_tokenizer: false,
            supports_adaptive_batching: false,
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut model = self.model.lock().await;
        Ok(texts.iter().map(|t| model.encode_single(t)).collect())
    }
}
