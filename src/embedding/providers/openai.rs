//! Remote embedding provider in the OpenAI API shape (also compatible
//! with HuggingFace TEI and other `/embeddings`-shaped endpoints). New
//! module — the teacher has no remote provider, but `reqwest` is already
//! in its dependency table (used there for unrelated HTTP calls); this is
//! the "enrich from the rest of the pack" addition the embedding
//! orchestrator needs to be pluggable at all.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::embedding::provider::{DistanceMetric, EmbeddingProvider, ProviderCapabilities};
use crate::error::{EmbeddingErrorKind, Result, SearchError};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// OpenAI's own per-request token ceiling for embedding models.
const DEFAULT_MAX_TOKENS_PER_REQUEST: usize = 8_191;

pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dims: Option<usize>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

impl OpenAiProvider {
    pub fn new(model: &str, api_key: Option<String>, base_url: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| SearchError::embedding(EmbeddingErrorKind::Transport(e.to_string())))?;
        Ok(Self {
            client,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            model: model.to_string(),
            dims: None,
        })
    }

    fn map_http_error(status: reqwest::StatusCode, body: &str) -> SearchError {
        let parsed: Option<ErrorEnvelope> = serde_json::from_str(body).ok();
        let message = parsed.as_ref().map(|e| e.error.message.clone()).unwrap_or_else(|| body.to_string());
        let code = parsed.and_then(|e| e.error.code);

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return SearchError::embedding(EmbeddingErrorKind::Auth);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return SearchError::embedding(EmbeddingErrorKind::Rate);
        }
        if status == reqwest::StatusCode::BAD_REQUEST
            && (code.as_deref() == Some("context_length_exceeded") || message.to_ascii_lowercase().contains("maximum context length"))
        {
            return SearchError::embedding(EmbeddingErrorKind::TokenLimit {
                tokens: DEFAULT_MAX_TOKENS_PER_REQUEST + 1,
                limit: DEFAULT_MAX_TOKENS_PER_REQUEST,
            });
        }
        SearchError::embedding(EmbeddingErrorKind::Transport(format!("HTTP {status}: {message}")))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            name: "openai".into(),
            model: self.model.clone(),
            dims: self.dims,
            distance_metric: DistanceMetric::Cosine,
            max_batch_items: 2048,
            max_tokens_per_request: Some(DEFAULT_MAX_TOKENS_PER_REQUEST),
            has_tokenizer: false,
            supports_adaptive_batching: true,
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let mut request = self.client.post(&url).json(&EmbeddingRequest { model: &self.model, input: texts });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SearchError::embedding(EmbeddingErrorKind::Timeout(DEFAULT_TIMEOUT))
            } else {
                SearchError::embedding(EmbeddingErrorKind::Transport(e.to_string()))
            }
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| SearchError::embedding(EmbeddingErrorKind::Transport(e.to_string())))?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &body));
        }

        let parsed: EmbeddingResponse = serde_json::from_str(&body)
            .map_err(|e| SearchError::embedding(EmbeddingErrorKind::Transport(format!("malformed response: {e}"))))?;

        let mut ordered = vec![Vec::new(); texts.len()];
        for datum in parsed.data {
            if let Some(slot) = ordered.get_mut(datum.index) {
                *slot = datum.embedding;
            }
        }
        Ok(ordered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn embed_batch_orders_results_by_response_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    { "embedding": [0.2, 0.2], "index": 1 },
                    { "embedding": [0.1, 0.1], "index": 0 }
                ]
            })))
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new("text-embedding-3-small", Some("sk-test".into()), Some(server.uri())).unwrap();
        let vectors = provider.embed_batch(&["a".to_string(), "b".to_string()]).await.unwrap();
        assert_eq!(vectors, vec![vec![0.1, 0.1], vec![0.2, 0.2]]);
    }

    #[tokio::test]
    async fn unauthorized_response_maps_to_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": { "message": "invalid api key" }
            })))
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new("text-embedding-3-small", Some("sk-bad".into()), Some(server.uri())).unwrap();
        let err = provider.embed_batch(&["a".to_string()]).await.unwrap_err();
        assert!(matches!(err, SearchError::Embedding { kind: EmbeddingErrorKind::Auth, .. }));
    }

    #[tokio::test]
    async fn rate_limited_response_maps_to_rate_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": { "message": "rate limit exceeded" }
            })))
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new("text-embedding-3-small", Some("sk-test".into()), Some(server.uri())).unwrap();
        let err = provider.embed_batch(&["a".to_string()]).await.unwrap_err();
        assert!(matches!(err, SearchError::Embedding { kind: EmbeddingErrorKind::Rate, .. }));
    }
}
