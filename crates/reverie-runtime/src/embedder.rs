//! [`OllamaEmbedder`] – embeddings from a local Ollama server
//! (`POST /api/embeddings`).

use async_trait::async_trait;
use reverie_memory::{EmbedError, Embedder};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

pub struct OllamaEmbedder {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        if text.trim().is_empty() {
            return Err(EmbedError::EmptyInput);
        }
        let url = format!("{}/api/embeddings", self.base_url);
        debug!(model = %self.model, text_len = text.len(), "ollama embed");
        let response: EmbeddingResponse = self
            .client
            .post(&url)
            .json(&EmbeddingRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| EmbedError::Backend(e.to_string()))?
            .json()
            .await
            .map_err(|e| EmbedError::Backend(e.to_string()))?;

        if response.embedding.is_empty() {
            return Err(EmbedError::Backend(format!("model {} returned an empty embedding", self.model)));
        }
        Ok(response.embedding)
    }
}
