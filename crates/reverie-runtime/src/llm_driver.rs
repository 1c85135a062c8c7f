//! [`OllamaGenerator`] – local LLM backend for generative distillation.
//!
//! Talks to the native Ollama `/api/generate` endpoint
//! ([Ollama](https://ollama.com), `http://localhost:11434`) with streaming
//! off.  The JSON schema carried in
//! [`GenerationOptions::format`] is forwarded as Ollama's `format` field so the
//! model is constrained to the distillation reply shape.
//!
//! # Example
//!
//! ```rust,no_run
//! use reverie_distill::{GenerationOptions, Generator};
//! use reverie_runtime::llm_driver::OllamaGenerator;
//!
//! # async fn demo() {
//! let generator = OllamaGenerator::new("http://localhost:11434", "llama3.1");
//! // Requires a running Ollama instance.
//! let _reply = generator
//!     .generate("Summarise this attempt.", &GenerationOptions::for_distillation())
//!     .await;
//! # }
//! ```

use async_trait::async_trait;
use reverie_distill::{GenerationError, GenerationOptions, Generator};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from the Ollama HTTP exchange.
#[derive(Error, Debug)]
pub enum LlmError {
    /// The HTTP request to the model server failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The response from the model server could not be used.
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
}

impl From<LlmError> for GenerationError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Http(e) => GenerationError::Unavailable(e.to_string()),
            LlmError::BadResponse(msg) => GenerationError::BadResponse(msg),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct SamplingOptions {
    temperature: f32,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a serde_json::Value>,
    options: SamplingOptions,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// OllamaGenerator
// ─────────────────────────────────────────────────────────────────────────────

/// An async client for Ollama's non-streaming generate endpoint.
///
/// Construct once and reuse for every distillation call.
pub struct OllamaGenerator {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaGenerator {
    /// Create a generator pointing at `base_url` (e.g. `"http://localhost:11434"`)
    /// and using `model` (e.g. `"llama3.1"`).
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

    /// Send `prompt` and return the model's reply text.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Http`] if the request fails, or
    /// [`LlmError::BadResponse`] if the reply is empty.
    pub async fn complete(&self, prompt: &str, options: &GenerationOptions) -> Result<String, LlmError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            format: options.format.as_ref(),
            options: SamplingOptions {
                temperature: options.temperature,
            },
        };
        debug!(model = %self.model, prompt_len = prompt.len(), "ollama generate");

        let response: GenerateResponse = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.response.trim().is_empty() {
            return Err(LlmError::BadResponse("empty response".into()));
        }
        Ok(response.response)
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String, GenerationError> {
        Ok(self.complete(prompt, options).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generator_constructed_without_panic() {
        let generator = OllamaGenerator::new("http://localhost:11434/", "llama3.1");
        assert_eq!(generator.base_url, "http://localhost:11434");
        assert_eq!(generator.model(), "llama3.1");
    }

    #[test]
    fn request_body_carries_schema_and_temperature() {
        let options = GenerationOptions::for_distillation();
        let body = GenerateRequest {
            model: "llama3.1",
            prompt: "p",
            stream: false,
            format: options.format.as_ref(),
            options: SamplingOptions {
                temperature: options.temperature,
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["stream"], false);
        assert!(json["format"].to_string().contains("route_outcome"));
        assert!((json["options"]["temperature"].as_f64().unwrap() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn request_without_schema_omits_format() {
        let body = GenerateRequest {
            model: "m",
            prompt: "p",
            stream: false,
            format: None,
            options: SamplingOptions { temperature: 0.5 },
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(!json.contains("format"));
    }

    #[tokio::test]
    async fn unreachable_server_is_unavailable() {
        let generator = OllamaGenerator::new("http://127.0.0.1:1", "m");
        let err = generator
            .generate("p", &GenerationOptions::for_distillation())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Unavailable(_)));
    }
}
