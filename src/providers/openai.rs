// src/providers/openai.rs
// OpenAI-compatible embeddings API client

use super::{Embedded, EmbeddingProvider};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Default API endpoint
const DEFAULT_API_URL: &str = "https://api.openai.com/v1/embeddings";

/// Max characters to embed (truncate longer text)
const MAX_TEXT_CHARS: usize = 8000;

/// HTTP timeout
const TIMEOUT_SECS: u64 = 30;

/// Retry attempts
const RETRY_ATTEMPTS: usize = 2;

/// HTTP embeddings client for any OpenAI-compatible endpoint.
///
/// Validates that every response matches the configured dimension count,
/// so a misconfigured endpoint can't poison the vector store.
pub struct HttpEmbeddingClient {
    api_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
    http_client: reqwest::Client,
}

impl HttpEmbeddingClient {
    pub fn new(api_key: String, model: String, dimensions: usize) -> Self {
        Self::with_url(DEFAULT_API_URL.to_string(), api_key, model, dimensions)
    }

    pub fn with_url(api_url: String, api_key: String, model: String, dimensions: usize) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            api_url,
            api_key,
            model,
            dimensions,
            http_client,
        }
    }

    async fn request_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text
        });

        let mut last_error = None;
        for attempt in 0..=RETRY_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }

            match self
                .http_client
                .post(&self.api_url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await
            {
                Ok(response) => {
                    if response.status().is_success() {
                        let json: serde_json::Value = response.json().await?;
                        if let Some(values) = json["data"][0]["embedding"].as_array() {
                            let embedding: Vec<f32> = values
                                .iter()
                                .filter_map(|v| v.as_f64().map(|f| f as f32))
                                .collect();
                            if embedding.len() == self.dimensions {
                                return Ok(embedding);
                            }
                            anyhow::bail!(
                                "embedding dimension mismatch: got {}, expected {}",
                                embedding.len(),
                                self.dimensions
                            );
                        }
                        anyhow::bail!("invalid embedding response shape");
                    } else {
                        let status = response.status();
                        let text = response.text().await.unwrap_or_default();
                        last_error = Some(anyhow::anyhow!("API error {}: {}", status, text));
                    }
                }
                Err(e) => {
                    last_error = Some(anyhow::Error::from(e).context("embed request failed"));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("unknown embedding error")))
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Embedded> {
        let text = if text.len() > MAX_TEXT_CHARS {
            debug!(
                "Truncating text from {} to {} chars",
                text.len(),
                MAX_TEXT_CHARS
            );
            &text[..MAX_TEXT_CHARS]
        } else {
            text
        };

        let embedding = self
            .request_embedding(text)
            .await
            .context("embedding provider call failed")?;

        Ok(Embedded {
            embedding,
            model: self.model.clone(),
            cached: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_boundary() {
        let long_text = "a".repeat(10000);
        let truncated = if long_text.len() > MAX_TEXT_CHARS {
            &long_text[..MAX_TEXT_CHARS]
        } else {
            &long_text
        };
        assert_eq!(truncated.len(), MAX_TEXT_CHARS);
    }

    #[test]
    fn client_reports_model() {
        let client = HttpEmbeddingClient::new("key".into(), "test-model".into(), 4);
        assert_eq!(client.model(), "test-model");
    }
}
