// src/providers.rs
// Injected capabilities: embedding provider and LLM callback.
//
// Both are optional. When absent, the layers that depend on them record
// skipped statuses; the engine never requires network access on its own.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

pub mod openai;

/// Result of embedding one text
#[derive(Debug, Clone)]
pub struct Embedded {
    pub embedding: Vec<f32>,
    pub model: String,
    /// Whether the provider itself served this from its own cache
    pub cached: bool,
}

/// Text -> fixed-length float vector. Same-dimension output for a given
/// model; the provider is opaque and may cache or call HTTP internally.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model tag recorded on stored vectors
    fn model(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Embedded>;
}

/// Prompt -> completion text. Used for affect classification and entity
/// extraction; responses are expected to contain JSON, possibly fenced.
#[async_trait]
pub trait LlmCallback: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Pull a JSON payload out of an LLM response.
///
/// Tolerates markdown code fences and prose around the payload. Tried in
/// order: the response as-is, a ```json fenced block, the outermost
/// object, the outermost array.
pub fn extract_json(response: &str) -> Result<String> {
    // Already valid JSON
    if serde_json::from_str::<Value>(response).is_ok() {
        return Ok(response.to_string());
    }

    // Fenced code block
    if let Some(opening_pos) = response.find("```") {
        let backtick_count = response[opening_pos..]
            .chars()
            .take_while(|&c| c == '`')
            .count();
        let after_backticks = &response[opening_pos + backtick_count..];

        let json_keyword_end = if after_backticks.trim_start().starts_with("json") {
            after_backticks.find("json").map(|i| i + 4).unwrap_or(0)
        } else {
            0
        };
        let json_start = opening_pos + backtick_count + json_keyword_end;
        let closing_marker = "`".repeat(backtick_count);

        if let Some(relative_closing) = response[json_start..].find(&closing_marker) {
            let candidate = response[json_start..json_start + relative_closing].trim();
            if !candidate.is_empty() && serde_json::from_str::<Value>(candidate).is_ok() {
                debug!("Extracted JSON from {} backtick code block", backtick_count);
                return Ok(candidate.to_string());
            }
        }
    }

    // Raw object
    if let (Some(start), Some(end)) = (response.find('{'), response.rfind('}')) {
        if start < end {
            let candidate = &response[start..=end];
            if serde_json::from_str::<Value>(candidate).is_ok() {
                debug!("Extracted raw JSON object");
                return Ok(candidate.to_string());
            }
        }
    }

    // Raw array
    if let (Some(start), Some(end)) = (response.find('['), response.rfind(']')) {
        if start < end {
            let candidate = &response[start..=end];
            if serde_json::from_str::<Value>(candidate).is_ok() {
                debug!("Extracted raw JSON array");
                return Ok(candidate.to_string());
            }
        }
    }

    anyhow::bail!(
        "no valid JSON in response (first 200 chars: {})",
        &response[..response.len().min(200)]
    )
}
