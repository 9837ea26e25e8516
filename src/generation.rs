//! Text generation service abstraction and implementations.
//!
//! The [`Generator`] trait is the answer-composition collaborator: given
//! system instructions, a user prompt, and a temperature, it returns
//! generated text. Unlike the embedding adapter, generation is a single
//! attempt: failures surface unchanged to the caller, which must not
//! retry on the model's behalf.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::GenerationConfig;

/// An external text-generation service.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, system: &str, prompt: &str, temperature: f32) -> Result<String>;
}

/// A no-op generator that always returns errors.
pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    async fn generate(&self, _system: &str, _prompt: &str, _temperature: f32) -> Result<String> {
        bail!("generation provider is disabled")
    }
}

/// Generator backed by an OpenAI-compatible `POST /v1/chat/completions`
/// endpoint. Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAiGenerator {
    model: String,
    max_tokens: u32,
    timeout_secs: u64,
}

impl OpenAiGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for openai provider"))?;

        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }

        Ok(Self {
            model,
            max_tokens: config.max_tokens,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(&self, system: &str, prompt: &str, temperature: f32) -> Result<String> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()?;

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt },
            ],
            "max_tokens": self.max_tokens,
            "temperature": temperature,
        });

        let response = client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("generation API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_completion_response(&json)
    }
}

/// Extract `choices[0].message.content` from the API response.
fn parse_completion_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|t| t.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("invalid generation response: missing message content"))
}

/// Create the configured [`Generator`].
pub fn create_generator(config: &GenerationConfig) -> Result<Box<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledGenerator)),
        "openai" => Ok(Box::new(OpenAiGenerator::new(config)?)),
        other => bail!("unknown generation provider: {}", other),
    }
}
