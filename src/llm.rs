//! Text-generation backends.
//!
//! The pipeline talks to a model through [`LanguageModel::complete`]: one
//! prompt in, one completion out. Two backends are provided:
//!
//! | `llm.provider` | Backend | Endpoint |
//! |----------------|---------|----------|
//! | `tgi` | [`TextGenInference`] | `POST {url}/generate` (Hugging Face text-generation-inference) |
//! | `openai` | [`OpenAiChat`] | `POST {url}/chat/completions`, key from `OPENAI_API_KEY` |

use anyhow::bail;
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::http::{self, Auth};

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Client for a text-generation-inference server.
pub struct TextGenInference {
    url: String,
    parameters: serde_json::Value,
    max_retries: u32,
    client: reqwest::Client,
}

impl TextGenInference {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        Ok(Self {
            url: config.url.trim_end_matches('/').to_string(),
            parameters: serde_json::json!({
                "max_new_tokens": config.max_new_tokens,
                "top_k": config.top_k,
                "top_p": config.top_p,
                "typical_p": config.typical_p,
                "temperature": config.temperature,
                "repetition_penalty": config.repetition_penalty,
            }),
            max_retries: config.max_retries,
            client: http::build_client(config.timeout_secs, false)?,
        })
    }
}

#[async_trait]
impl LanguageModel for TextGenInference {
    fn name(&self) -> &str {
        "tgi"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "inputs": prompt,
            "parameters": self.parameters,
        });
        let json = http::post_json(
            &self.client,
            "tgi",
            &format!("{}/generate", self.url),
            Auth::None,
            &body,
            self.max_retries,
        )
        .await?;
        parse_generated_text(&json)
    }
}

/// TGI answers `{"generated_text": ...}`; some deployments wrap it in a
/// one-element array.
fn parse_generated_text(json: &serde_json::Value) -> Result<String> {
    let object = match json {
        serde_json::Value::Array(items) => items.first(),
        other => Some(other),
    };
    object
        .and_then(|o| o.get("generated_text"))
        .and_then(|t| t.as_str())
        .map(|t| t.to_string())
        .ok_or_else(|| Error::invalid_response("tgi", "missing generated_text"))
}

/// Client for an OpenAI-compatible chat completions API. The prompt is
/// sent as a single user message.
pub struct OpenAiChat {
    url: String,
    model: String,
    api_key: String,
    max_tokens: u32,
    temperature: f64,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiChat {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        Ok(Self {
            url: config.url.trim_end_matches('/').to_string(),
            model,
            api_key,
            max_tokens: config.max_new_tokens,
            temperature: config.temperature,
            max_retries: config.max_retries,
            client: http::build_client(config.timeout_secs, false)?,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiChat {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });
        let json = http::post_json(
            &self.client,
            "openai chat",
            &format!("{}/chat/completions", self.url),
            Auth::Bearer(&self.api_key),
            &body,
            self.max_retries,
        )
        .await?;

        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(|c| c.to_string())
            .ok_or_else(|| Error::invalid_response("openai chat", "missing choices[0].message.content"))
    }
}

pub fn create_language_model(config: &LlmConfig) -> anyhow::Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "tgi" => Ok(Arc::new(TextGenInference::new(config)?)),
        "openai" => Ok(Arc::new(OpenAiChat::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_text_object_and_array() {
        let object = serde_json::json!({"generated_text": "Keywords: gas, prices"});
        assert_eq!(parse_generated_text(&object).unwrap(), "Keywords: gas, prices");

        let array = serde_json::json!([{"generated_text": "yes"}]);
        assert_eq!(parse_generated_text(&array).unwrap(), "yes");
    }

    #[test]
    fn test_generated_text_missing() {
        let err = parse_generated_text(&serde_json::json!([])).unwrap_err();
        assert_eq!(err.code(), "upstream_invalid_response");
        assert!(parse_generated_text(&serde_json::json!({"error": "overloaded"})).is_err());
    }

    #[test]
    fn test_tgi_parameters_follow_config() {
        let tgi = TextGenInference::new(&LlmConfig::default()).unwrap();
        assert_eq!(tgi.parameters["max_new_tokens"], 512);
        assert_eq!(tgi.parameters["top_k"], 10);
        assert_eq!(tgi.url, "http://localhost:8080");
    }
}
