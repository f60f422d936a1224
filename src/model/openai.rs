use super::{ChatMessage, ModelTransport, RawCompletion, ResponseSchema, TokenUsage, TransportError};
use crate::config::Model;
use crate::util::preview;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

/// Chat-completions transport with `json_schema` structured output.
pub struct OpenAiTransport {
    client: Client,
    endpoint: String,
    provider: String,
    model: String,
    api_key: String,
    temperature: f32,
    preview_chars: usize,
}

impl OpenAiTransport {
    /// Reads the API key from the environment variable named in config.
    pub fn from_config(cfg: &Model) -> Result<Self> {
        let api_key = std::env::var(&cfg.api_key_env)
            .with_context(|| format!("environment variable {} is not set", cfg.api_key_env))?;
        if api_key.trim().is_empty() {
            bail!("environment variable {} is empty", cfg.api_key_env);
        }
        Self::new(cfg, api_key)
    }

    pub fn new(cfg: &Model, api_key: String) -> Result<Self> {
        // Per-attempt deadlines are enforced by the caller.
        let client = Client::builder()
            .build()
            .with_context(|| "building model HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", cfg.base_url.trim_end_matches('/')),
            provider: cfg.provider.clone(),
            model: cfg.model.clone(),
            api_key,
            temperature: cfg.temperature,
            preview_chars: cfg.log_preview_chars,
        })
    }
}

#[derive(Deserialize)]
struct CompletionEnvelope {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

#[async_trait]
impl ModelTransport for OpenAiTransport {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        schema: &ResponseSchema,
    ) -> Result<RawCompletion, TransportError> {
        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": messages,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "strict": true,
                    "schema": schema.schema,
                }
            }
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        let text = resp.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(TransportError::status(
                status.as_u16(),
                format!("HTTP {}: {}", status.as_u16(), preview(&text, self.preview_chars)),
            ));
        }

        let envelope: CompletionEnvelope = serde_json::from_str(&text)
            .map_err(|e| TransportError::decode(format!("completion envelope: {e}")))?;
        let usage = envelope
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();
        let Some(choice) = envelope.choices.into_iter().next() else {
            return Err(TransportError::decode("completion has no choices"));
        };

        match (choice.message.content, choice.message.refusal) {
            (Some(content), _) => Ok(RawCompletion { content, usage }),
            // A refusal is a reply that fails the schema, not a transport fault.
            (None, Some(refusal)) => Ok(RawCompletion {
                content: refusal,
                usage,
            }),
            (None, None) => Err(TransportError::decode("completion has no content")),
        }
    }
}

fn transport_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::timeout()
    } else {
        TransportError::connect(e.without_url().to_string())
    }
}
