use super::prompts;
use crate::cancel::Cancellation;
use crate::config::Model;
use crate::fields::DocumentCategory;
use crate::model::{
    CallOptions, ChatMessage, ModelClient, ModelFailure, ModelTransport, ResponseSchema,
};
use crate::util::truncate_chars;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

/// Stage-one response: one value of the closed category enum.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ClassificationResponse {
    pub category: DocumentCategory,
}

impl ClassificationResponse {
    pub fn schema() -> ResponseSchema {
        let mut schema = schemars::schema_for!(ClassificationResponse);
        schema.remove("$schema");
        ResponseSchema::new("document_classification", schema.to_value())
    }
}

#[derive(Debug, Clone)]
pub struct Classification {
    pub category: DocumentCategory,
    pub tokens: u32,
    pub attempts: u32,
    pub duration_ms: u64,
}

pub struct TypeClassifier<'a, T> {
    client: &'a ModelClient<T>,
    schema: ResponseSchema,
    timeout: Duration,
    max_retries: u32,
    max_chars: usize,
}

impl<'a, T: ModelTransport> TypeClassifier<'a, T> {
    pub fn new(client: &'a ModelClient<T>, cfg: &Model) -> Self {
        Self {
            client,
            schema: ClassificationResponse::schema(),
            timeout: Duration::from_secs(cfg.classification_timeout_seconds),
            max_retries: cfg.max_retries,
            max_chars: cfg.classification_max_chars,
        }
    }

    /// Failure is final: there is no default category to fall back to.
    pub async fn classify(
        &self,
        text: &str,
        cancel: &Cancellation,
    ) -> Result<Classification, ModelFailure> {
        let messages = [
            ChatMessage::system(prompts::CLASSIFICATION_SYSTEM_PROMPT),
            ChatMessage::user(prompts::build_classification_prompt(truncate_chars(
                text,
                self.max_chars,
            ))),
        ];
        let opts = CallOptions::new("classify", self.timeout, self.max_retries)
            .with_cancel(cancel.clone());

        let ok = self
            .client
            .call::<ClassificationResponse>(&messages, &self.schema, &opts)
            .await
            .into_result()?;

        info!(
            category = %ok.data.category,
            attempts = ok.attempts,
            tokens = ok.usage.total_tokens,
            "document classified"
        );
        Ok(Classification {
            category: ok.data.category,
            tokens: ok.usage.total_tokens,
            attempts: ok.attempts,
            duration_ms: ok.duration_ms,
        })
    }
}
