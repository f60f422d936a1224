use super::{normalize, prompts};
use crate::cancel::Cancellation;
use crate::config::Model;
use crate::fields::{catalog, DocumentCategory, FieldMap, ReasonedField};
use crate::model::{
    CallOptions, ChatMessage, ModelClient, ModelFailure, ModelTransport, ResponseSchema,
};
use crate::util::truncate_chars;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

/// Fields as the model returned them, before normalization.
pub type RawFieldMap = BTreeMap<String, ReasonedField<Value>>;

#[derive(Debug, Clone)]
pub struct Extraction {
    pub fields: FieldMap,
    pub tokens: u32,
    pub attempts: u32,
    pub duration_ms: u64,
}

pub struct FieldExtractor<'a, T> {
    client: &'a ModelClient<T>,
    timeout: Duration,
    max_retries: u32,
    max_chars: usize,
}

impl<'a, T: ModelTransport> FieldExtractor<'a, T> {
    pub fn new(client: &'a ModelClient<T>, cfg: &Model) -> Self {
        Self {
            client,
            timeout: Duration::from_secs(cfg.extraction_timeout_seconds),
            max_retries: cfg.max_retries,
            max_chars: cfg.extraction_max_chars,
        }
    }

    pub async fn extract(
        &self,
        text: &str,
        category: DocumentCategory,
        cancel: &Cancellation,
    ) -> Result<Extraction, ModelFailure> {
        let schema = ResponseSchema::new(
            format!("{category}_invoice_fields"),
            catalog::extraction_schema(category),
        );
        let text = truncate_chars(text, self.max_chars);
        let messages = [
            ChatMessage::system(prompts::EXTRACTION_SYSTEM_PROMPT),
            ChatMessage::user(prompts::build_extraction_prompt(category, text)),
        ];
        let opts = CallOptions::new("extract", self.timeout, self.max_retries)
            .with_cancel(cancel.clone());

        let ok = self
            .client
            .call::<RawFieldMap>(&messages, &schema, &opts)
            .await
            .into_result()?;

        let returned = ok.data.len();
        let fields = normalize::normalize_fields(ok.data, category);
        if fields.len() < returned {
            warn!(
                %category,
                dropped = returned - fields.len(),
                "model returned fields outside the category schema"
            );
        }
        info!(
            %category,
            fields = fields.len(),
            attempts = ok.attempts,
            tokens = ok.usage.total_tokens,
            "fields extracted"
        );

        Ok(Extraction {
            fields,
            tokens: ok.usage.total_tokens,
            attempts: ok.attempts,
            duration_ms: ok.duration_ms,
        })
    }
}
