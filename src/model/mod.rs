//! Single-call structured-generation client.
//!
//! Every attempt is time-boxed and categorized. Only quota, timeout and
//! server failures are retried, on an escalating backoff with jitter. A reply
//! that does not deserialize gets one textual repair pass against the same
//! response; the model is never re-invoked for it.

pub mod openai;
pub mod repair;
pub mod types;

use crate::config::Model;
use crate::util::preview;
use async_trait::async_trait;
use rand::Rng;
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub use openai::OpenAiTransport;
pub use types::{
    CallOptions, ChatMessage, ErrorCategory, ModelCallOutcome, ModelFailure, ModelSuccess,
    RawCompletion, ResponseSchema, Role, TokenUsage, TransportError, TransportErrorKind,
};

/// The provider endpoint. Implementations perform exactly one request.
#[async_trait]
pub trait ModelTransport: Send + Sync {
    fn provider(&self) -> &str;
    fn model(&self) -> &str;
    async fn complete(
        &self,
        messages: &[ChatMessage],
        schema: &ResponseSchema,
    ) -> Result<RawCompletion, TransportError>;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    backoff: Vec<Duration>,
    jitter: Duration,
}

impl RetryPolicy {
    pub fn new(backoff: Vec<Duration>, jitter: Duration) -> Self {
        Self { backoff, jitter }
    }

    pub fn from_config(cfg: &Model) -> Self {
        Self::new(
            cfg.backoff_ms.iter().copied().map(Duration::from_millis).collect(),
            Duration::from_millis(cfg.jitter_ms),
        )
    }

    /// Fixed schedule delay for the `retry`-th retry (1-based), capped at the
    /// last entry, plus up to `jitter`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let idx = (retry.max(1) as usize - 1).min(self.backoff.len().saturating_sub(1));
        let base = self.backoff.get(idx).copied().unwrap_or_default();
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_ms)
        };
        base + Duration::from_millis(jitter)
    }
}

#[derive(Debug)]
struct AttemptError {
    category: ErrorCategory,
    status_code: Option<u16>,
    message: String,
}

impl AttemptError {
    fn new(category: ErrorCategory, status_code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            category,
            status_code,
            message: message.into(),
        }
    }
}

pub struct ModelClient<T> {
    transport: T,
    retry: RetryPolicy,
    preview_chars: usize,
}

impl<T: ModelTransport> ModelClient<T> {
    pub fn new(transport: T, retry: RetryPolicy, preview_chars: usize) -> Self {
        Self {
            transport,
            retry,
            preview_chars,
        }
    }

    pub fn from_config(transport: T, cfg: &Model) -> Self {
        Self::new(transport, RetryPolicy::from_config(cfg), cfg.log_preview_chars)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn call<R: DeserializeOwned>(
        &self,
        messages: &[ChatMessage],
        schema: &ResponseSchema,
        opts: &CallOptions,
    ) -> ModelCallOutcome<R> {
        let started = Instant::now();
        let max_attempts = opts.max_retries.saturating_add(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let attempt_started = Instant::now();
            let result = self.attempt::<R>(messages, schema, opts).await;
            let duration_ms = attempt_started.elapsed().as_millis() as u64;

            let err = match result {
                Ok((data, usage)) => {
                    info!(
                        provider = self.transport.provider(),
                        model = self.transport.model(),
                        call = opts.label,
                        attempt,
                        outcome = "success",
                        duration_ms,
                        total_tokens = usage.total_tokens,
                        "model attempt"
                    );
                    return ModelCallOutcome::Success(ModelSuccess {
                        data,
                        usage,
                        duration_ms: started.elapsed().as_millis() as u64,
                        attempts: attempt,
                    });
                }
                Err(err) => err,
            };

            warn!(
                provider = self.transport.provider(),
                model = self.transport.model(),
                call = opts.label,
                attempt,
                outcome = %err.category,
                status = ?err.status_code,
                duration_ms,
                error = %preview(&err.message, self.preview_chars),
                "model attempt"
            );

            if !err.category.is_retryable() || attempt >= max_attempts {
                return ModelCallOutcome::Failure(ModelFailure {
                    category: err.category,
                    status_code: err.status_code,
                    message: preview(&err.message, self.preview_chars.max(160)),
                    duration_ms: started.elapsed().as_millis() as u64,
                    attempts: attempt,
                });
            }

            let delay = self.retry.delay_for(attempt);
            debug!(call = opts.label, attempt, delay_ms = delay.as_millis() as u64, "backing off");
            tokio::select! {
                biased;
                _ = opts.cancel.cancelled() => {
                    return ModelCallOutcome::Failure(ModelFailure {
                        category: ErrorCategory::Cancelled,
                        status_code: None,
                        message: "cancelled during backoff".into(),
                        duration_ms: started.elapsed().as_millis() as u64,
                        attempts: attempt,
                    });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn attempt<R: DeserializeOwned>(
        &self,
        messages: &[ChatMessage],
        schema: &ResponseSchema,
        opts: &CallOptions,
    ) -> Result<(R, TokenUsage), AttemptError> {
        let request = tokio::time::timeout(opts.timeout, self.transport.complete(messages, schema));
        let raw = tokio::select! {
            biased;
            _ = opts.cancel.cancelled() => {
                return Err(AttemptError::new(ErrorCategory::Cancelled, None, "cancelled"));
            }
            r = request => match r {
                Ok(Ok(raw)) => raw,
                Ok(Err(e)) => return Err(categorize(e)),
                Err(_) => {
                    return Err(AttemptError::new(
                        ErrorCategory::Timeout,
                        None,
                        format!("no response within {}ms", opts.timeout.as_millis()),
                    ));
                }
            },
        };

        let data = self.parse_structured::<R>(&raw.content, opts.label)?;
        Ok((data, raw.usage))
    }

    fn parse_structured<R: DeserializeOwned>(
        &self,
        content: &str,
        label: &str,
    ) -> Result<R, AttemptError> {
        let first = match serde_json::from_str::<R>(content) {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };

        let schema_error = |message: String| {
            AttemptError::new(ErrorCategory::SchemaValidation, None, message)
        };

        let Some(repaired) = repair::repair_json(content) else {
            debug!(
                call = label,
                response_preview = %preview(content, self.preview_chars),
                "structured output unrecoverable"
            );
            return Err(schema_error(format!("response is not JSON: {first}")));
        };

        match serde_json::from_str::<R>(&repaired) {
            Ok(v) => {
                warn!(call = label, error = %first, "repaired malformed structured output");
                Ok(v)
            }
            Err(second) => {
                debug!(
                    call = label,
                    response_preview = %preview(content, self.preview_chars),
                    "structured output failed validation after repair"
                );
                Err(schema_error(format!("{first}; after repair: {second}")))
            }
        }
    }
}

fn categorize(e: TransportError) -> AttemptError {
    match e.kind {
        TransportErrorKind::Status(code) => {
            AttemptError::new(ErrorCategory::from_status(code), Some(code), e.message)
        }
        TransportErrorKind::Timeout => AttemptError::new(ErrorCategory::Timeout, None, e.message),
        TransportErrorKind::Connect | TransportErrorKind::Decode => {
            AttemptError::new(ErrorCategory::Server, None, e.message)
        }
    }
}
