#![allow(dead_code)]

use async_trait::async_trait;
use invoice_extract::{
    ingest::{DeliveryMode, DocumentFetcher, FetchError, FetchResponse},
    model::{ChatMessage, ModelTransport, RawCompletion, ResponseSchema, TokenUsage, TransportError},
    ocr::{OcrEngine, OcrError, OcrInput, OcrOutput},
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;

pub const TOKENS_PER_CALL: u32 = 15;

pub fn pdf_bytes(len: usize) -> Vec<u8> {
    let mut out = b"%PDF-1.7\n".to_vec();
    out.resize(len.max(out.len()), b'x');
    out
}

/// One reasoned field as the model would return it.
pub fn field(value: Value, confidence: &str, reason: &str) -> Value {
    json!({
        "value": value,
        "confidence": confidence,
        "reason_code": reason,
        "evidence_snippet": null,
        "reasoning": null,
        "assumptions": [],
    })
}

pub fn classification(category: &str) -> Reply {
    Reply::Json(json!({ "category": category }).to_string())
}

// ---- model transport ------------------------------------------------------

pub enum Reply {
    Json(String),
    Status(u16),
    Connect,
    Hang,
}

pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    calls: Arc<AtomicUsize>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: Arc::new(AtomicUsize::new(0)),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    /// User messages seen, in call order.
    pub fn prompt_log(&self) -> Arc<Mutex<Vec<String>>> {
        self.prompts.clone()
    }
}

#[async_trait]
impl ModelTransport for ScriptedTransport {
    fn provider(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "test-model"
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        _schema: &ResponseSchema,
    ) -> Result<RawCompletion, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(last) = messages.last() {
            self.prompts.lock().unwrap().push(last.content.clone());
        }
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Status(500));
        match reply {
            Reply::Json(content) => Ok(RawCompletion {
                content,
                usage: TokenUsage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: TOKENS_PER_CALL,
                },
            }),
            Reply::Status(code) => Err(TransportError::status(code, format!("HTTP {code}"))),
            Reply::Connect => Err(TransportError::connect("connection reset")),
            Reply::Hang => std::future::pending().await,
        }
    }
}

// ---- document fetcher -----------------------------------------------------

pub struct ScriptedResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub chunks: VecDeque<Vec<u8>>,
    pub chunks_read: Arc<AtomicUsize>,
}

impl ScriptedResponse {
    pub fn ok(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_length: Some(body.len() as u64),
            content_type: Some("application/pdf".into()),
            chunks: body.chunks(4096).map(<[u8]>::to_vec).collect(),
            chunks_read: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn status(code: u16) -> Self {
        Self {
            status: code,
            content_length: Some(0),
            content_type: None,
            chunks: VecDeque::new(),
            chunks_read: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn undeclared(mut self) -> Self {
        self.content_length = None;
        self
    }

    pub fn declared(mut self, len: u64) -> Self {
        self.content_length = Some(len);
        self
    }

    pub fn content_type(mut self, ct: Option<&str>) -> Self {
        self.content_type = ct.map(str::to_string);
        self
    }
}

#[async_trait]
impl FetchResponse for ScriptedResponse {
    fn status(&self) -> u16 {
        self.status
    }

    fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    fn content_type(&self) -> Option<String> {
        self.content_type.clone()
    }

    async fn chunk(&mut self) -> Result<Option<Vec<u8>>, FetchError> {
        let next = self.chunks.pop_front();
        if next.is_some() {
            self.chunks_read.fetch_add(1, Ordering::SeqCst);
        }
        Ok(next)
    }
}

pub struct ScriptedFetcher {
    responses: Mutex<VecDeque<Result<ScriptedResponse, FetchError>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedFetcher {
    pub fn new(responses: Vec<ScriptedResponse>) -> Self {
        Self::with_results(responses.into_iter().map(Ok).collect())
    }

    pub fn with_results(responses: Vec<Result<ScriptedResponse, FetchError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl DocumentFetcher for ScriptedFetcher {
    async fn fetch(&self, _url: &Url) -> Result<Box<dyn FetchResponse>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ScriptedResponse::status(500)));
        next.map(|r| Box::new(r) as Box<dyn FetchResponse>)
    }
}

// ---- OCR ------------------------------------------------------------------

pub struct StaticOcr {
    text: String,
    pages: u32,
    deliveries: Arc<Mutex<Vec<DeliveryMode>>>,
}

impl StaticOcr {
    pub fn new(text: &str, pages: u32) -> Self {
        Self {
            text: text.to_string(),
            pages,
            deliveries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn deliveries(&self) -> Arc<Mutex<Vec<DeliveryMode>>> {
        self.deliveries.clone()
    }
}

#[async_trait]
impl OcrEngine for StaticOcr {
    async fn extract(&self, input: &OcrInput) -> Result<OcrOutput, OcrError> {
        self.deliveries.lock().unwrap().push(input.delivery());
        Ok(OcrOutput {
            text: self.text.clone(),
            pages: self.pages,
            duration_ms: 120,
        })
    }
}
