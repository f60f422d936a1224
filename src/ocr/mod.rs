pub mod http;

use crate::ingest::{DeliveryMode, NormalizedDocument};
use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::HttpOcrClient;

/// What the OCR engine is handed: the source URL to fetch itself, or the
/// normalized bytes inline.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "delivery", rename_all = "kebab-case")]
pub enum OcrInput {
    ByReference { url: String },
    InlineBase64 { payload: String, content_type: String },
}

impl OcrInput {
    pub fn from_document(doc: &NormalizedDocument) -> Self {
        match doc.delivery {
            DeliveryMode::ByReference => OcrInput::ByReference {
                url: doc.source.to_string(),
            },
            DeliveryMode::InlineBase64 => OcrInput::InlineBase64 {
                payload: base64::engine::general_purpose::STANDARD.encode(&doc.bytes),
                content_type: "application/pdf".into(),
            },
        }
    }

    pub fn delivery(&self) -> DeliveryMode {
        match self {
            OcrInput::ByReference { .. } => DeliveryMode::ByReference,
            OcrInput::InlineBase64 { .. } => DeliveryMode::InlineBase64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrOutput {
    pub text: String,
    pub pages: u32,
    #[serde(default)]
    pub duration_ms: u64,
}

impl OcrOutput {
    /// Empty or whitespace-only text is a terminal failure for the document.
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR engine is not configured: {0}")]
    NotConfigured(String),
    #[error("OCR transport failure: {0}")]
    Transport(String),
    #[error("OCR engine returned HTTP {status}")]
    Upstream { status: u16 },
    #[error("OCR response was not decodable: {0}")]
    Decode(String),
    #[error("OCR cancelled")]
    Cancelled,
}

impl OcrError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            OcrError::Upstream { status } => Some(*status),
            _ => None,
        }
    }
}

/// Opaque OCR capability.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn extract(&self, input: &OcrInput) -> Result<OcrOutput, OcrError>;
}
