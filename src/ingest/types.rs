use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid document URL: {0}")]
    InvalidUrl(String),
    #[error("URL scheme not allowed: {0}")]
    InvalidScheme(String),
    #[error("host not allowed: {0}")]
    HostNotAllowed(String),
    #[error("document exceeds {limit} bytes (declared: {declared:?})")]
    PayloadTooLarge { limit: u64, declared: Option<u64> },
    #[error("more than {0} redirects")]
    TooManyRedirects(usize),
    #[error("upstream returned HTTP {status_code}")]
    UpstreamError { status_code: u16 },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("document fetch cancelled")]
    Cancelled,
}

impl IngestError {
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::InvalidUrl(_) => "invalid_url",
            IngestError::InvalidScheme(_) => "invalid_scheme",
            IngestError::HostNotAllowed(_) => "host_not_allowed",
            IngestError::PayloadTooLarge { .. } => "payload_too_large",
            IngestError::TooManyRedirects(_) => "too_many_redirects",
            IngestError::UpstreamError { .. } => "upstream_error",
            IngestError::Transport(_) => "transport",
            IngestError::Cancelled => "cancelled",
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            IngestError::UpstreamError { status_code } => Some(*status_code),
            _ => None,
        }
    }
}

/// How the OCR collaborator should receive the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryMode {
    /// OCR fetches the source URL itself; the bytes there are already valid.
    ByReference,
    /// OCR receives the normalized bytes base64-encoded.
    InlineBase64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Repair {
    GzipUnwrapped { compressed_bytes: usize },
    EnvelopeStripped { offset: usize },
    Passthrough,
}

#[derive(Debug, Clone)]
pub struct NormalizedDocument {
    pub source: Url,
    pub bytes: Vec<u8>,
    pub delivery: DeliveryMode,
    /// Declared content type or URL extension matched the expected format.
    pub content_verified: bool,
    pub content_type: Option<String>,
    pub repairs: Vec<Repair>,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSummary {
    pub source: String,
    pub bytes: usize,
    pub sha256: String,
    pub delivery: DeliveryMode,
    pub content_verified: bool,
    pub content_type: Option<String>,
    pub repairs: Vec<Repair>,
}

impl NormalizedDocument {
    pub fn summary(&self) -> IngestSummary {
        IngestSummary {
            source: crate::util::redact_url(&self.source),
            bytes: self.bytes.len(),
            sha256: self.sha256.clone(),
            delivery: self.delivery,
            content_verified: self.content_verified,
            content_type: self.content_type.clone(),
            repairs: self.repairs.clone(),
        }
    }
}
