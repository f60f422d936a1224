use crate::{
    fields::DocumentCategory,
    ingest::{DeliveryMode, IngestSummary},
    pipeline::TokensUsed,
    policy::PolicyDecision,
    util::sha256_hex,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: String,
    pub job_name: String,
    pub source: String,
    pub started_at: String,
    pub finished_at: String,
    pub elapsed_ms: u64,
    pub ingest: IngestSummary,
    pub ocr: OcrReport,
    pub category: DocumentCategory,
    pub classification: StageReport,
    pub extraction: StageReport,
    pub tokens_used: TokensUsed,
    pub overall_confidence: f64,
    pub decision: PolicyDecision,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrReport {
    pub delivery: DeliveryMode,
    pub pages: u32,
    pub chars: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StageReport {
    pub attempts: u32,
    pub tokens: u32,
    pub duration_ms: u64,
}

/// Stable id for a (config, source) pair; the source must already be redacted.
pub fn job_id(config_hash_input: &str, source: &str) -> String {
    let digest = sha256_hex(format!("{config_hash_input}\n{source}").as_bytes());
    digest[..16].to_string()
}
