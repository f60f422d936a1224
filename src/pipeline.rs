use crate::{
    cancel::Cancellation,
    confidence::{ConfidenceAggregator, ConfidenceScore},
    config::Config,
    extract::{FieldExtractor, TypeClassifier},
    fields::{Confidence, DocumentCategory, FieldMap, ReasonCode, ReasonedField},
    ingest::{DocumentFetcher, DocumentGuard, IngestError, NormalizedDocument},
    model::{ModelClient, ModelFailure, ModelTransport},
    ocr::{OcrEngine, OcrError, OcrInput},
    policy::{self, PolicyDecision},
    report::{self, JobReport, OcrReport, StageReport},
    util::{now_rfc3339, redact_url},
};
use anyhow::Result;
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};
use unicode_normalization::UnicodeNormalization;

/// Name under which the classified category appears in serialized field maps.
pub const DOCUMENT_TYPE_FIELD: &str = "document_type";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Ocr(#[from] OcrError),
    #[error("OCR returned no text")]
    EmptyOcrText,
    #[error("classification failed: {0}")]
    Classification(ModelFailure),
    #[error("extraction failed: {0}")]
    Extraction(ModelFailure),
}

impl PipelineError {
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Ingest(_) => "ingest",
            PipelineError::Ocr(_) | PipelineError::EmptyOcrText => "ocr",
            PipelineError::Classification(_) => "classification",
            PipelineError::Extraction(_) => "extraction",
        }
    }

    /// Operator-facing error category.
    pub fn category(&self) -> &'static str {
        match self {
            PipelineError::Ingest(e) => e.kind(),
            PipelineError::Ocr(OcrError::Cancelled) => "cancelled",
            PipelineError::Ocr(_) => "ocr",
            PipelineError::EmptyOcrText => "empty_ocr_text",
            PipelineError::Classification(f) | PipelineError::Extraction(f) => f.category.as_str(),
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            PipelineError::Ingest(e) => e.status_code(),
            PipelineError::Ocr(e) => e.status_code(),
            PipelineError::EmptyOcrText => None,
            PipelineError::Classification(f) | PipelineError::Extraction(f) => f.status_code,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokensUsed {
    pub classification: u32,
    pub extraction: u32,
}

/// Finished extraction for one document.
///
/// The category is kept apart from `fields` and only flattened into the field
/// map as [`DOCUMENT_TYPE_FIELD`] when serialized.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub category: DocumentCategory,
    pub fields: FieldMap,
    pub tokens_used: TokensUsed,
    pub overall_confidence: f64,
    pub per_field_confidence: BTreeMap<String, f64>,
}

impl ExtractionResult {
    pub fn new(
        category: DocumentCategory,
        fields: FieldMap,
        tokens_used: TokensUsed,
        score: &ConfidenceScore,
    ) -> Self {
        Self {
            category,
            fields,
            tokens_used,
            overall_confidence: score.overall,
            per_field_confidence: score.per_field.clone(),
        }
    }
}

impl Serialize for ExtractionResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut st = serializer.serialize_struct("ExtractionResult", 5)?;
        st.serialize_field("category", &self.category)?;
        st.serialize_field(
            "fields",
            &FieldsWithType {
                category: self.category,
                fields: &self.fields,
            },
        )?;
        st.serialize_field("tokens_used", &self.tokens_used)?;
        st.serialize_field("overall_confidence", &self.overall_confidence)?;
        st.serialize_field("per_field_confidence", &self.per_field_confidence)?;
        st.end()
    }
}

struct FieldsWithType<'a> {
    category: DocumentCategory,
    fields: &'a FieldMap,
}

impl Serialize for FieldsWithType<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let document_type = ReasonedField::new(Some(self.category), Confidence::High)
            .with_reason(ReasonCode::ExplicitLabel)
            .with_reasoning("determined by the classification stage");
        let mut map = serializer.serialize_map(Some(self.fields.len() + 1))?;
        map.serialize_entry(DOCUMENT_TYPE_FIELD, &document_type)?;
        for (name, field) in self.fields {
            map.serialize_entry(name, field)?;
        }
        map.end()
    }
}

/// Result of running the two extraction stages over text.
#[derive(Debug, Clone)]
pub struct TextOutcome {
    pub result: ExtractionResult,
    pub score: ConfidenceScore,
    pub decision: PolicyDecision,
    pub classification: StageReport,
    pub extraction: StageReport,
}

/// Text in, scored fields out: classification, extraction, aggregation.
pub struct TextPipeline<T: ModelTransport> {
    cfg: Config,
    client: ModelClient<T>,
    aggregator: ConfidenceAggregator,
}

impl<T: ModelTransport> TextPipeline<T> {
    pub fn new(cfg: &Config, transport: T) -> Result<Self> {
        Ok(Self {
            cfg: cfg.clone(),
            client: ModelClient::from_config(transport, &cfg.model),
            aggregator: ConfidenceAggregator::from_config(&cfg.scoring)?,
        })
    }

    pub fn aggregator(&self) -> &ConfidenceAggregator {
        &self.aggregator
    }

    pub async fn classify(
        &self,
        text: &str,
        cancel: &Cancellation,
    ) -> Result<DocumentCategory, PipelineError> {
        TypeClassifier::new(&self.client, &self.cfg.model)
            .classify(text, cancel)
            .await
            .map(|c| c.category)
            .map_err(PipelineError::Classification)
    }

    pub async fn extract_text(
        &self,
        text: &str,
        cancel: &Cancellation,
    ) -> Result<TextOutcome, PipelineError> {
        let classification = TypeClassifier::new(&self.client, &self.cfg.model)
            .classify(text, cancel)
            .await
            .map_err(PipelineError::Classification)?;
        let category = classification.category;

        let extraction = FieldExtractor::new(&self.client, &self.cfg.model)
            .extract(text, category, cancel)
            .await
            .map_err(PipelineError::Extraction)?;

        let score = self.aggregator.score(&extraction.fields, category);
        let decision = policy::decide(&self.cfg.scoring, &score);
        info!(
            %category,
            overall = score.overall,
            missing = score.missing_required.len(),
            gate = ?decision.gate,
            "extraction scored"
        );

        let tokens_used = TokensUsed {
            classification: classification.tokens,
            extraction: extraction.tokens,
        };
        Ok(TextOutcome {
            result: ExtractionResult::new(category, extraction.fields, tokens_used, &score),
            score,
            decision,
            classification: StageReport {
                attempts: classification.attempts,
                tokens: classification.tokens,
                duration_ms: classification.duration_ms,
            },
            extraction: StageReport {
                attempts: extraction.attempts,
                tokens: extraction.tokens,
                duration_ms: extraction.duration_ms,
            },
        })
    }
}

pub struct JobOutput {
    pub result: ExtractionResult,
    pub report: JobReport,
    pub document: NormalizedDocument,
}

/// URL in, report out: guard, OCR, then the text pipeline.
pub struct Pipeline<F: DocumentFetcher, T: ModelTransport, O: OcrEngine> {
    cfg: Config,
    guard: DocumentGuard<F>,
    ocr: O,
    text: TextPipeline<T>,
}

impl<F: DocumentFetcher, T: ModelTransport, O: OcrEngine> Pipeline<F, T, O> {
    pub fn new(cfg: &Config, fetcher: F, transport: T, ocr: O) -> Result<Self> {
        Ok(Self {
            cfg: cfg.clone(),
            guard: DocumentGuard::new(&cfg.ingest, fetcher),
            ocr,
            text: TextPipeline::new(cfg, transport)?,
        })
    }

    pub async fn run_job(
        &self,
        url: &str,
        cancel: &Cancellation,
    ) -> Result<JobOutput, PipelineError> {
        let started = Instant::now();
        let started_at = now_rfc3339();

        let document = self.guard.fetch_and_normalize_with(url, cancel).await?;
        let source = redact_url(&document.source);
        let job_id = report::job_id(&self.cfg.normalized_for_hash(), &source);
        info!(job_id = %job_id, source = %source, sha256 = %document.sha256, "document accepted");

        let input = OcrInput::from_document(&document);
        let ocr_started = Instant::now();
        let ocr = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OcrError::Cancelled.into()),
            r = self.ocr.extract(&input) => r?,
        };
        if !ocr.has_text() {
            warn!(job_id = %job_id, pages = ocr.pages, "OCR text is empty");
            return Err(PipelineError::EmptyOcrText);
        }
        let ocr_duration_ms = if ocr.duration_ms > 0 {
            ocr.duration_ms
        } else {
            ocr_started.elapsed().as_millis() as u64
        };
        let text = if self.cfg.ocr.normalize_unicode {
            ocr.text.nfkc().collect::<String>()
        } else {
            ocr.text
        };
        info!(
            job_id = %job_id,
            pages = ocr.pages,
            chars = text.chars().count(),
            duration_ms = ocr_duration_ms,
            "OCR complete"
        );

        let outcome = self.text.extract_text(&text, cancel).await?;

        let report = JobReport {
            job_id,
            job_name: self.cfg.global.job_name.clone(),
            source,
            started_at,
            finished_at: now_rfc3339(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            ingest: document.summary(),
            ocr: OcrReport {
                delivery: input.delivery(),
                pages: ocr.pages,
                chars: text.chars().count(),
                duration_ms: ocr_duration_ms,
            },
            category: outcome.result.category,
            classification: outcome.classification,
            extraction: outcome.extraction,
            tokens_used: outcome.result.tokens_used,
            overall_confidence: outcome.score.overall,
            decision: outcome.decision,
        };

        Ok(JobOutput {
            result: outcome.result,
            report,
            document,
        })
    }
}
