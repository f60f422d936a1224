//! Reasoned field values and the closed enums that describe them.

pub mod catalog;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub use catalog::FieldSpec;

/// Extracted fields keyed by field name. Ordered so reports diff cleanly.
pub type FieldMap = BTreeMap<String, ReasonedField<FieldValue>>;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum DocumentCategory {
    General,
    Insurance,
    Utility,
    Tax,
}

impl DocumentCategory {
    pub const ALL: [DocumentCategory; 4] = [
        DocumentCategory::General,
        DocumentCategory::Insurance,
        DocumentCategory::Utility,
        DocumentCategory::Tax,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentCategory::General => "general",
            DocumentCategory::Insurance => "insurance",
            DocumentCategory::Utility => "utility",
            DocumentCategory::Tax => "tax",
        }
    }
}

impl fmt::Display for DocumentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        DocumentCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown document category: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }
}

/// Why a value was given its confidence level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    ExplicitLabel,
    NearbyHeader,
    InferredLayout,
    Conflict,
    Missing,
}

impl ReasonCode {
    pub const ALL: [ReasonCode; 5] = [
        ReasonCode::ExplicitLabel,
        ReasonCode::NearbyHeader,
        ReasonCode::InferredLayout,
        ReasonCode::Conflict,
        ReasonCode::Missing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::ExplicitLabel => "explicit_label",
            ReasonCode::NearbyHeader => "nearby_header",
            ReasonCode::InferredLayout => "inferred_layout",
            ReasonCode::Conflict => "conflict",
            ReasonCode::Missing => "missing",
        }
    }
}

/// Shape of the value a field carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Amount,
    Date,
    Identifier,
    Text,
    Boolean,
}

/// Semantic class that decides a field's weight in the overall score.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum WeightClass {
    Amount,
    Date,
    Identifier,
    Address,
    Name,
    ValidationFlag,
    Default,
}

/// A normalized field value.
///
/// Serializes as the bare JSON scalar. An amount field whose model output was
/// not numeric keeps its text in [`FieldValue::Text`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Amount(f64),
    Date(String),
    Identifier(String),
    Text(String),
    Boolean(bool),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Amount(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Date(s) | FieldValue::Identifier(s) | FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// A value wrapped with its extraction confidence and rationale.
///
/// `value` may be `None` at any confidence: a high-confidence `None` means the
/// document explicitly has no such value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasonedField<T> {
    #[serde(default)]
    pub value: Option<T>,
    pub confidence: Confidence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<ReasonCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assumptions: Vec<String>,
}

impl<T> ReasonedField<T> {
    pub fn new(value: Option<T>, confidence: Confidence) -> Self {
        Self {
            value,
            confidence,
            reason_code: None,
            evidence_snippet: None,
            reasoning: None,
            assumptions: Vec::new(),
        }
    }

    pub fn with_reason(mut self, reason: ReasonCode) -> Self {
        self.reason_code = Some(reason);
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    /// Replace the value, keeping confidence and rationale.
    pub fn map_value<U>(self, f: impl FnOnce(T) -> Option<U>) -> ReasonedField<U> {
        ReasonedField {
            value: self.value.and_then(f),
            confidence: self.confidence,
            reason_code: self.reason_code,
            evidence_snippet: self.evidence_snippet,
            reasoning: self.reasoning,
            assumptions: self.assumptions,
        }
    }
}
