//! Confidence aggregation for extracted invoice fields.
//!
//! Per-field scores come from the model's confidence level adjusted by the
//! reason code. The overall score is a weighted mean over the category's
//! required fields only; optional fields are scored but never move it.

use crate::config::{parse_weight_class, Scoring};
use crate::fields::{
    catalog, Confidence, DocumentCategory, FieldMap, ReasonCode, ReasonedField, WeightClass,
};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{debug, warn};

const HIGH: f64 = 0.9;
const MEDIUM: f64 = 0.6;
const LOW: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceScore {
    pub overall: f64,
    pub per_field: BTreeMap<String, f64>,
    /// Required fields absent from the extraction or reported missing, in
    /// required-set order.
    pub missing_required: Vec<String>,
}

/// Weight per semantic field class.
#[derive(Debug, Clone)]
pub struct CategoryWeights {
    weights: BTreeMap<WeightClass, f64>,
}

impl CategoryWeights {
    pub fn new(weights: BTreeMap<WeightClass, f64>) -> Self {
        Self { weights }
    }

    pub fn from_config(raw: &BTreeMap<String, f64>) -> Result<Self> {
        let weights = raw
            .iter()
            .map(|(k, v)| Ok((parse_weight_class(k)?, *v)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        Ok(Self { weights })
    }

    /// Classes without an explicit weight use the `default` class weight, or
    /// 1.0 when that is unset too.
    pub fn weight(&self, class: WeightClass) -> f64 {
        self.weights
            .get(&class)
            .or_else(|| self.weights.get(&WeightClass::Default))
            .copied()
            .unwrap_or(1.0)
    }
}

impl Default for CategoryWeights {
    fn default() -> Self {
        Self::from_config(&Scoring::default().weights).unwrap_or_else(|_| Self {
            weights: BTreeMap::new(),
        })
    }
}

/// Fields whose absence penalizes the overall score, per category.
#[derive(Debug, Clone)]
pub struct RequiredFieldSets {
    sets: BTreeMap<DocumentCategory, Vec<String>>,
}

impl RequiredFieldSets {
    pub fn new(sets: BTreeMap<DocumentCategory, Vec<String>>) -> Self {
        Self { sets }
    }

    pub fn from_config(raw: &BTreeMap<String, Vec<String>>) -> Result<Self> {
        let sets = raw
            .iter()
            .map(|(k, v)| {
                let category = DocumentCategory::from_str(k).map_err(|e| anyhow!(e))?;
                Ok((category, v.clone()))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;
        Ok(Self { sets })
    }

    /// Required set for `category`.
    ///
    /// Validated configs list every category, so the `general` fallback only
    /// triggers for hand-built tables.
    pub fn for_category(&self, category: DocumentCategory) -> &[String] {
        if let Some(set) = self.sets.get(&category) {
            return set;
        }
        warn!(%category, "no required-field set for category; using general");
        self.sets
            .get(&DocumentCategory::General)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl Default for RequiredFieldSets {
    fn default() -> Self {
        Self::new(catalog::default_required_fields())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfidenceAggregator {
    weights: CategoryWeights,
    required: RequiredFieldSets,
}

impl ConfidenceAggregator {
    pub fn new(weights: CategoryWeights, required: RequiredFieldSets) -> Self {
        Self { weights, required }
    }

    pub fn from_config(scoring: &Scoring) -> Result<Self> {
        Ok(Self::new(
            CategoryWeights::from_config(&scoring.weights)?,
            RequiredFieldSets::from_config(&scoring.required_fields)?,
        ))
    }

    pub fn required_fields(&self, category: DocumentCategory) -> &[String] {
        self.required.for_category(category)
    }

    pub fn score(&self, fields: &FieldMap, category: DocumentCategory) -> ConfidenceScore {
        let mut per_field: BTreeMap<String, f64> = fields
            .iter()
            .map(|(name, field)| (name.clone(), field_score(Some(field))))
            .collect();

        let required = self.required.for_category(category);
        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        let mut missing_required = Vec::new();

        for name in required {
            let weight = self.weights.weight(weight_class_of(name));
            let score = match fields.get(name) {
                Some(field) if !is_reported_missing(field) => field_score(Some(field)),
                _ => {
                    missing_required.push(name.clone());
                    per_field.insert(name.clone(), 0.0);
                    0.0
                }
            };
            weighted += weight * score;
            total_weight += weight;
        }

        let overall = if total_weight > 0.0 {
            (weighted / total_weight).clamp(0.0, 1.0)
        } else {
            0.0
        };

        debug!(
            %category,
            required = required.len(),
            missing = missing_required.len(),
            overall,
            "computed confidence score"
        );

        ConfidenceScore {
            overall,
            per_field,
            missing_required,
        }
    }
}

pub fn base_score(confidence: Confidence) -> f64 {
    match confidence {
        Confidence::High => HIGH,
        Confidence::Medium => MEDIUM,
        Confidence::Low => LOW,
    }
}

/// Score in `[0, 1]` for one field; an absent field scores 0.
pub fn field_score<T>(field: Option<&ReasonedField<T>>) -> f64 {
    let Some(field) = field else {
        return 0.0;
    };
    let base = base_score(field.confidence);
    let adjusted = match field.reason_code {
        Some(ReasonCode::ExplicitLabel) => base * 1.05,
        Some(ReasonCode::NearbyHeader) | None => base,
        Some(ReasonCode::InferredLayout) => base * 0.9,
        Some(ReasonCode::Conflict) => base * 0.5,
        Some(ReasonCode::Missing) => 0.0,
    };
    adjusted.clamp(0.0, 1.0)
}

/// A present field still counts as missing when the model flagged it
/// `missing`, or gave no value without a label backing the absence.
pub fn is_reported_missing<T>(field: &ReasonedField<T>) -> bool {
    match field.reason_code {
        Some(ReasonCode::Missing) => true,
        Some(ReasonCode::ExplicitLabel | ReasonCode::NearbyHeader) => false,
        _ => field.value.is_none(),
    }
}

fn weight_class_of(name: &str) -> WeightClass {
    catalog::lookup(name)
        .map(|spec| spec.weight_class)
        .unwrap_or(WeightClass::Default)
}
