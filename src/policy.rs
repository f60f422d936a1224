use crate::{confidence::ConfidenceScore, config::Scoring};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityGate {
    Accept,
    Review,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub gate: QualityGate,
    pub overall: f64,
    pub missing_required: Vec<String>,
    pub reason: String,
}

/// Maps a score onto the quality gate.
///
/// A missing required field caps the gate at `Review` whatever the overall
/// score.
pub fn decide(cfg: &Scoring, score: &ConfidenceScore) -> PolicyDecision {
    let overall = score.overall;
    let missing = &score.missing_required;

    let (gate, reason) = if overall >= cfg.accept_threshold && missing.is_empty() {
        (
            QualityGate::Accept,
            format!("overall {overall:.3} >= accept {:.2}", cfg.accept_threshold),
        )
    } else if overall >= cfg.accept_threshold {
        (
            QualityGate::Review,
            format!("missing required fields: {}", missing.join(", ")),
        )
    } else if overall >= cfg.review_threshold {
        (
            QualityGate::Review,
            format!("overall {overall:.3} >= review {:.2}", cfg.review_threshold),
        )
    } else {
        (
            QualityGate::Reject,
            format!("overall {overall:.3} < review {:.2}", cfg.review_threshold),
        )
    };

    PolicyDecision {
        gate,
        overall,
        missing_required: missing.clone(),
        reason,
    }
}
